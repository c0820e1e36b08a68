//! Operations that touch both the gallery and the ledger.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use presence_core::{AttendanceLedger, GalleryError, GalleryStore, IdentityName};

/// Mark every identity with a reference image absent for `date`.
///
/// Seeds from the gallery listing, not from the embedded gallery, so an
/// identity whose image cannot be embedded still gets a row.
pub fn seed(gallery: &GalleryStore, ledger: &AttendanceLedger, date: NaiveDate) -> Result<usize> {
    let names: Vec<IdentityName> = gallery.entries()?.into_iter().map(|e| e.name).collect();
    let inserted = ledger.seed_absent(&names, date)?;
    Ok(inserted.len())
}

/// Remove `name` from the gallery and every ledger date. Returns the
/// number of ledger rows removed. A missing reference image is not an error.
pub fn delete(
    gallery: &GalleryStore,
    ledger: &AttendanceLedger,
    name: &IdentityName,
) -> Result<usize> {
    match gallery.remove(name) {
        Ok(_) => {}
        Err(GalleryError::NotFound(_)) => {
            tracing::debug!(name = %name, "no reference image to remove");
        }
        Err(e) => return Err(e.into()),
    }
    Ok(ledger.remove(name)?)
}

/// Rename `old` to `new` in the gallery and the ledger.
///
/// The gallery goes first; if the ledger then refuses, the gallery file is
/// renamed back so the two stay consistent.
pub fn rename(
    gallery: &GalleryStore,
    ledger: &AttendanceLedger,
    old: &IdentityName,
    new: &IdentityName,
) -> Result<usize> {
    gallery.rename(old, new)?;
    match ledger.rename(old, new) {
        Ok(rows) => Ok(rows),
        Err(e) => {
            tracing::warn!(
                from = %old,
                to = %new,
                error = %e,
                "ledger rename failed; restoring gallery"
            );
            gallery
                .rename(new, old)
                .context("restoring gallery after failed ledger rename")?;
            Err(e.into())
        }
    }
}

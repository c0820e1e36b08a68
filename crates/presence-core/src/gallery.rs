//! Reference-image gallery.
//!
//! One image per identity; the file stem is the identity name. Loading
//! embeds every image through a [`FaceEncoder`]. A bad image only removes
//! that identity from matching and is listed in the [`LoadReport`].

use crate::encoder::{EncoderError, FaceEncoder};
use crate::name::{IdentityName, NameError};
use crate::types::Identity;
use image::DynamicImage;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];
const SAVED_EXTENSION: &str = "jpg";

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("no face found in reference image {0}")]
    EmbeddingNotFound(PathBuf),
    #[error("encoder returned an empty embedding for {0}")]
    EmptyEmbedding(PathBuf),
    #[error("embedding for {path} has {actual} values, gallery uses {expected}")]
    EmbeddingLength {
        path: PathBuf,
        expected: usize,
        actual: usize,
    },
    #[error("invalid identity name in {path}: {source}")]
    InvalidName { path: PathBuf, source: NameError },
    #[error("identity {0} already exists in the gallery")]
    DuplicateIdentity(IdentityName),
    #[error("identity {0} not found in the gallery")]
    NotFound(IdentityName),
    #[error("encoder: {0}")]
    Encoder(#[from] EncoderError),
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// A reference image on disk, not yet embedded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GalleryEntry {
    pub name: IdentityName,
    pub path: PathBuf,
}

/// Known identities in deterministic (file-name) order.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    identities: Vec<Identity>,
}

impl Gallery {
    pub fn new(identities: Vec<Identity>) -> Self {
        Self { identities }
    }

    pub fn identities(&self) -> &[Identity] {
        &self.identities
    }

    pub fn names(&self) -> Vec<IdentityName> {
        self.identities.iter().map(|i| i.name.clone()).collect()
    }

    pub fn contains(&self, name: &IdentityName) -> bool {
        self.identities.iter().any(|i| &i.name == name)
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

/// Result of [`GalleryStore::load`].
#[derive(Debug)]
pub struct LoadReport {
    pub gallery: Gallery,
    /// Files that could not become an identity, with the reason.
    pub skipped: Vec<(PathBuf, GalleryError)>,
}

/// Directory of reference images.
#[derive(Debug, Clone)]
pub struct GalleryStore {
    dir: PathBuf,
}

impl GalleryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// List reference images without embedding them.
    ///
    /// A missing directory is an empty gallery. Entries whose stem is not a
    /// valid name, or that collide with an earlier entry, are left out.
    pub fn entries(&self) -> Result<Vec<GalleryEntry>, GalleryError> {
        Ok(self.scan()?.0)
    }

    /// Embed every reference image.
    ///
    /// Per-file failures are collected in [`LoadReport::skipped`]; only a
    /// directory that exists but cannot be read fails the whole load.
    /// The first embedded image fixes the embedding length; images that
    /// embed to a different length are skipped.
    pub fn load<E: FaceEncoder>(&self, encoder: &mut E) -> Result<LoadReport, GalleryError> {
        let (entries, mut skipped) = self.scan()?;
        let mut identities: Vec<Identity> = Vec::with_capacity(entries.len());

        for entry in entries {
            let expected = identities.first().map(|i| i.embedding.len());
            match embed_entry(&entry, encoder, expected) {
                Ok(identity) => identities.push(identity),
                Err(err) => {
                    tracing::warn!(
                        path = %entry.path.display(),
                        error = %err,
                        "reference image skipped; identity will not be matched"
                    );
                    skipped.push((entry.path, err));
                }
            }
        }

        tracing::info!(
            dir = %self.dir.display(),
            loaded = identities.len(),
            skipped = skipped.len(),
            "gallery loaded"
        );

        Ok(LoadReport {
            gallery: Gallery::new(identities),
            skipped,
        })
    }

    /// Save a new reference image as `<name>.jpg`.
    pub fn add(&self, name: &IdentityName, image: &DynamicImage) -> Result<PathBuf, GalleryError> {
        if self.find(name)?.is_some() {
            return Err(GalleryError::DuplicateIdentity(name.clone()));
        }
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!("{}.{SAVED_EXTENSION}", name.as_str()));
        // JPEG has no alpha channel.
        DynamicImage::ImageRgb8(image.to_rgb8()).save(&path)?;
        tracing::info!(name = %name, path = %path.display(), "reference image added");
        Ok(path)
    }

    /// Delete the reference image of `name`.
    pub fn remove(&self, name: &IdentityName) -> Result<PathBuf, GalleryError> {
        let entry = self
            .find(name)?
            .ok_or_else(|| GalleryError::NotFound(name.clone()))?;
        fs::remove_file(&entry.path)?;
        tracing::info!(name = %name, path = %entry.path.display(), "reference image removed");
        Ok(entry.path)
    }

    /// Rename the reference image of `old` to `new`, keeping its extension.
    pub fn rename(&self, old: &IdentityName, new: &IdentityName) -> Result<PathBuf, GalleryError> {
        let entry = self
            .find(old)?
            .ok_or_else(|| GalleryError::NotFound(old.clone()))?;
        if old != new && self.find(new)?.is_some() {
            return Err(GalleryError::DuplicateIdentity(new.clone()));
        }
        let ext = entry
            .path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or(SAVED_EXTENSION)
            .to_string();
        let target = self.dir.join(format!("{}.{ext}", new.as_str()));
        fs::rename(&entry.path, &target)?;
        tracing::info!(from = %old, to = %new, "reference image renamed");
        Ok(target)
    }

    fn find(&self, name: &IdentityName) -> Result<Option<GalleryEntry>, GalleryError> {
        Ok(self.entries()?.into_iter().find(|e| &e.name == name))
    }

    fn scan(&self) -> Result<(Vec<GalleryEntry>, Vec<(PathBuf, GalleryError)>), GalleryError> {
        let read_dir = match fs::read_dir(&self.dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(dir = %self.dir.display(), "gallery directory missing; treating as empty");
                return Ok((Vec::new(), Vec::new()));
            }
            Err(e) => return Err(e.into()),
        };

        let mut paths = Vec::new();
        for dirent in read_dir {
            let path = dirent?.path();
            if path.is_file() && is_image_path(&path) {
                paths.push(path);
            } else {
                tracing::debug!(path = %path.display(), "ignoring non-image gallery entry");
            }
        }
        paths.sort();

        let mut seen = HashSet::new();
        let mut entries = Vec::with_capacity(paths.len());
        let mut skipped = Vec::new();
        for path in paths {
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            match IdentityName::new(&stem) {
                Ok(name) if !seen.insert(name.clone()) => {
                    skipped.push((path, GalleryError::DuplicateIdentity(name)));
                }
                Ok(name) => entries.push(GalleryEntry { name, path }),
                Err(source) => {
                    skipped.push((path.clone(), GalleryError::InvalidName { path, source }));
                }
            }
        }
        Ok((entries, skipped))
    }
}

/// Whether `path` has one of the image extensions the gallery and frame
/// directories accept (`jpg`, `jpeg`, `png`, any case).
pub fn is_image_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn embed_entry<E: FaceEncoder>(
    entry: &GalleryEntry,
    encoder: &mut E,
    expected_len: Option<usize>,
) -> Result<Identity, GalleryError> {
    let image = image::open(&entry.path)?;
    let embedding = encoder.encode_single_face(&image).map_err(|e| match e {
        EncoderError::NoFaceDetected => GalleryError::EmbeddingNotFound(entry.path.clone()),
        other => GalleryError::Encoder(other),
    })?;
    if embedding.is_empty() {
        return Err(GalleryError::EmptyEmbedding(entry.path.clone()));
    }
    if let Some(expected) = expected_len.filter(|&n| n != embedding.len()) {
        return Err(GalleryError::EmbeddingLength {
            path: entry.path.clone(),
            expected,
            actual: embedding.len(),
        });
    }
    Ok(Identity {
        name: entry.name.clone(),
        embedding,
    })
}

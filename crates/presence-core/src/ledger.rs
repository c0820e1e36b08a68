//! Daily attendance ledger.
//!
//! A CSV table `Date,Name,Status,Time` holding at most one row per
//! (date, name). Every mutation reads the whole table, edits it in memory
//! and replaces the file atomically through a temporary file in the same
//! directory.
//!
//! The ledger assumes a single writer. Two processes mutating the same
//! file concurrently can lose updates.

use crate::name::IdentityName;
use chrono::{Local, NaiveDate, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

const HEADER: [&str; 4] = ["Date", "Name", "Status", "Time"];

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("ledger io: {0}")]
    Io(#[from] std::io::Error),
    #[error("ledger csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("ledger replace failed: {0}")]
    Persist(#[from] tempfile::PersistError),
    #[error("malformed ledger at line {line}: {reason}")]
    Malformed { line: u64, reason: String },
    #[error("duplicate ledger rows for {name} on {date}")]
    DuplicateKey { date: NaiveDate, name: IdentityName },
    #[error("cannot rename {from} to {to}: both have a record on {date}")]
    RenameConflict {
        from: IdentityName,
        to: IdentityName,
        date: NaiveDate,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Present,
    Absent,
}

/// One ledger row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceRecord {
    pub date: NaiveDate,
    pub name: IdentityName,
    pub status: Status,
    /// Arrival time; `None` while absent.
    pub time: Option<NaiveTime>,
}

impl AttendanceRecord {
    fn absent(date: NaiveDate, name: IdentityName) -> Self {
        Self {
            date,
            name,
            status: Status::Absent,
            time: None,
        }
    }

    fn key(&self) -> (NaiveDate, &IdentityName) {
        (self.date, &self.name)
    }
}

/// On-disk row shape.
#[derive(Debug, Serialize, Deserialize)]
struct Row {
    #[serde(rename = "Date")]
    date: NaiveDate,
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Status")]
    status: Status,
    #[serde(rename = "Time")]
    time: Option<NaiveTime>,
}

impl From<&AttendanceRecord> for Row {
    fn from(r: &AttendanceRecord) -> Self {
        Self {
            date: r.date,
            name: r.name.as_str().to_string(),
            status: r.status,
            time: r.time,
        }
    }
}

/// Today's date in the local time zone.
pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Current local time of day, whole seconds.
pub fn now_time() -> NaiveTime {
    let now = Local::now().time();
    now.with_nanosecond(0).unwrap_or(now)
}

/// Handle to the persisted attendance table.
#[derive(Debug, Clone)]
pub struct AttendanceLedger {
    path: PathBuf,
}

impl AttendanceLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the table with its header if it does not exist yet.
    ///
    /// Returns `true` when the file was created.
    pub fn initialize(&self) -> Result<bool, LedgerError> {
        if self.path.exists() {
            return Ok(false);
        }
        self.write_all(&[])?;
        tracing::info!(path = %self.path.display(), "ledger created");
        Ok(true)
    }

    /// All rows in file order. A missing file reads as empty.
    pub fn records(&self) -> Result<Vec<AttendanceRecord>, LedgerError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(&self.path)?;

        let headers = reader.headers()?;
        if headers.iter().ne(HEADER.iter().copied()) {
            return Err(LedgerError::Malformed {
                line: 1,
                reason: format!("expected header {HEADER:?}, got {headers:?}"),
            });
        }

        let mut records = Vec::new();
        let mut seen = HashSet::new();
        for result in reader.deserialize::<Row>() {
            let row = result?;
            let name = IdentityName::new(&row.name).map_err(|e| LedgerError::Malformed {
                line: records.len() as u64 + 2,
                reason: e.to_string(),
            })?;
            if !seen.insert((row.date, name.clone())) {
                tracing::error!(date = %row.date, name = %name, "duplicate ledger key");
                return Err(LedgerError::DuplicateKey { date: row.date, name });
            }
            records.push(AttendanceRecord {
                date: row.date,
                name,
                status: row.status,
                time: row.time,
            });
        }
        Ok(records)
    }

    /// Rows for one day, in file order.
    pub fn records_for(&self, date: NaiveDate) -> Result<Vec<AttendanceRecord>, LedgerError> {
        Ok(self
            .records()?
            .into_iter()
            .filter(|r| r.date == date)
            .collect())
    }

    /// Distinct dates present in the ledger, newest first.
    pub fn dates(&self) -> Result<Vec<NaiveDate>, LedgerError> {
        let mut dates: Vec<NaiveDate> = self.records()?.into_iter().map(|r| r.date).collect();
        dates.sort_unstable_by(|a, b| b.cmp(a));
        dates.dedup();
        Ok(dates)
    }

    /// Give every name without a row on `date` an Absent row.
    ///
    /// Returns the inserted rows. Running it again for the same date inserts nothing.
    pub fn seed_absent(
        &self,
        names: &[IdentityName],
        date: NaiveDate,
    ) -> Result<Vec<AttendanceRecord>, LedgerError> {
        let mut records = self.records()?;
        let mut existing: HashSet<IdentityName> = records
            .iter()
            .filter(|r| r.date == date)
            .map(|r| r.name.clone())
            .collect();

        let mut inserted = Vec::new();
        for name in names {
            if existing.insert(name.clone()) {
                inserted.push(AttendanceRecord::absent(date, name.clone()));
            }
        }

        if inserted.is_empty() {
            self.initialize()?;
            return Ok(inserted);
        }

        records.extend(inserted.iter().cloned());
        self.write_all(&records)?;
        tracing::info!(%date, seeded = inserted.len(), "absent rows seeded");
        Ok(inserted)
    }

    /// Mark `name` present on `date` at `time`.
    ///
    /// Updates the existing row for (date, name) if there is one, otherwise
    /// appends a new row. Marking twice refreshes the time.
    pub fn mark_present(
        &self,
        name: &IdentityName,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<AttendanceRecord, LedgerError> {
        let mut records = self.records()?;

        let record = match records.iter_mut().find(|r| r.key() == (date, name)) {
            Some(existing) => {
                existing.status = Status::Present;
                existing.time = Some(time);
                existing.clone()
            }
            None => {
                let record = AttendanceRecord {
                    date,
                    name: name.clone(),
                    status: Status::Present,
                    time: Some(time),
                };
                records.push(record.clone());
                record
            }
        };

        self.write_all(&records)?;
        tracing::info!(name = %name, %date, %time, "marked present");
        Ok(record)
    }

    /// [`mark_present`](Self::mark_present) at the current local date and time.
    pub fn mark_present_now(&self, name: &IdentityName) -> Result<AttendanceRecord, LedgerError> {
        self.mark_present(name, today(), now_time())
    }

    /// Delete every row for `name`, across all dates. Returns the number removed.
    pub fn remove(&self, name: &IdentityName) -> Result<usize, LedgerError> {
        let mut records = self.records()?;
        let before = records.len();
        records.retain(|r| &r.name != name);
        let removed = before - records.len();
        if removed > 0 {
            self.write_all(&records)?;
        }
        tracing::info!(name = %name, removed, "ledger rows removed");
        Ok(removed)
    }

    /// Rewrite every row of `old` to `new`. Returns the number renamed.
    ///
    /// Fails without writing if both names have a row on the same date.
    pub fn rename(&self, old: &IdentityName, new: &IdentityName) -> Result<usize, LedgerError> {
        if old == new {
            return Ok(0);
        }
        let mut records = self.records()?;

        let new_dates: HashSet<NaiveDate> = records
            .iter()
            .filter(|r| &r.name == new)
            .map(|r| r.date)
            .collect();
        if let Some(clash) = records
            .iter()
            .find(|r| &r.name == old && new_dates.contains(&r.date))
        {
            return Err(LedgerError::RenameConflict {
                from: old.clone(),
                to: new.clone(),
                date: clash.date,
            });
        }

        let mut renamed = 0;
        for record in records.iter_mut().filter(|r| &r.name == old) {
            record.name = new.clone();
            renamed += 1;
        }
        if renamed > 0 {
            self.write_all(&records)?;
        }
        tracing::info!(from = %old, to = %new, renamed, "ledger rows renamed");
        Ok(renamed)
    }

    /// Replace the table with `records` via temp file + rename.
    fn write_all(&self, records: &[AttendanceRecord]) -> Result<(), LedgerError> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let mut tmp = NamedTempFile::new_in(&dir)?;
        {
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(tmp.as_file_mut());
            writer.write_record(HEADER)?;
            for record in records {
                writer.serialize(Row::from(record))?;
            }
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)?;
        tracing::debug!(path = %self.path.display(), rows = records.len(), "ledger written");
        Ok(())
    }
}

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::StorageError;

pub const DEFAULT_MARKER_FILE: &str = ".distance-migrated";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationStatus {
    Pending,
    /// `completed_at` is `None` when the marker exists but its body is not a
    /// timestamp; presence alone decides the status.
    Done { completed_at: Option<DateTime<Utc>> },
}

impl MigrationStatus {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done { .. })
    }
}

/// File sentinel next to the engine's data, holding an RFC 3339 timestamp.
#[derive(Debug, Clone)]
pub struct MigrationMarker {
    path: PathBuf,
}

impl MigrationMarker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_dir(data_dir: impl AsRef<Path>) -> Self {
        Self::new(data_dir.as_ref().join(DEFAULT_MARKER_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn status(&self) -> Result<MigrationStatus, StorageError> {
        if !self.path.exists() {
            return Ok(MigrationStatus::Pending);
        }
        let raw = fs::read_to_string(&self.path)?;
        let completed_at = DateTime::parse_from_rfc3339(raw.trim())
            .ok()
            .map(|t| t.with_timezone(&Utc));
        Ok(MigrationStatus::Done { completed_at })
    }

    pub fn mark_done(&self, at: DateTime<Utc>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&self.path, at.to_rfc3339_opts(SecondsFormat::Millis, true))?;
        Ok(())
    }
}

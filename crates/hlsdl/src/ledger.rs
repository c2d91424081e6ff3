//! Resume record kept next to the output file.
//!
//! The record is a small JSON document, `{"completed": k, "total": n}`,
//! stored at `<output>.resume`. It never claims more segments than the
//! output actually holds: it is written only after the matching bytes have
//! been flushed.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::HlsDownloadError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeRecord {
    pub completed: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerState {
    Absent,
    Restored,
    Active,
    Finalized,
}

#[derive(Debug)]
pub struct ResumeLedger {
    path: PathBuf,
    total: usize,
    state: LedgerState,
}

impl ResumeLedger {
    pub fn new(path: impl Into<PathBuf>, total: usize) -> Self {
        Self {
            path: path.into(),
            total,
            state: LedgerState::Absent,
        }
    }

    pub fn state(&self) -> LedgerState {
        self.state
    }

    /// Reads the record and returns the number of segments it vouches for.
    ///
    /// A missing file yields `Ok(None)`. A record that cannot be parsed, was
    /// written for a playlist of a different length, or describes an already
    /// finished download is rejected; the caller treats that as a fresh start.
    pub async fn restore(&mut self) -> Result<Option<usize>, HlsDownloadError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let record: ResumeRecord = serde_json::from_slice(&raw).map_err(|e| {
            HlsDownloadError::ResumeRecordInvalid(format!(
                "{} is not a valid record: {e}",
                self.path.display()
            ))
        })?;

        if record.total != self.total {
            return Err(HlsDownloadError::ResumeRecordInvalid(format!(
                "record covers {} parts, playlist has {}",
                record.total, self.total
            )));
        }
        if record.completed >= record.total {
            return Err(HlsDownloadError::ResumeRecordInvalid(format!(
                "record already complete ({} of {})",
                record.completed, record.total
            )));
        }

        debug!(path = %self.path.display(), completed = record.completed, "Resume record restored");
        self.state = LedgerState::Restored;
        Ok(Some(record.completed))
    }

    /// Marks the ledger as live; later persists are expected.
    pub fn activate(&mut self) {
        self.state = LedgerState::Active;
    }

    /// Durably records that the first `completed` segments are in the output.
    ///
    /// Written to a sibling temp file and renamed over the record so a crash
    /// leaves either the old or the new record, never a torn one.
    pub async fn persist(&mut self, completed: usize) -> Result<(), HlsDownloadError> {
        let record = ResumeRecord {
            completed,
            total: self.total,
        };
        let json = serde_json::to_vec(&record)
            .map_err(|e| HlsDownloadError::ResumeRecordInvalid(e.to_string()))?;

        let tmp = self.tmp_path();
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&json).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, &self.path).await?;

        self.state = LedgerState::Active;
        Ok(())
    }

    /// Removes the record after the last segment has been committed.
    pub async fn finalize(&mut self) -> Result<(), HlsDownloadError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to remove resume record");
                return Err(e.into());
            }
        }
        self.state = LedgerState::Finalized;
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    }
}

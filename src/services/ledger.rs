//! Persisted record of submitted training jobs.
//!
//! Maps a training configuration fingerprint to the job it produced so a
//! rerun with the same inputs resumes the existing job instead of creating
//! another one. The file is rewritten atomically (temp file + rename).

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::JobError;
use crate::models::TrainingJobHandle;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub handle: TrainingJobHandle,
    pub recorded_at: DateTime<Utc>,
}

/// Fingerprint -> training job handle.
#[derive(Debug, Default)]
pub struct JobLedger {
    path: Option<PathBuf>,
    entries: BTreeMap<String, LedgerEntry>,
}

impl JobLedger {
    /// Open the ledger at `path`. A missing file is an empty ledger.
    pub fn open(path: &Path) -> Result<Self, JobError> {
        let entries = match std::fs::read_to_string(path) {
            Ok(contents) if contents.trim().is_empty() => BTreeMap::new(),
            Ok(contents) => serde_json::from_str(&contents)
                .map_err(|e| JobError::Ledger(format!("{}: {}", path.display(), e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(JobError::Ledger(format!("{}: {}", path.display(), e))),
        };
        Ok(Self {
            path: Some(path.to_path_buf()),
            entries,
        })
    }

    /// A ledger that is never written to disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get(&self, fingerprint: &str) -> Option<&TrainingJobHandle> {
        self.entries.get(fingerprint).map(|e| &e.handle)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record `handle` under `fingerprint`, replacing any earlier job.
    pub fn record(&mut self, fingerprint: &str, handle: &TrainingJobHandle) -> Result<(), JobError> {
        self.entries.insert(
            fingerprint.to_string(),
            LedgerEntry {
                handle: handle.clone(),
                recorded_at: Utc::now(),
            },
        );
        self.persist()
    }

    pub fn remove(&mut self, fingerprint: &str) -> Result<Option<TrainingJobHandle>, JobError> {
        let removed = self.entries.remove(fingerprint).map(|e| e.handle);
        if removed.is_some() {
            self.persist()?;
        }
        Ok(removed)
    }

    fn persist(&self) -> Result<(), JobError> {
        let Some(ref path) = self.path else {
            return Ok(());
        };
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let ledger_err = |e: std::io::Error| JobError::Ledger(format!("{}: {}", path.display(), e));

        std::fs::create_dir_all(&dir).map_err(ledger_err)?;
        let json = serde_json::to_vec_pretty(&self.entries)
            .map_err(|e| JobError::Ledger(e.to_string()))?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(ledger_err)?;
        tmp.write_all(&json).map_err(ledger_err)?;
        tmp.as_file().sync_all().map_err(ledger_err)?;
        tmp.persist(path).map_err(|e| ledger_err(e.error))?;

        debug!("Wrote {} ledger entries to {}", self.entries.len(), path.display());
        Ok(())
    }
}

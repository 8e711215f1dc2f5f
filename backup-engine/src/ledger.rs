// SPDX-License-Identifier: GPL-3.0-only

//! Recovery ledger
//!
//! One JSON record per source volume, written when a job claims the volume
//! and removed once its snapshot set has been released. A record that
//! survives the process names the snapshot and mount left behind.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use backup_types::{MountSlot, SnapshotProperties};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BackupError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub source_volume: String,
    pub pid: u32,
    pub claimed_at: DateTime<Utc>,
    pub snapshot: Option<SnapshotProperties>,
    pub mount: Option<MountSlot>,
    pub updated_at: DateTime<Utc>,
}

impl LedgerRecord {
    pub fn claim(source_volume: &str) -> Self {
        let now = Utc::now();
        Self {
            source_volume: source_volume.to_string(),
            pid: std::process::id(),
            claimed_at: now,
            snapshot: None,
            mount: None,
            updated_at: now,
        }
    }

    /// Another live process still owns this record
    pub fn owner_alive(&self) -> bool {
        self.pid != std::process::id() && Path::new("/proc").join(self.pid.to_string()).exists()
    }
}

fn ledger_error(path: &Path, error: impl ToString) -> BackupError {
    BackupError::Ledger {
        path: path.to_path_buf(),
        reason: error.to_string(),
    }
}

/// File-safe key for a volume ("/dev/vg0/root" -> "dev_vg0_root")
pub fn record_key(source_volume: &str) -> String {
    let key: String = source_volume
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    key.trim_matches('_').to_string()
}

#[derive(Debug, Clone)]
pub struct RecoveryLedger {
    dir: PathBuf,
}

impl RecoveryLedger {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn record_path(&self, source_volume: &str) -> PathBuf {
        self.dir.join(format!("{}.json", record_key(source_volume)))
    }

    pub fn load(&self, source_volume: &str) -> Result<LedgerRecord> {
        load_record(&self.record_path(source_volume))
    }

    pub fn save(&self, record: &LedgerRecord) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir).map_err(|error| ledger_error(&self.dir, error))?;

        let path = self.record_path(&record.source_volume);
        let content =
            serde_json::to_string_pretty(record).map_err(|error| ledger_error(&path, error))?;
        fs::write(&path, content).map_err(|error| ledger_error(&path, error))?;
        Ok(path)
    }

    /// Create the record for a job taking `record.source_volume`
    ///
    /// Fails with `ConcurrentJob` when any record for the volume exists, live
    /// or stale; the file is created exclusively so two claimants cannot both
    /// succeed.
    pub fn claim(&self, record: &LedgerRecord) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir).map_err(|error| ledger_error(&self.dir, error))?;

        let path = self.record_path(&record.source_volume);
        let content =
            serde_json::to_string_pretty(record).map_err(|error| ledger_error(&path, error))?;
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(error) if error.kind() == io::ErrorKind::AlreadyExists => {
                return Err(BackupError::ConcurrentJob {
                    volume: record.source_volume.clone(),
                    record: path,
                });
            }
            Err(error) => return Err(ledger_error(&path, error)),
        };

        if let Err(error) = file.write_all(content.as_bytes()) {
            // A half-written claim would block the volume for good.
            let _ = fs::remove_file(&path);
            return Err(ledger_error(&path, error));
        }
        Ok(path)
    }

    /// Re-read, change and rewrite the record of `source_volume`
    pub fn update(
        &self,
        source_volume: &str,
        change: impl FnOnce(&mut LedgerRecord),
    ) -> Result<PathBuf> {
        let mut record = self.load(source_volume)?;
        change(&mut record);
        record.updated_at = Utc::now();
        self.save(&record)
    }

    pub fn remove(&self, source_volume: &str) -> Result<()> {
        let path = self.record_path(source_volume);
        if path.exists() {
            fs::remove_file(&path).map_err(|error| ledger_error(&path, error))?;
        }
        Ok(())
    }

    /// Every record in the ledger directory, oldest claim first
    pub fn records(&self) -> Result<Vec<LedgerRecord>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(ledger_error(&self.dir, error)),
        };

        let mut records = Vec::new();
        for entry in entries {
            let path = entry.map_err(|error| ledger_error(&self.dir, error))?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                records.push(load_record(&path)?);
            }
        }
        records.sort_by_key(|record| record.claimed_at);
        Ok(records)
    }
}

fn load_record(path: &Path) -> Result<LedgerRecord> {
    let raw = fs::read_to_string(path).map_err(|error| ledger_error(path, error))?;
    serde_json::from_str(&raw).map_err(|error| ledger_error(path, error))
}

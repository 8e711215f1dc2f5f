// SPDX-License-Identifier: GPL-3.0-only

//! Engine configuration
//!
//! Read-only for the lifetime of a job. Loaded from TOML; every key is optional.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config io error for {path:?}: {reason}")]
    Io { path: PathBuf, reason: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Block image read/write unit
    pub chunk_size: usize,

    /// Emit a progress event every N chunks
    pub progress_every_chunks: u64,

    /// Deadline for each asynchronous provider wait; `None` waits forever
    pub provider_wait_timeout_secs: Option<u64>,

    /// Where recovery ledger records are kept
    pub ledger_dir: PathBuf,

    pub mount: MountConfig,
    pub mirror: MirrorConfig,
    pub lvm: LvmConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1024 * 1024,
            progress_every_chunks: 256,
            provider_wait_timeout_secs: None,
            ledger_dir: PathBuf::from("/var/lib/snapshot-backup"),
            mount: MountConfig::default(),
            mirror: MirrorConfig::default(),
            lvm: LvmConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MountConfig {
    pub root: PathBuf,

    /// Letters never handed out (the "system" letters)
    pub reserved_slots: Vec<String>,

    /// Options passed to `mount -o`
    pub options: String,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/run/snapshot-backup/mnt"),
            reserved_slots: vec!["a".to_string(), "b".to_string(), "c".to_string()],
            options: "ro".to_string(),
        }
    }
}

impl MountConfig {
    pub fn reserved_letters(&self) -> Vec<char> {
        self.reserved_slots
            .iter()
            .filter_map(|slot| slot.chars().next())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CopyTool {
    Robocopy,
    Rsync,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    pub tool: CopyTool,

    /// Subdirectory of the destination the mirrored tree lands in
    pub dir_name: String,

    pub threads: u32,
    pub retries: u32,
    pub wait_secs: u32,

    /// Exit codes at or above this are fatal (robocopy semantics)
    pub fatal_exit_threshold: i32,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            tool: if cfg!(windows) {
                CopyTool::Robocopy
            } else {
                CopyTool::Rsync
            },
            dir_name: "System_Backup".to_string(),
            threads: 8,
            retries: 1,
            wait_secs: 1,
            fatal_exit_threshold: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LvmConfig {
    /// `--size` value (e.g. "2G") or `--extents` value when it contains '%'
    pub snapshot_size: String,
}

impl Default for LvmConfig {
    fn default() -> Self {
        Self {
            snapshot_size: "10%ORIGIN".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig =
            toml::from_str(raw).map_err(|error| ConfigError::Invalid(error.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|error| ConfigError::Io {
            path: path.to_path_buf(),
            reason: error.to_string(),
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk_size must be positive".to_string()));
        }

        if self.progress_every_chunks == 0 {
            return Err(ConfigError::Invalid(
                "progress_every_chunks must be positive".to_string(),
            ));
        }

        if self.mirror.threads == 0 {
            return Err(ConfigError::Invalid("mirror.threads must be positive".to_string()));
        }

        if self.mirror.dir_name.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "mirror.dir_name must not be empty".to_string(),
            ));
        }

        let reserved = self.mount.reserved_letters();
        if ('a'..='z').all(|letter| reserved.iter().any(|r| r.eq_ignore_ascii_case(&letter))) {
            return Err(ConfigError::Invalid(
                "mount.reserved_slots leaves no usable slot".to_string(),
            ));
        }

        Ok(())
    }

    pub fn provider_wait_timeout(&self) -> Option<Duration> {
        self.provider_wait_timeout_secs.map(Duration::from_secs)
    }
}

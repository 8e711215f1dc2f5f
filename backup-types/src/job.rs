// SPDX-License-Identifier: GPL-3.0-only

//! Backup job, state machine and report models

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// File name of the block image written under the destination root
pub const BLOCK_IMAGE_FILE_NAME: &str = "system_image.bin";

/// How a file mirror is carried out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CopyMode {
    /// Delegate to the configured bulk-copy tool (robocopy / rsync)
    #[default]
    External,
    /// Walk and copy the tree in-process
    Direct,
}

/// Strategy selected at job construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackupStrategy {
    FileMirror { mode: CopyMode },
    BlockImage,
}

impl BackupStrategy {
    pub fn kind(self) -> StrategyKind {
        match self {
            Self::FileMirror { .. } => StrategyKind::FileMirror,
            Self::BlockImage => StrategyKind::BlockImage,
        }
    }

    /// Only the file mirror needs an addressable mount point
    pub fn needs_mount(self) -> bool {
        matches!(self, Self::FileMirror { .. })
    }
}

/// Strategy discriminant without per-variant configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    FileMirror,
    BlockImage,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FileMirror => write!(f, "file_mirror"),
            Self::BlockImage => write!(f, "block_image"),
        }
    }
}

/// Pipeline step, used to label failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStep {
    Precondition,
    Initialize,
    BeginSet,
    AddSource,
    Prepare,
    CommitSnapshotSet,
    QueryProperties,
    Mount,
    Copy,
    BackupComplete,
    Release,
}

impl fmt::Display for JobStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Precondition => "precondition",
            Self::Initialize => "initialize",
            Self::BeginSet => "begin_set",
            Self::AddSource => "add_source",
            Self::Prepare => "prepare",
            Self::CommitSnapshotSet => "commit_snapshot_set",
            Self::QueryProperties => "query_properties",
            Self::Mount => "mount",
            Self::Copy => "copy",
            Self::BackupComplete => "backup_complete",
            Self::Release => "release",
        };
        f.write_str(name)
    }
}

/// Orchestrator state
///
/// `Complete` and `Failed` are terminal. A failed job is never resumed; it is
/// re-run from `Idle` with a fresh snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Idle,
    Initialized,
    Snapshotted,
    Mounted,
    Copied,
    Released,
    Complete,
    Failed { step: JobStep },
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed { .. })
    }

    /// Whether `next` is a legal successor of `self`
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (from, Failed { .. }) => !from.is_terminal(),
            (Idle, Initialized)
            | (Initialized, Snapshotted)
            | (Snapshotted, Mounted)
            | (Snapshotted, Copied)
            | (Mounted, Copied)
            | (Copied, Released)
            | (Released, Complete) => true,
            _ => false,
        }
    }
}

/// Terminal outcome of a job: success or the first fatal error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    Complete,
    Failed { step: JobStep, error: String },
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Complete)
    }
}

/// One backup run
///
/// Created by the caller and handed to the orchestrator by mutable reference;
/// it is deliberately not `Clone`.
#[derive(Debug)]
pub struct BackupJob {
    pub source_volume: String,
    pub destination: PathBuf,
    pub strategy: BackupStrategy,

    /// Physical drive whose boot record and layout are captured afterwards
    pub metadata_drive: Option<u32>,

    pub state: JobState,
    pub outcome: Option<JobOutcome>,

    /// Bytes written so far (block image only)
    pub bytes_copied: u64,

    pub history: Vec<JobState>,
    pub artifacts: Vec<PathBuf>,
    pub secondary_errors: Vec<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl BackupJob {
    pub fn new(
        source_volume: impl Into<String>,
        destination: impl Into<PathBuf>,
        strategy: BackupStrategy,
    ) -> Self {
        Self {
            source_volume: source_volume.into(),
            destination: destination.into(),
            strategy,
            metadata_drive: None,
            state: JobState::Idle,
            outcome: None,
            bytes_copied: 0,
            history: vec![JobState::Idle],
            artifacts: Vec::new(),
            secondary_errors: Vec::new(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn with_metadata_drive(mut self, index: u32) -> Self {
        self.metadata_drive = Some(index);
        self
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Move to `next`, returning false (and staying put) on an illegal transition
    pub fn transition(&mut self, next: JobState) -> bool {
        if !self.state.can_transition_to(next) {
            return false;
        }
        self.state = next;
        self.history.push(next);
        true
    }

    pub fn report(&self) -> JobReport {
        JobReport {
            source_volume: self.source_volume.clone(),
            destination: self.destination.clone(),
            strategy: self.strategy,
            outcome: self.outcome.clone().unwrap_or(JobOutcome::Failed {
                step: JobStep::Precondition,
                error: "job was never run".to_string(),
            }),
            states: self.history.clone(),
            bytes_copied: self.bytes_copied,
            artifacts: self.artifacts.clone(),
            secondary_errors: self.secondary_errors.clone(),
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}

/// Serializable summary of a finished job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobReport {
    pub source_volume: String,
    pub destination: PathBuf,
    pub strategy: BackupStrategy,
    pub outcome: JobOutcome,
    pub states: Vec<JobState>,
    pub bytes_copied: u64,
    pub artifacts: Vec<PathBuf>,
    pub secondary_errors: Vec<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mirror_job() -> BackupJob {
        BackupJob::new(
            "/dev/vg0/root",
            "/backup",
            BackupStrategy::FileMirror {
                mode: CopyMode::Direct,
            },
        )
    }

    #[test]
    fn mirror_path_walks_every_state() {
        let mut job = mirror_job();
        for next in [
            JobState::Initialized,
            JobState::Snapshotted,
            JobState::Mounted,
            JobState::Copied,
            JobState::Released,
            JobState::Complete,
        ] {
            assert!(job.transition(next), "transition to {next:?}");
        }
        assert_eq!(job.history.len(), 7);
        assert!(job.state.is_terminal());
    }

    #[test]
    fn block_image_skips_mounted() {
        assert!(JobState::Snapshotted.can_transition_to(JobState::Copied));
    }

    #[test]
    fn terminal_states_do_not_move() {
        let mut job = mirror_job();
        assert!(job.transition(JobState::Failed {
            step: JobStep::Initialize
        }));
        assert!(!job.transition(JobState::Initialized));
        assert!(!job.transition(JobState::Failed {
            step: JobStep::Copy
        }));
        assert_eq!(
            job.state,
            JobState::Failed {
                step: JobStep::Initialize
            }
        );
    }

    #[test]
    fn skipping_states_is_rejected() {
        let mut job = mirror_job();
        assert!(!job.transition(JobState::Copied));
        assert_eq!(job.state, JobState::Idle);
    }

    #[test]
    fn report_serializes_tagged_variants() {
        let mut job = mirror_job();
        job.outcome = Some(JobOutcome::Failed {
            step: JobStep::Mount,
            error: "no free mount point".to_string(),
        });
        let json = serde_json::to_value(job.report()).expect("serialize report");
        assert_eq!(json["outcome"]["status"], "failed");
        assert_eq!(json["outcome"]["step"], "mount");
        assert_eq!(json["strategy"]["kind"], "file_mirror");
        assert_eq!(json["strategy"]["mode"], "direct");
        assert_eq!(json["states"][0]["state"], "idle");
    }
}

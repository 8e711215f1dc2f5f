// SPDX-License-Identifier: GPL-3.0-only

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use backup_contracts::BulkCopyTool;
use backup_engine::{BackupOrchestrator, Collaborators, RecoveryLedger};
use backup_testing::{FakeCopyTool, FakeDevices, FakeMapper, FakePrivilege, FakeProvider};
use backup_types::{BackupJob, BackupStrategy, CopyMode, EngineConfig, JobOutcome, JobStep};
use tempfile::TempDir;

pub const VOLUME: &str = "/dev/vg0/root";
pub const DEVICE: &str = "/dev/vg0/root-snap-test";

pub struct Lab {
    _tmp: TempDir,
    pub root: PathBuf,
    pub config: EngineConfig,
}

impl Lab {
    pub fn new() -> Self {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path().to_path_buf();

        let mut config = EngineConfig::default();
        config.chunk_size = 4096;
        config.progress_every_chunks = 2;
        config.ledger_dir = root.join("ledger");
        config.mount.root = root.join("mnt");

        Self {
            _tmp: tmp,
            root,
            config,
        }
    }

    pub fn destination(&self) -> PathBuf {
        self.root.join("dest")
    }

    pub fn slot_path(&self, letter: char) -> PathBuf {
        self.config.mount.root.join(letter.to_string())
    }

    pub fn ledger(&self) -> RecoveryLedger {
        RecoveryLedger::new(self.config.ledger_dir.clone())
    }

    pub fn job(&self, strategy: BackupStrategy) -> BackupJob {
        BackupJob::new(VOLUME, self.destination(), strategy)
    }

    pub fn orchestrator(
        &self,
        provider: FakeProvider,
        mapper: FakeMapper,
        devices: FakeDevices,
        copy_tool: Option<FakeCopyTool>,
    ) -> BackupOrchestrator {
        BackupOrchestrator::new(
            self.config.clone(),
            Collaborators {
                privilege: Box::new(FakePrivilege::elevated()),
                provider: Box::new(provider),
                mapper: Box::new(mapper),
                devices: Box::new(devices),
                copy_tool: copy_tool.map(|tool| Box::new(tool) as Box<dyn BulkCopyTool>),
            },
        )
        .with_ledger(self.ledger())
    }
}

pub fn direct_mirror() -> BackupStrategy {
    BackupStrategy::FileMirror {
        mode: CopyMode::Direct,
    }
}

pub fn external_mirror() -> BackupStrategy {
    BackupStrategy::FileMirror {
        mode: CopyMode::External,
    }
}

pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 253) as u8).collect()
}

pub fn write_tree(root: &Path, files: &[(&str, &str)]) {
    for (path, contents) in files {
        let path = root.join(path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent");
        }
        std::fs::write(path, contents).expect("write file");
    }
}

pub fn failed_step(job: &BackupJob) -> Option<JobStep> {
    match &job.outcome {
        Some(JobOutcome::Failed { step, .. }) => Some(*step),
        _ => None,
    }
}

// SPDX-License-Identifier: GPL-3.0-only

//! Bulk-copy tool that returns a scripted exit code

use std::io;
use std::path::PathBuf;

use backup_contracts::{BulkCopyTool, CopyExit, MirrorRequest};

use crate::Shared;

/// What a mirror request asked for, owned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub log_file: PathBuf,
    pub threads: u32,
    pub retries: u32,
    pub wait_secs: u32,
}

#[derive(Debug)]
pub struct FakeCopyTool {
    requests: Shared<Vec<RecordedRequest>>,
    exit_code: Option<i32>,
    fatal_threshold: i32,
}

impl FakeCopyTool {
    /// Exits with `exit_code`; codes at or above 8 are fatal
    pub fn exiting(exit_code: i32) -> Self {
        Self {
            requests: Shared::new(Vec::new()),
            exit_code: Some(exit_code),
            fatal_threshold: 8,
        }
    }

    /// The tool cannot be started at all
    pub fn missing() -> Self {
        Self {
            exit_code: None,
            ..Self::exiting(0)
        }
    }

    pub fn handle(&self) -> CopyToolHandle {
        CopyToolHandle(self.requests.clone())
    }
}

impl BulkCopyTool for FakeCopyTool {
    fn name(&self) -> &str {
        "fakecopy"
    }

    fn mirror(&self, request: &MirrorRequest<'_>) -> io::Result<i32> {
        self.requests.lock().push(RecordedRequest {
            source: request.source.to_path_buf(),
            destination: request.destination.to_path_buf(),
            log_file: request.log_file.clone(),
            threads: request.threads,
            retries: request.retries,
            wait_secs: request.wait_secs,
        });
        self.exit_code
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "fakecopy: not found"))
    }

    fn classify(&self, exit_code: i32) -> CopyExit {
        match exit_code {
            0 => CopyExit::Success,
            code if code >= self.fatal_threshold || code < 0 => CopyExit::Fatal(code),
            code => CopyExit::Informational(code),
        }
    }
}

/// Inspection side of a [`FakeCopyTool`]
#[derive(Debug, Clone)]
pub struct CopyToolHandle(Shared<Vec<RecordedRequest>>);

impl CopyToolHandle {
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.0.lock().clone()
    }
}

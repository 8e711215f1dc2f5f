// SPDX-License-Identifier: GPL-3.0-only

use std::io;
use std::path::{Path, PathBuf};

/// Parameters of one mirror run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorRequest<'a> {
    pub source: &'a Path,
    pub destination: &'a Path,
    pub log_file: PathBuf,
    pub threads: u32,
    pub retries: u32,
    pub wait_secs: u32,
}

/// How a tool's exit code is to be read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyExit {
    Success,
    /// Non-zero but not a failure (e.g. robocopy 1..=7)
    Informational(i32),
    Fatal(i32),
}

impl CopyExit {
    pub fn is_fatal(self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

/// External bulk-copy utility configured for mirror semantics
///
/// The exit code is the only signal the engine consumes.
pub trait BulkCopyTool: Send {
    fn name(&self) -> &str;

    /// File name of the tool's log under the destination root
    fn log_file_name(&self) -> String {
        format!("{}_log.txt", self.name())
    }

    fn mirror(&self, request: &MirrorRequest<'_>) -> io::Result<i32>;

    fn classify(&self, exit_code: i32) -> CopyExit;
}

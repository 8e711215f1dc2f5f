// SPDX-License-Identifier: GPL-3.0-only

//! External bulk-copy tools driven in mirror mode

use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use backup_contracts::{BulkCopyTool, CopyExit, MirrorRequest};
use backup_types::{CopyTool, MirrorConfig};
use tracing::{debug, info};

use crate::cmd;
use crate::error::{Result, SysError};

/// rsync: some source files vanished before they could be transferred
const RSYNC_PARTIAL_VANISHED: i32 = 24;

fn locate(binary: &str) -> Result<PathBuf> {
    which::which(binary).map_err(|_| SysError::ToolNotFound(binary.to_string()))
}

/// Run a tool to completion and hand back its raw exit code
///
/// Tool output goes to its own log file, so stdout/stderr are discarded.
fn run_for_exit_code(binary: &Path, args: &[String]) -> io::Result<i32> {
    let rendered = cmd::render(&binary.to_string_lossy(), args);
    info!(command = %rendered, "starting bulk copy");

    let status = Command::new(binary)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()?;

    // A signal-terminated tool has no exit code; treat it as the worst case.
    let code = status.code().unwrap_or(-1);
    debug!(command = %rendered, code, "bulk copy exited");
    Ok(code)
}

fn path_with_trailing_slash(path: &Path) -> String {
    let mut rendered = path.to_string_lossy().into_owned();
    if !rendered.ends_with('/') {
        rendered.push('/');
    }
    rendered
}

#[derive(Debug, Clone)]
pub struct RobocopyCli {
    binary: PathBuf,
    fatal_exit_threshold: i32,
}

impl RobocopyCli {
    pub fn new(fatal_exit_threshold: i32) -> Result<Self> {
        Ok(Self {
            binary: locate("robocopy")?,
            fatal_exit_threshold,
        })
    }

    pub fn args(request: &MirrorRequest<'_>) -> Vec<String> {
        vec![
            request.source.to_string_lossy().into_owned(),
            request.destination.to_string_lossy().into_owned(),
            "/MIR".to_string(),
            "/B".to_string(),
            format!("/R:{}", request.retries),
            format!("/W:{}", request.wait_secs),
            "/XA:SH".to_string(),
            "/COPY:DATSOU".to_string(),
            "/DCOPY:DAT".to_string(),
            format!("/MT:{}", request.threads),
            format!("/LOG:{}", request.log_file.to_string_lossy()),
        ]
    }

    fn classify_with(threshold: i32, exit_code: i32) -> CopyExit {
        match exit_code {
            0 => CopyExit::Success,
            code if code < 0 || code >= threshold => CopyExit::Fatal(code),
            code => CopyExit::Informational(code),
        }
    }
}

impl BulkCopyTool for RobocopyCli {
    fn name(&self) -> &str {
        "robocopy"
    }

    fn mirror(&self, request: &MirrorRequest<'_>) -> io::Result<i32> {
        run_for_exit_code(&self.binary, &Self::args(request))
    }

    fn classify(&self, exit_code: i32) -> CopyExit {
        Self::classify_with(self.fatal_exit_threshold, exit_code)
    }
}

#[derive(Debug, Clone)]
pub struct RsyncCli {
    binary: PathBuf,
}

impl RsyncCli {
    pub fn new() -> Result<Self> {
        Ok(Self {
            binary: locate("rsync")?,
        })
    }

    pub fn args(request: &MirrorRequest<'_>) -> Vec<String> {
        vec![
            "-aHAX".to_string(),
            "--delete".to_string(),
            "--numeric-ids".to_string(),
            format!("--log-file={}", request.log_file.to_string_lossy()),
            path_with_trailing_slash(request.source),
            path_with_trailing_slash(request.destination),
        ]
    }

    fn classify_code(exit_code: i32) -> CopyExit {
        match exit_code {
            0 => CopyExit::Success,
            RSYNC_PARTIAL_VANISHED => CopyExit::Informational(exit_code),
            code => CopyExit::Fatal(code),
        }
    }
}

impl BulkCopyTool for RsyncCli {
    fn name(&self) -> &str {
        "rsync"
    }

    fn mirror(&self, request: &MirrorRequest<'_>) -> io::Result<i32> {
        run_for_exit_code(&self.binary, &Self::args(request))
    }

    fn classify(&self, exit_code: i32) -> CopyExit {
        Self::classify_code(exit_code)
    }
}

/// Build the configured tool, failing early when its binary is missing
pub fn bulk_copy_tool(config: &MirrorConfig) -> Result<Box<dyn BulkCopyTool>> {
    match config.tool {
        CopyTool::Robocopy => Ok(Box::new(RobocopyCli::new(config.fatal_exit_threshold)?)),
        CopyTool::Rsync => Ok(Box::new(RsyncCli::new()?)),
    }
}

// SPDX-License-Identifier: GPL-3.0-only

//! Thin wrapper around `std::process::Command` for the helper tools

use std::process::{Child, Command, Stdio};

use tracing::debug;

use crate::error::{Result, SysError};

#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub command: String,
    pub stdout: String,
    pub stderr: String,
}

pub fn render(command: &str, args: &[String]) -> String {
    if args.is_empty() {
        command.to_string()
    } else {
        format!("{} {}", command, args.join(" "))
    }
}

/// Run to completion; a non-zero exit is an error carrying stderr
pub fn run(command: &str, args: &[String]) -> Result<CommandOutcome> {
    let rendered = render(command, args);
    debug!(command = %rendered, "running");

    let output = Command::new(command)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(|error| SysError::CommandFailed {
            command: rendered.clone(),
            code: None,
            stderr: error.to_string(),
        })?;

    if !output.status.success() {
        return Err(SysError::CommandFailed {
            command: rendered,
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(CommandOutcome {
        command: rendered,
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

/// Start without waiting, output captured for later inspection
pub fn spawn(command: &str, args: &[String]) -> Result<Child> {
    let rendered = render(command, args);
    debug!(command = %rendered, "spawning");

    Command::new(command)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|error| SysError::CommandFailed {
            command: rendered,
            code: None,
            stderr: error.to_string(),
        })
}

pub fn args<I, S>(values: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    values.into_iter().map(Into::into).collect()
}

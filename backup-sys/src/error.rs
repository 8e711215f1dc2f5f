// SPDX-License-Identifier: GPL-3.0-only

use std::io;

use thiserror::Error;

/// Error types for system-level operations
#[derive(Error, Debug)]
pub enum SysError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("{0} not found on PATH")]
    ToolNotFound(String),

    #[error("command failed: {command}; stderr: {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<SysError> for io::Error {
    fn from(err: SysError) -> Self {
        match err {
            SysError::Io(inner) => inner,
            SysError::PermissionDenied(msg) => io::Error::new(io::ErrorKind::PermissionDenied, msg),
            SysError::DeviceNotFound(msg) => io::Error::new(io::ErrorKind::NotFound, msg),
            other => io::Error::other(other.to_string()),
        }
    }
}

/// Result type alias for system operations
pub type Result<T> = std::result::Result<T, SysError>;

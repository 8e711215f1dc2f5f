// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Status reported by the snapshot provider for a failed call
///
/// Codes follow the HRESULT convention so Windows provider codes pass through
/// untouched; command-backed providers put the process exit code here.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("0x{code:08x}: {message}")]
pub struct ProviderStatus {
    pub code: u32,
    pub message: String,
}

impl ProviderStatus {
    /// Wait deadline expired (HRESULT_FROM_WIN32(ERROR_TIMEOUT))
    pub const TIMEOUT: u32 = 0x8007_05B4;
    /// Call made in the wrong lifecycle state (VSS_E_BAD_STATE)
    pub const BAD_STATE: u32 = 0x8004_2301;
    /// Unknown volume or snapshot (VSS_E_OBJECT_NOT_FOUND)
    pub const NOT_FOUND: u32 = 0x8004_2308;
    /// Anything else (E_UNEXPECTED)
    pub const UNEXPECTED: u32 = 0x8000_FFFF;

    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(Self::TIMEOUT, message)
    }

    pub fn bad_state(message: impl Into<String>) -> Self {
        Self::new(Self::BAD_STATE, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(Self::NOT_FOUND, message)
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::new(Self::UNEXPECTED, message)
    }

    /// Status for a helper process that exited unsuccessfully
    pub fn from_exit_code(code: Option<i32>, message: impl Into<String>) -> Self {
        match code {
            Some(code) => Self::new(code as u32, message),
            None => Self::unexpected(message),
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.code == Self::TIMEOUT
    }
}

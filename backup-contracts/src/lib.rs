// SPDX-License-Identifier: GPL-3.0-only

//! Contracts between the backup engine and the world outside it
//!
//! Everything the engine does not own is reached through one of these traits:
//! the OS snapshot provider, the mount mapping facility, raw device access,
//! the external bulk-copy tool and the privilege check. `backup-sys` provides
//! the Linux implementations, `backup-testing` the in-memory ones.

pub mod copy;
pub mod device;
pub mod mount;
pub mod privilege;
pub mod provider;
pub mod status;

pub use copy::{BulkCopyTool, CopyExit, MirrorRequest};
pub use device::{DeviceAccess, PhysicalDrive, RawDevice};
pub use mount::MountMapper;
pub use privilege::PrivilegeCheck;
pub use provider::{AsyncOperation, CompletedOperation, SnapshotProvider};
pub use status::ProviderStatus;

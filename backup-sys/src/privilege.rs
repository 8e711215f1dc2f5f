// SPDX-License-Identifier: GPL-3.0-only

use backup_contracts::PrivilegeCheck;

/// Elevated means effective uid 0
#[derive(Debug, Clone, Copy, Default)]
pub struct RootPrivilege;

impl PrivilegeCheck for RootPrivilege {
    fn is_elevated(&self) -> bool {
        unsafe { libc::geteuid() == 0 }
    }
}

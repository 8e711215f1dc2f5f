// SPDX-License-Identifier: GPL-3.0-only

/// Gate run before any resource is acquired
pub trait PrivilegeCheck: Send {
    fn is_elevated(&self) -> bool;
}

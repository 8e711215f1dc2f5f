// SPDX-License-Identifier: GPL-3.0-only

use backup_contracts::PrivilegeCheck;

#[derive(Debug, Clone, Copy)]
pub struct FakePrivilege(pub bool);

impl FakePrivilege {
    pub fn elevated() -> Self {
        Self(true)
    }

    pub fn unprivileged() -> Self {
        Self(false)
    }
}

impl PrivilegeCheck for FakePrivilege {
    fn is_elevated(&self) -> bool {
        self.0
    }
}

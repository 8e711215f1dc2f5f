// SPDX-License-Identifier: GPL-3.0-only

//! Mount slot model
//!
//! A slot is the Linux stand-in for a drive letter: a directory named after a
//! letter under a common mount root (`/run/snapshot-backup/mnt/d`, `.../e`, ...).

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// An addressable mount point through which a snapshot device is traversed
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MountSlot {
    pub letter: char,
    pub path: PathBuf,
}

impl MountSlot {
    pub fn new(letter: char, path: impl Into<PathBuf>) -> Self {
        Self {
            letter,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Display for MountSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ({})", self.letter.to_ascii_uppercase(), self.path.display())
    }
}

/// All slots under `root` in ascending letter order, skipping `reserved`
pub fn slot_candidates(root: &Path, reserved: &[char]) -> Vec<MountSlot> {
    ('a'..='z')
        .filter(|letter| {
            !reserved
                .iter()
                .any(|r| r.eq_ignore_ascii_case(letter))
        })
        .map(|letter| MountSlot::new(letter, root.join(letter.to_string())))
        .collect()
}

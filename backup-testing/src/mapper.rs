// SPDX-License-Identifier: GPL-3.0-only

//! Mount mapper backed by symlinks
//!
//! Mapping a device reference that has a backing directory links the slot
//! path to that directory, so path-based copies see real files. Other device
//! references only get an empty directory.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use backup_contracts::MountMapper;
use backup_types::MountSlot;

use crate::Shared;

#[derive(Debug, Default)]
struct MapperState {
    occupied: BTreeSet<PathBuf>,
    active: BTreeSet<PathBuf>,
    maps: Vec<(String, MountSlot)>,
    unmaps: Vec<MountSlot>,
    fail_map: bool,
    fail_unmap: bool,
}

#[derive(Debug, Default)]
pub struct FakeMapper {
    state: Shared<MapperState>,
    backing: HashMap<String, PathBuf>,
}

impl FakeMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> MapperHandle {
        MapperHandle(self.state.clone())
    }

    /// Show `dir` at the slot whenever `device_reference` is mapped
    pub fn with_backing(mut self, device_reference: &str, dir: impl Into<PathBuf>) -> Self {
        self.backing.insert(device_reference.to_string(), dir.into());
        self
    }

    /// Pretend something else is mounted at `path`
    pub fn occupied(self, path: impl Into<PathBuf>) -> Self {
        self.state.lock().occupied.insert(path.into());
        self
    }

    pub fn failing_map(self) -> Self {
        self.state.lock().fail_map = true;
        self
    }

    pub fn failing_unmap(self) -> Self {
        self.state.lock().fail_unmap = true;
        self
    }
}

impl MountMapper for FakeMapper {
    fn mounted_paths(&self) -> io::Result<BTreeSet<PathBuf>> {
        let state = self.state.lock();
        Ok(state.occupied.union(&state.active).cloned().collect())
    }

    fn map(&mut self, device_reference: &str, slot: &MountSlot) -> io::Result<()> {
        let mut state = self.state.lock();
        if state.fail_map {
            return Err(io::Error::other("mount refused"));
        }

        if let Some(parent) = slot.path().parent() {
            fs::create_dir_all(parent)?;
        }
        match self.backing.get(device_reference) {
            Some(dir) => symlink(dir, slot.path())?,
            None => fs::create_dir_all(slot.path())?,
        }

        state.active.insert(slot.path.clone());
        state.maps.push((device_reference.to_string(), slot.clone()));
        Ok(())
    }

    fn unmap(&mut self, slot: &MountSlot) -> io::Result<()> {
        let mut state = self.state.lock();
        state.unmaps.push(slot.clone());
        if state.fail_unmap {
            return Err(io::Error::other("target is busy"));
        }

        remove_slot(slot.path())?;
        state.active.remove(slot.path());
        Ok(())
    }
}

fn remove_slot(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(metadata) if metadata.file_type().is_symlink() => fs::remove_file(path),
        Ok(_) => fs::remove_dir(path),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(error) => Err(error),
    }
}

/// Inspection side of a [`FakeMapper`]
#[derive(Debug, Clone)]
pub struct MapperHandle(Shared<MapperState>);

impl MapperHandle {
    pub fn maps(&self) -> Vec<(String, MountSlot)> {
        self.0.lock().maps.clone()
    }

    pub fn unmaps(&self) -> Vec<MountSlot> {
        self.0.lock().unmaps.clone()
    }

    /// Paths mapped and not yet unmapped
    pub fn active(&self) -> BTreeSet<PathBuf> {
        self.0.lock().active.clone()
    }
}

// SPDX-License-Identifier: GPL-3.0-only

//! Exposes a snapshot device under a mount slot for path-based tools

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use backup_contracts::MountMapper;
use backup_types::{MountConfig, MountSlot, slot_candidates};
use tracing::{info, warn};

use crate::error::MountingError;

/// Hands out at most one mount at a time from an ordered slot list
pub struct VolumeMount<'m> {
    mapper: &'m mut dyn MountMapper,
    candidates: Vec<MountSlot>,
    root: PathBuf,
    active: Option<MountSlot>,
}

impl<'m> VolumeMount<'m> {
    pub fn new(mapper: &'m mut dyn MountMapper, config: &MountConfig) -> Self {
        Self {
            mapper,
            candidates: slot_candidates(&config.root, &config.reserved_letters()),
            root: config.root.clone(),
            active: None,
        }
    }

    /// First candidate slot nobody has mounted on
    pub fn free_slot(&self) -> Result<MountSlot, MountingError> {
        let mounted = self.mapper.mounted_paths().map_err(MountingError::Scan)?;
        self.candidates
            .iter()
            .find(|slot| !mounted.contains(slot.path()))
            .cloned()
            .ok_or_else(|| MountingError::NoFreeSlot {
                root: self.root.clone(),
            })
    }

    /// Map `device_reference` at the first free slot
    ///
    /// The guard borrows the device reference, so it cannot outlive the
    /// snapshot that owns it.
    pub fn acquire<'a>(
        &'a mut self,
        device_reference: &'a str,
    ) -> Result<MountGuard<'a, 'm>, MountingError> {
        assert!(
            self.active.is_none(),
            "mount slot {:?} acquired twice without release",
            self.active
        );

        let slot = self.free_slot()?;
        self.mapper
            .map(device_reference, &slot)
            .map_err(|source| MountingError::Map {
                device: device_reference.to_string(),
                slot: slot.clone(),
                source,
            })?;
        info!(device = device_reference, %slot, "snapshot mounted");

        match root_is_empty(slot.path()) {
            Ok(false) => {}
            Ok(true) => warn!(%slot, "mounted snapshot root is empty"),
            Err(error) => warn!(%slot, %error, "could not list mounted snapshot root"),
        }

        self.active = Some(slot.clone());
        Ok(MountGuard {
            owner: self,
            slot,
            device_reference,
            released: false,
        })
    }
}

fn root_is_empty(path: &Path) -> io::Result<bool> {
    Ok(fs::read_dir(path)?.next().is_none())
}

/// A live mapping; unmapped exactly once by `release` or on drop
pub struct MountGuard<'a, 'm> {
    owner: &'a mut VolumeMount<'m>,
    slot: MountSlot,
    device_reference: &'a str,
    released: bool,
}

impl MountGuard<'_, '_> {
    pub fn slot(&self) -> &MountSlot {
        &self.slot
    }

    pub fn path(&self) -> &Path {
        self.slot.path()
    }

    pub fn device_reference(&self) -> &str {
        self.device_reference
    }

    pub fn release(mut self) -> io::Result<()> {
        self.unmap()
    }

    fn unmap(&mut self) -> io::Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.owner.active = None;

        self.owner.mapper.unmap(&self.slot)?;
        info!(slot = %self.slot, "snapshot unmounted");
        Ok(())
    }
}

impl Drop for MountGuard<'_, '_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        warn!(slot = %self.slot, "mount dropped without release, unmapping");
        if let Err(error) = self.unmap() {
            warn!(slot = %self.slot, %error, "unmap on drop failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    #[derive(Default)]
    struct Table {
        mounted: BTreeSet<PathBuf>,
        unmapped: Vec<MountSlot>,
    }

    impl MountMapper for Table {
        fn mounted_paths(&self) -> io::Result<BTreeSet<PathBuf>> {
            Ok(self.mounted.clone())
        }

        fn map(&mut self, _device_reference: &str, slot: &MountSlot) -> io::Result<()> {
            self.mounted.insert(slot.path.clone());
            Ok(())
        }

        fn unmap(&mut self, slot: &MountSlot) -> io::Result<()> {
            self.mounted.remove(slot.path());
            self.unmapped.push(slot.clone());
            Ok(())
        }
    }

    fn config(root: &str) -> MountConfig {
        MountConfig {
            root: PathBuf::from(root),
            ..MountConfig::default()
        }
    }

    #[test]
    fn picks_first_slot_after_reserved_letters() {
        let mut table = Table::default();
        table.mounted.insert(PathBuf::from("/mnt/snap/d"));
        let config = config("/mnt/snap");

        {
            let mut mounts = VolumeMount::new(&mut table, &config);
            let guard = mounts.acquire("/dev/vg0/root-snap").expect("acquire");
            assert_eq!(guard.slot().letter, 'e');
            guard.release().expect("release");
        }

        assert_eq!(table.unmapped.len(), 1);
        assert!(!table.mounted.contains(Path::new("/mnt/snap/e")));
    }

    #[test]
    fn dropped_guard_unmaps_once() {
        let mut table = Table::default();
        let config = config("/mnt/snap");
        {
            let mut mounts = VolumeMount::new(&mut table, &config);
            let _guard = mounts.acquire("/dev/vg0/root-snap").expect("acquire");
        }
        assert_eq!(table.unmapped.len(), 1);
        assert_eq!(table.unmapped[0].letter, 'd');
    }

    #[test]
    fn leftover_empty_slot_directory_is_reused() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir(dir.path().join("d")).expect("leftover slot");
        let mut table = Table::default();
        let config = MountConfig {
            root: dir.path().to_path_buf(),
            ..MountConfig::default()
        };

        let mounts = VolumeMount::new(&mut table, &config);
        let slot = mounts.free_slot().expect("free slot");
        assert_eq!(slot.letter, 'd');
    }

    #[test]
    fn exhausted_slots_are_a_mounting_error() {
        let mut table = Table::default();
        for letter in 'd'..='z' {
            table.mounted.insert(PathBuf::from(format!("/mnt/snap/{letter}")));
        }
        let config = config("/mnt/snap");
        let mut mounts = VolumeMount::new(&mut table, &config);

        let error = mounts.acquire("/dev/vg0/root-snap").err().expect("no slot");
        assert!(matches!(error, MountingError::NoFreeSlot { .. }));
    }
}

// SPDX-License-Identifier: GPL-3.0-only

//! Disk metadata capture model
//!
//! The boot record and partition layout are captured from the live physical
//! drive, not from the snapshot. Both artifacts are opaque bytes exactly as the
//! read / layout query returned them.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Fixed boot-sector capture window
pub const BOOT_SECTOR_CAPTURE_BYTES: usize = 4096;

/// Upper bound on partition entries the layout buffer can hold
pub const MAX_LAYOUT_PARTITIONS: usize = 128;

/// Fixed overhead ahead of the partition entries (one GPT header sector)
pub const LAYOUT_HEADER_BYTES: usize = 512;

/// Size reserved per partition entry (GPT default entry size)
pub const LAYOUT_ENTRY_BYTES: usize = 128;

pub const BOOT_RECORD_FILE_NAME: &str = "boot_record.bin";
pub const DRIVE_LAYOUT_FILE_NAME: &str = "drive_layout.bin";

/// Capacity of the buffer handed to the drive layout query
pub const fn layout_buffer_capacity() -> usize {
    LAYOUT_HEADER_BYTES + MAX_LAYOUT_PARTITIONS * LAYOUT_ENTRY_BYTES
}

/// Boot record and layout bytes of one physical drive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskMetadataRecord {
    pub drive_index: u32,

    /// Device the bytes were read from (e.g. "/dev/sda")
    pub device: PathBuf,

    #[serde(skip)]
    pub boot_sector: Vec<u8>,

    /// Layout buffer truncated to the size the query reported
    #[serde(skip)]
    pub layout: Vec<u8>,
}

impl DiskMetadataRecord {
    pub fn boot_record_path(destination: &Path) -> PathBuf {
        destination.join(BOOT_RECORD_FILE_NAME)
    }

    pub fn drive_layout_path(destination: &Path) -> PathBuf {
        destination.join(DRIVE_LAYOUT_FILE_NAME)
    }
}

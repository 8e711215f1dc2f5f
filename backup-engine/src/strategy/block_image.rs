// SPDX-License-Identifier: GPL-3.0-only

//! Raw block image of a snapshot device

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use backup_contracts::{DeviceAccess, RawDevice};
use tracing::{info, warn};

use crate::error::CopyError;
use crate::progress::{ChunkProgress, format_bytes};

/// An opened snapshot device whose length is known
pub struct BlockImageSource {
    device: Box<dyn RawDevice>,
    device_reference: String,
    length: u64,
    offset: u64,
}

impl BlockImageSource {
    /// Open the device and query its length; nothing is written yet
    pub fn open(devices: &dyn DeviceAccess, device_reference: &str) -> Result<Self, CopyError> {
        let mut device =
            devices
                .open_snapshot_device(device_reference)
                .map_err(|source| CopyError::OpenDevice {
                    device: device_reference.to_string(),
                    source,
                })?;
        let length = device.length().map_err(|source| CopyError::LengthQuery {
            device: device_reference.to_string(),
            source,
        })?;
        info!(device = device_reference, length, size = %format_bytes(length), "snapshot device opened");

        Ok(Self {
            device,
            device_reference: device_reference.to_string(),
            length,
            offset: 0,
        })
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Copy the whole device into `image_path` in `chunk_size` pieces
    ///
    /// The image is only kept when its final size equals the queried length;
    /// on any failure after it was created the file is removed.
    pub fn copy_to(
        mut self,
        image_path: &Path,
        chunk_size: usize,
        progress_every_chunks: u64,
        bytes_copied: &mut u64,
    ) -> Result<u64, CopyError> {
        if chunk_size == 0 {
            return Err(CopyError::ZeroChunkSize);
        }

        let mut image = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(image_path)
            .map_err(|source| CopyError::ImageCreate {
                path: image_path.to_path_buf(),
                source,
            })?;

        let result = self
            .copy_chunks(&mut image, chunk_size, progress_every_chunks, bytes_copied)
            .and_then(|()| finish_image(image, image_path, self.length));

        match result {
            Ok(()) => {
                info!(
                    device = %self.device_reference,
                    image = %image_path.display(),
                    bytes = self.offset,
                    "block image complete"
                );
                Ok(self.offset)
            }
            Err(error) => {
                warn!(image = %image_path.display(), %error, "removing incomplete image");
                if let Err(remove_error) = fs::remove_file(image_path) {
                    warn!(image = %image_path.display(), error = %remove_error, "failed to remove incomplete image");
                }
                Err(error)
            }
        }
    }

    fn copy_chunks(
        &mut self,
        image: &mut File,
        chunk_size: usize,
        progress_every_chunks: u64,
        bytes_copied: &mut u64,
    ) -> Result<(), CopyError> {
        let mut buffer = vec![0u8; chunk_size];
        let mut progress = ChunkProgress::new(self.length, progress_every_chunks);

        while self.offset < self.length {
            let want = (self.length - self.offset).min(chunk_size as u64) as usize;
            let chunk = &mut buffer[..want];
            fill_chunk(self.device.as_mut(), chunk, self.offset, self.length)?;

            image
                .write_all(chunk)
                .map_err(|source| CopyError::ImageWrite {
                    offset: self.offset,
                    source,
                })?;

            self.offset += want as u64;
            *bytes_copied = self.offset;
            progress.chunk_done(self.offset);
        }

        Ok(())
    }
}

/// Read until `chunk` is full; EOF before that is a short read
fn fill_chunk(
    device: &mut dyn RawDevice,
    chunk: &mut [u8],
    offset: u64,
    length: u64,
) -> Result<(), CopyError> {
    let mut filled = 0;
    while filled < chunk.len() {
        match device.read(&mut chunk[filled..]) {
            Ok(0) => {
                return Err(CopyError::ShortRead {
                    offset: offset + filled as u64,
                    expected: length,
                });
            }
            Ok(read) => filled += read,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            Err(source) => {
                return Err(CopyError::BlockRead {
                    offset: offset + filled as u64,
                    source,
                });
            }
        }
    }
    Ok(())
}

fn finish_image(image: File, image_path: &Path, expected: u64) -> Result<(), CopyError> {
    image.sync_all().map_err(|source| CopyError::ImageWrite {
        offset: expected,
        source,
    })?;
    drop(image);

    let actual = fs::metadata(image_path)
        .map_err(|source| CopyError::ImageWrite {
            offset: expected,
            source,
        })?
        .len();
    if actual != expected {
        return Err(CopyError::SizeMismatch { expected, actual });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Read};
    use std::path::PathBuf;

    use backup_contracts::PhysicalDrive;

    use super::*;

    struct Bytes {
        data: Cursor<Vec<u8>>,
        reported: u64,
    }

    impl Read for Bytes {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            // Never hand out more than 1000 bytes at once.
            let limit = buf.len().min(1000);
            self.data.read(&mut buf[..limit])
        }
    }

    impl RawDevice for Bytes {
        fn length(&mut self) -> io::Result<u64> {
            Ok(self.reported)
        }
    }

    struct OneDevice(Vec<u8>, u64);

    impl DeviceAccess for OneDevice {
        fn open_snapshot_device(&self, _device_reference: &str) -> io::Result<Box<dyn RawDevice>> {
            Ok(Box::new(Bytes {
                data: Cursor::new(self.0.clone()),
                reported: self.1,
            }))
        }

        fn open_physical_drive(
            &self,
            _index: u32,
        ) -> io::Result<(PathBuf, Box<dyn PhysicalDrive>)> {
            Err(io::Error::from(io::ErrorKind::Unsupported))
        }
    }

    #[test]
    fn partial_reads_still_fill_each_chunk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let image = dir.path().join("system_image.bin");
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let devices = OneDevice(data.clone(), data.len() as u64);

        let source = BlockImageSource::open(&devices, "/dev/vg0/snap").expect("open");
        let mut copied = 0;
        let written = source.copy_to(&image, 4096, 1, &mut copied).expect("copy");

        assert_eq!(written, 10_000);
        assert_eq!(copied, 10_000);
        assert_eq!(fs::read(&image).expect("read image"), data);
    }

    #[test]
    fn early_end_of_device_removes_image() {
        let dir = tempfile::tempdir().expect("tempdir");
        let image = dir.path().join("system_image.bin");
        let devices = OneDevice(vec![7u8; 6000], 8192);

        let source = BlockImageSource::open(&devices, "/dev/vg0/snap").expect("open");
        let mut copied = 0;
        let error = source.copy_to(&image, 4096, 1, &mut copied).unwrap_err();

        assert!(matches!(
            error,
            CopyError::ShortRead {
                offset: 6000,
                expected: 8192
            }
        ));
        assert_eq!(copied, 4096);
        assert!(!image.exists());
    }

    #[test]
    fn zero_chunk_size_is_refused_before_the_image_exists() {
        let dir = tempfile::tempdir().expect("tempdir");
        let image = dir.path().join("system_image.bin");
        let devices = OneDevice(vec![1u8; 4096], 4096);

        let source = BlockImageSource::open(&devices, "/dev/vg0/snap").expect("open");
        let mut copied = 0;
        let error = source.copy_to(&image, 0, 1, &mut copied).unwrap_err();

        assert!(matches!(error, CopyError::ZeroChunkSize));
        assert_eq!(copied, 0);
        assert!(!image.exists());
    }
}

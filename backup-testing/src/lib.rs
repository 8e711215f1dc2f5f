// SPDX-License-Identifier: GPL-3.0-only

//! In-memory collaborators for engine tests
//!
//! Each fake hands out a cloneable handle sharing its state, so a test can
//! give the fake to an orchestrator and still inspect what happened to it.

pub mod copy_tool;
pub mod devices;
pub mod mapper;
pub mod privilege;
pub mod provider;

pub use copy_tool::{CopyToolHandle, FakeCopyTool, RecordedRequest};
pub use devices::{DeviceFault, FakeDevices, MemoryDevice, MemoryDrive};
pub use mapper::{FakeMapper, MapperHandle};
pub use privilege::FakePrivilege;
pub use provider::{FakeProvider, ProviderCall, ProviderHandle};

use std::sync::{Arc, Mutex, MutexGuard};

/// Shared state behind a fake and its handle
#[derive(Debug, Default)]
pub(crate) struct Shared<T>(Arc<Mutex<T>>);

impl<T> Shared<T> {
    pub(crate) fn new(value: T) -> Self {
        Self(Arc::new(Mutex::new(value)))
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, T> {
        // A panicking test thread poisons the lock; the data is still usable.
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

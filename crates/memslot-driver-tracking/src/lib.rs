//! Memory slot driver that tracks installed mappings.
//!
//! The driver does not talk to a hypervisor. It records every mapping it
//! is asked to install and rejects the requests a hypervisor would reject:
//! mapping over an installed guest or host range, and unmapping something
//! that is not installed. Useful for tests, demos and dry runs.

mod driver;
mod error;

use memslot_core::{Gpa, MemslotDriver, MemslotError, Slot};

pub use self::{driver::TrackedMapping, error::Error};
use self::driver::TrackingDriver;

/// Memory slot driver that tracks installed mappings.
pub struct MemslotTrackingDriver {
    inner: TrackingDriver,
}

impl MemslotTrackingDriver {
    /// Creates a new tracking driver with no mappings installed.
    pub fn new() -> Self {
        Self {
            inner: TrackingDriver::new(),
        }
    }

    /// Returns the installed mappings, in installation order.
    pub fn mappings(&self) -> Vec<TrackedMapping> {
        self.inner.mappings()
    }

    /// Checks if a mapping starting at `gpa` is installed.
    pub fn is_mapped(&self, gpa: Gpa) -> bool {
        self.inner.is_mapped(gpa)
    }

    /// Returns the number of map requests, including rejected ones.
    pub fn map_calls(&self) -> usize {
        self.inner.map_calls()
    }

    /// Returns the number of unmap requests, including rejected ones.
    pub fn unmap_calls(&self) -> usize {
        self.inner.unmap_calls()
    }

    /// Installs `slot` without going through a slot table.
    pub fn try_map(&self, slot: &Slot) -> Result<(), Error> {
        self.inner.map(slot)
    }

    /// Removes `slot` without going through a slot table.
    pub fn try_unmap(&self, slot: &Slot) -> Result<(), Error> {
        self.inner.unmap(slot)
    }
}

impl Default for MemslotTrackingDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MemslotDriver for MemslotTrackingDriver {
    fn map(&self, slot: &Slot) -> Result<(), MemslotError> {
        Ok(self.inner.map(slot)?)
    }

    fn unmap(&self, slot: &Slot) -> Result<(), MemslotError> {
        Ok(self.inner.unmap(slot)?)
    }
}

#[cfg(test)]
#[path = "driver_tests.rs"]
mod tests;

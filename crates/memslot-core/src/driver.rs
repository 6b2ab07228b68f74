use std::sync::Arc;

use crate::{MemslotError, Slot};

/// A trait for implementing a memory slot driver.
///
/// The driver is the narrow interface to the hypervisor that actually
/// installs and removes guest memory mappings. It is only ever invoked
/// while the slot table's writer lock is held, so implementations never
/// see concurrent or conflicting requests for overlapping regions.
///
/// Neither operation is idempotent. Mapping an already mapped slot, or
/// unmapping a slot that is not mapped, is a caller bug that drivers are
/// not required to detect.
pub trait MemslotDriver {
    /// Installs the mapping described by `slot`.
    ///
    /// The mapping covers `memory_size` bytes starting at
    /// `guest_phys_addr` in the guest, backed by host memory at
    /// `userspace_addr`. It must be read-only if `slot.readonly()` is set.
    fn map(&self, slot: &Slot) -> Result<(), MemslotError>;

    /// Removes the mapping described by `slot`.
    fn unmap(&self, slot: &Slot) -> Result<(), MemslotError>;
}

impl<T> MemslotDriver for &T
where
    T: MemslotDriver + ?Sized,
{
    fn map(&self, slot: &Slot) -> Result<(), MemslotError> {
        (**self).map(slot)
    }

    fn unmap(&self, slot: &Slot) -> Result<(), MemslotError> {
        (**self).unmap(slot)
    }
}

impl<T> MemslotDriver for Box<T>
where
    T: MemslotDriver + ?Sized,
{
    fn map(&self, slot: &Slot) -> Result<(), MemslotError> {
        (**self).map(slot)
    }

    fn unmap(&self, slot: &Slot) -> Result<(), MemslotError> {
        (**self).unmap(slot)
    }
}

impl<T> MemslotDriver for Arc<T>
where
    T: MemslotDriver + ?Sized,
{
    fn map(&self, slot: &Slot) -> Result<(), MemslotError> {
        (**self).map(slot)
    }

    fn unmap(&self, slot: &Slot) -> Result<(), MemslotError> {
        (**self).unmap(slot)
    }
}

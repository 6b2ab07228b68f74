//! Core memory slot functionality.
//!
//! A [`SlotTable`] tracks the guest memory slots of one virtual machine: the
//! guest physical ranges (GPA) and the host virtual memory (HVA) backing
//! them. A [`MemslotDriver`] installs and removes those mappings with the
//! hypervisor. [`MemslotCore`] ties the two together and resolves faults on
//! slots whose host memory overlaps another installed slot (see
//! [`MemslotCore::remap_overlap_region`]).
//!
//! # Concurrency
//!
//! Lookups run on a lock-free [`Snapshot`] and never block, so they can be
//! issued from every vCPU thread at once. Mutations and driver calls are
//! serialized by the table's writer lock.
//!
//! # Driver failures are fatal
//!
//! If the driver fails to map or unmap a slot, the process is aborted.
//! Once the hypervisor has rejected a mapping change its view of guest
//! memory is unknown, and continuing would risk silent guest memory
//! corruption. This is intentional and must not be turned into a
//! propagated error.

mod core;
mod driver;
mod error;
mod remap;
mod slot;
mod table;

pub use self::{
    core::{Gpa, Hva, SlotId},
    driver::MemslotDriver,
    error::MemslotError,
    remap::RemapOutcome,
    slot::{Slot, SlotInfo, SlotRef},
    table::{DEFAULT_MAX_SLOTS, SlotTable, SlotTableGuard, SlotTableInfo, Snapshot},
};

/// The core functionality for guest memory slot management.
///
/// Owns the slot table of one virtual machine together with the driver
/// used to install slots. Share it between the vCPU threads and the
/// control plane, e.g. through an [`Arc`](std::sync::Arc).
pub struct MemslotCore<Driver>
where
    Driver: MemslotDriver,
{
    driver: Driver,
    table: SlotTable,
}

impl<Driver> MemslotCore<Driver>
where
    Driver: MemslotDriver,
{
    /// Creates a new `MemslotCore` instance with the given driver.
    ///
    /// The slot table holds at most [`DEFAULT_MAX_SLOTS`] slots.
    pub fn new(driver: Driver) -> Self {
        Self {
            driver,
            table: SlotTable::new(),
        }
    }

    /// Replaces the slot table with an empty one holding at most
    /// `max_slots` slots.
    ///
    /// Meant to be called right after [`new`], before any slot is
    /// added.
    ///
    /// [`new`]: Self::new
    pub fn with_max_slots(self, max_slots: usize) -> Self {
        debug_assert!(self.table.snapshot().is_empty());

        Self {
            table: SlotTable::with_max_slots(max_slots),
            ..self
        }
    }

    /// Returns the driver.
    pub fn driver(&self) -> &Driver {
        &self.driver
    }

    /// Returns the slot table.
    pub fn table(&self) -> &SlotTable {
        &self.table
    }

    /// Returns the current version of the slot list.
    pub fn snapshot(&self) -> Snapshot {
        self.table.snapshot()
    }

    /// Acquires the writer lock of the slot table.
    pub fn lock(&self) -> SlotTableGuard<'_> {
        self.table.lock()
    }

    /// Returns a summary of the slot table state.
    pub fn info(&self) -> SlotTableInfo {
        self.table.info()
    }

    /// Installs `slot` with the driver and marks it as mapped.
    ///
    /// The guard proves that the writer lock is held. The slot must not be
    /// mapped already.
    ///
    /// Aborts the process if the driver fails.
    pub fn map_slot(&self, guard: &SlotTableGuard<'_>, slot: &Slot) {
        debug_assert!(guard.guards(&self.table));
        debug_assert!(!slot.is_mapped(), "slot {} is already mapped", slot.id());

        if let Err(err) = self.driver.map(slot) {
            driver_failure("map", slot, err);
        }

        slot.set_mapped(true);
        tracing::debug!(slot = %slot.id(), gpa = %slot.guest_phys_addr(), "slot mapped");
    }

    /// Removes `slot` from the driver and marks it as unmapped.
    ///
    /// The guard proves that the writer lock is held. The slot must be
    /// mapped.
    ///
    /// Aborts the process if the driver fails.
    pub fn unmap_slot(&self, guard: &SlotTableGuard<'_>, slot: &Slot) {
        debug_assert!(guard.guards(&self.table));
        debug_assert!(slot.is_mapped(), "slot {} is not mapped", slot.id());

        if let Err(err) = self.driver.unmap(slot) {
            driver_failure("unmap", slot, err);
        }

        slot.set_mapped(false);
        tracing::debug!(slot = %slot.id(), gpa = %slot.guest_phys_addr(), "slot unmapped");
    }
}

/// Reports a failed driver call and aborts.
///
/// The hypervisor state is unknown at this point, see the crate-level
/// documentation.
#[cold]
fn driver_failure(operation: &'static str, slot: &Slot, err: MemslotError) -> ! {
    tracing::error!(
        operation,
        slot = %slot.id(),
        gpa = %slot.guest_phys_addr(),
        hva = %slot.userspace_addr(),
        size = slot.memory_size(),
        %err,
        "memory slot driver failure, aborting"
    );

    std::process::abort()
}

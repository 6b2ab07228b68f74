//! The memory slot table.
//!
//! The table is read-mostly. Readers take a [`Snapshot`] of the current
//! slot list with a single atomic load and never touch the writer lock, so
//! vCPU fault handlers never block on topology changes. Writers serialize
//! on [`SlotTable::lock`], build a complete new list and publish it with a
//! single atomic store (copy-on-write at the list level).
//!
//! Reclamation is deferred through reference counting: the previous list
//! and any slot removed from it stay alive for as long as some snapshot
//! still refers to them, and are freed when the last one is dropped.

use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

use crate::{Gpa, Hva, MemslotError, Slot, SlotId, SlotRef};

/// Default maximum number of slots per table.
pub const DEFAULT_MAX_SLOTS: usize = 32;

type SlotList = Vec<SlotRef>;

/// An immutable view of the slot table at one point in time.
///
/// Slot order is insertion order, which makes every lookup deterministic.
/// The `mapped` flag of each slot is still live and reflects the latest
/// release store.
#[derive(Debug, Clone)]
pub struct Snapshot(Arc<SlotList>);

impl Snapshot {
    /// Returns the number of slots in the snapshot.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Checks if the snapshot contains no slots.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns an iterator over the slots in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, SlotRef> {
        self.0.iter()
    }

    /// Finds the first slot whose guest range contains `gpa`.
    pub fn find_by_gpa(&self, gpa: Gpa) -> Option<&SlotRef> {
        self.0.iter().find(|slot| slot.contains_gpa(gpa))
    }

    /// Finds the first mapped slot, other than `reference` itself, whose
    /// host range overlaps the host range of `reference`.
    pub fn find_overlap(&self, reference: &SlotRef) -> Option<&SlotRef> {
        self.0.iter().find(|slot| {
            !Slot::same(slot, reference) && slot.overlaps_hva(reference) && slot.is_mapped()
        })
    }

    /// Checks if the snapshot contains `slot`.
    pub fn contains(&self, slot: &SlotRef) -> bool {
        self.0.iter().any(|candidate| Slot::same(candidate, slot))
    }
}

impl<'a> IntoIterator for &'a Snapshot {
    type Item = &'a SlotRef;
    type IntoIter = std::slice::Iter<'a, SlotRef>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Summary of the slot table state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotTableInfo {
    /// Number of slots in the table.
    pub n_slots: usize,

    /// Maximum number of slots.
    pub max_slots: usize,

    /// Number of slots currently installed with the driver.
    pub mapped_slots: usize,
}

#[derive(Debug, Default)]
struct TableState {
    n_slots: usize,
    next_id: u32,
    generation: u64,
}

/// A table of guest memory slots.
///
/// One table exists per virtual machine and is shared between the vCPU
/// threads (readers) and the control plane (writers).
pub struct SlotTable {
    head: ArcSwap<SlotList>,
    state: Mutex<TableState>,
    max_slots: usize,
}

impl SlotTable {
    /// Creates an empty table holding at most [`DEFAULT_MAX_SLOTS`] slots.
    pub fn new() -> Self {
        Self::with_max_slots(DEFAULT_MAX_SLOTS)
    }

    /// Creates an empty table holding at most `max_slots` slots.
    ///
    /// The limit is fixed for the lifetime of the table.
    pub fn with_max_slots(max_slots: usize) -> Self {
        Self {
            head: ArcSwap::from_pointee(SlotList::new()),
            state: Mutex::new(TableState::default()),
            max_slots,
        }
    }

    /// Returns the maximum number of slots.
    pub fn max_slots(&self) -> usize {
        self.max_slots
    }

    /// Returns the current version of the slot list.
    ///
    /// This never blocks.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot(self.head.load_full())
    }

    /// Acquires the writer lock.
    ///
    /// All mutations of the table, and all driver calls, happen while the
    /// returned guard is alive.
    pub fn lock(&self) -> SlotTableGuard<'_> {
        SlotTableGuard {
            table: self,
            state: self.state.lock(),
        }
    }

    /// Returns a summary of the table state.
    pub fn info(&self) -> SlotTableInfo {
        let snapshot = self.snapshot();

        SlotTableInfo {
            n_slots: snapshot.len(),
            max_slots: self.max_slots,
            mapped_slots: snapshot.iter().filter(|slot| slot.is_mapped()).count(),
        }
    }

    /// Dumps the table state.
    pub fn dump(&self) {
        let snapshot = self.snapshot();

        tracing::debug!(n_slots = snapshot.len(), max_slots = self.max_slots, "slot table");
        for slot in &snapshot {
            tracing::debug!(
                slot = %slot.id(),
                gpa = %slot.guest_phys_addr(),
                hva = %slot.userspace_addr(),
                size = slot.memory_size(),
                readonly = slot.readonly(),
                mapped = slot.is_mapped(),
                "slot"
            );
        }
    }
}

impl Default for SlotTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive access to a [`SlotTable`].
///
/// Created by [`SlotTable::lock`]. Releases the writer lock when dropped.
pub struct SlotTableGuard<'a> {
    table: &'a SlotTable,
    state: MutexGuard<'a, TableState>,
}

impl SlotTableGuard<'_> {
    /// Returns the number of slots in the table.
    pub fn n_slots(&self) -> usize {
        self.state.n_slots
    }

    /// Returns the maximum number of slots.
    pub fn max_slots(&self) -> usize {
        self.table.max_slots
    }

    /// Returns the current version of the slot list.
    pub fn snapshot(&self) -> Snapshot {
        self.table.snapshot()
    }

    /// Appends a new, unmapped slot.
    ///
    /// # Errors
    ///
    /// - [`MemslotError::NoFreeSlots`] if the table is full.
    /// - [`MemslotError::InvalidRegion`] if `size` is zero or either
    ///   range wraps around the address space.
    ///
    /// The table is left unchanged on error.
    pub fn append(
        &mut self,
        gpa: Gpa,
        hva: Hva,
        size: u64,
        readonly: bool,
    ) -> Result<SlotRef, MemslotError> {
        if self.state.n_slots >= self.table.max_slots {
            tracing::warn!(%gpa, %hva, size, max = self.table.max_slots, "no free memory slots");
            return Err(MemslotError::NoFreeSlots {
                max: self.table.max_slots,
            });
        }

        if size == 0 || gpa.checked_add(size).is_none() || hva.checked_add(size).is_none() {
            tracing::warn!(%gpa, %hva, size, "invalid memory region");
            return Err(MemslotError::InvalidRegion { gpa, hva, size });
        }

        let id = SlotId(self.state.next_id);
        self.state.next_id = self.state.next_id.wrapping_add(1);

        let slot = Arc::new(Slot::new(id, gpa, hva, size, readonly));

        let current = self.table.head.load();
        let mut slots = SlotList::with_capacity(current.len() + 1);
        slots.extend(current.iter().cloned());
        slots.push(slot.clone());
        drop(current);

        self.publish(slots, None);
        self.state.n_slots += 1;

        tracing::debug!(slot = %id, %gpa, %hva, size, readonly, "slot appended");
        Ok(slot)
    }

    /// Removes `slot` from the table.
    ///
    /// The slot itself is not freed until every snapshot that still
    /// contains it has been dropped.
    ///
    /// # Errors
    ///
    /// [`MemslotError::NotFound`] if `slot` is not in the table, in which
    /// case the table is left unchanged.
    pub fn remove(&mut self, slot: &SlotRef) -> Result<(), MemslotError> {
        let current = self.table.head.load();

        let Some(index) = current
            .iter()
            .position(|candidate| Slot::same(candidate, slot))
        else {
            tracing::warn!(slot = %slot.id(), gpa = %slot.guest_phys_addr(), "slot not found");
            return Err(MemslotError::NotFound);
        };

        let mut slots = SlotList::with_capacity(current.len() - 1);
        slots.extend(current[..index].iter().cloned());
        slots.extend(current[index + 1..].iter().cloned());
        let removed = current[index].clone();
        drop(current);

        self.publish(slots, Some(removed));
        self.state.n_slots -= 1;

        tracing::debug!(slot = %slot.id(), gpa = %slot.guest_phys_addr(), "slot removed");
        Ok(())
    }

    /// Finds the slot describing exactly the given region.
    pub fn find_by_region(&self, gpa: Gpa, hva: Hva, size: u64) -> Option<SlotRef> {
        self.table
            .head
            .load()
            .iter()
            .find(|slot| slot.matches_region(gpa, hva, size))
            .cloned()
    }

    /// Checks if the guard holds the lock of `table`.
    pub(crate) fn guards(&self, table: &SlotTable) -> bool {
        std::ptr::eq(self.table, table)
    }

    /// Publishes `slots` as the new head.
    ///
    /// The previous list and `removed` are handed over to reference
    /// counting. Readers that loaded the previous head keep it, and every
    /// slot in it, alive until they drop their snapshot.
    fn publish(&mut self, slots: SlotList, removed: Option<SlotRef>) {
        let previous = self.table.head.swap(Arc::new(slots));
        self.state.generation += 1;

        tracing::trace!(
            generation = self.state.generation,
            previous_len = previous.len(),
            removed = ?removed.as_ref().map(|slot| slot.id()),
            "slot list published"
        );
    }
}

#[cfg(test)]
#[path = "table_tests.rs"]
mod tests;

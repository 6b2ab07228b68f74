use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use serde::{Deserialize, Serialize};

use crate::{Gpa, Hva, SlotId};

/// A shared reference to a memory slot.
///
/// Two references denote the same slot only if they point to the same
/// allocation (see [`Slot::same`]). A reference keeps the slot alive even
/// after it has been removed from its table.
pub type SlotRef = Arc<Slot>;

/// A guest memory slot.
///
/// Maps `memory_size` bytes of guest physical address space starting at
/// `guest_phys_addr` onto host memory starting at `userspace_addr`.
///
/// Everything except the `mapped` flag is fixed at creation. The flag is
/// written with release ordering and read with acquire ordering, so a
/// reader that observes `mapped == true` also observes the driver call
/// that preceded the store.
#[derive(Debug)]
pub struct Slot {
    id: SlotId,
    guest_phys_addr: Gpa,
    userspace_addr: Hva,
    memory_size: u64,
    readonly: bool,
    mapped: AtomicBool,
}

impl Slot {
    /// Caller validates that neither range wraps and `memory_size > 0`.
    pub(crate) fn new(
        id: SlotId,
        guest_phys_addr: Gpa,
        userspace_addr: Hva,
        memory_size: u64,
        readonly: bool,
    ) -> Self {
        Self {
            id,
            guest_phys_addr,
            userspace_addr,
            memory_size,
            readonly,
            mapped: AtomicBool::new(false),
        }
    }

    /// Returns the slot identifier.
    pub fn id(&self) -> SlotId {
        self.id
    }

    /// Returns the first guest physical address covered by the slot.
    pub fn guest_phys_addr(&self) -> Gpa {
        self.guest_phys_addr
    }

    /// Returns the first host virtual address backing the slot.
    pub fn userspace_addr(&self) -> Hva {
        self.userspace_addr
    }

    /// Returns the size of the slot in bytes.
    pub fn memory_size(&self) -> u64 {
        self.memory_size
    }

    /// Returns `true` if the guest may only read the slot.
    pub fn readonly(&self) -> bool {
        self.readonly
    }

    /// Returns `true` if the slot is currently installed with the driver.
    pub fn is_mapped(&self) -> bool {
        self.mapped.load(Ordering::Acquire)
    }

    pub(crate) fn set_mapped(&self, mapped: bool) {
        self.mapped.store(mapped, Ordering::Release);
    }

    /// Returns the guest physical address range `[start, end)`.
    pub fn gpa_range(&self) -> std::ops::Range<Gpa> {
        self.guest_phys_addr..self.guest_phys_addr + self.memory_size
    }

    /// Returns the host virtual address range `[start, end)`.
    pub fn hva_range(&self) -> std::ops::Range<Hva> {
        self.userspace_addr..self.userspace_addr + self.memory_size
    }

    /// Checks if `gpa` falls inside the slot.
    pub fn contains_gpa(&self, gpa: Gpa) -> bool {
        gpa.offset_from(self.guest_phys_addr)
            .is_some_and(|offset| offset < self.memory_size)
    }

    /// Checks if the host ranges of `self` and `other` share at least one
    /// byte.
    pub fn overlaps_hva(&self, other: &Slot) -> bool {
        let ours = self.hva_range();
        let theirs = other.hva_range();
        ours.start < theirs.end && theirs.start < ours.end
    }

    /// Checks if the slot describes exactly the given region.
    pub fn matches_region(&self, gpa: Gpa, hva: Hva, size: u64) -> bool {
        self.guest_phys_addr == gpa && self.userspace_addr == hva && self.memory_size == size
    }

    /// Checks if `a` and `b` refer to the same slot.
    pub fn same(a: &SlotRef, b: &SlotRef) -> bool {
        Arc::ptr_eq(a, b)
    }

    /// Returns a plain copy of the slot state.
    pub fn info(&self) -> SlotInfo {
        SlotInfo {
            id: self.id,
            guest_phys_addr: self.guest_phys_addr,
            userspace_addr: self.userspace_addr,
            memory_size: self.memory_size,
            readonly: self.readonly,
            mapped: self.is_mapped(),
        }
    }
}

/// A point-in-time copy of a [`Slot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotInfo {
    /// Slot identifier.
    pub id: SlotId,

    /// Guest physical address of the slot.
    pub guest_phys_addr: Gpa,

    /// Host virtual address of the slot.
    pub userspace_addr: Hva,

    /// Size of the slot in bytes.
    pub memory_size: u64,

    /// Whether the slot is read-only for the guest.
    pub readonly: bool,

    /// Whether the slot was installed when the copy was taken.
    pub mapped: bool,
}

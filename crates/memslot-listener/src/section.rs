use memslot_core::{Gpa, Hva};

bitflags::bitflags! {
    /// Flags describing the memory region behind a section.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RegionFlags: u8 {
        /// The region is backed by host RAM.
        const RAM           = 1 << 0;

        /// The guest may only read the region.
        const READONLY      = 1 << 1;

        /// The region is a ROM device: reads are served from host memory,
        /// writes go to the device model.
        const ROM_DEVICE    = 1 << 2;

        /// The ROM device currently serves reads directly from memory.
        const ROMD_MODE     = 1 << 3;
    }
}

/// A contiguous part of a memory region as seen in the guest physical
/// address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionSection {
    /// Guest physical address of the section.
    pub gpa: Gpa,

    /// Host virtual address backing the first byte of the section.
    pub hva: Hva,

    /// Size of the section in bytes.
    pub size: u64,

    /// Flags of the region the section belongs to.
    pub flags: RegionFlags,
}

/// What a section change means for the slot table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SectionAction {
    Ignore,
    Add,
    Remove,

    /// The slot must go away whether the section is being added or
    /// removed. A missing slot is expected.
    Trap,
}

impl RegionSection {
    /// Creates a new section.
    pub fn new(gpa: Gpa, hva: Hva, size: u64, flags: RegionFlags) -> Self {
        Self {
            gpa,
            hva,
            size,
            flags,
        }
    }

    /// Creates a new section of writable RAM.
    pub fn ram(gpa: Gpa, hva: Hva, size: u64) -> Self {
        Self::new(gpa, hva, size, RegionFlags::RAM)
    }

    /// Returns `true` if the guest may write to the section.
    pub fn is_writable(&self) -> bool {
        !self
            .flags
            .intersects(RegionFlags::READONLY | RegionFlags::ROM_DEVICE)
    }

    /// Trims the section to `page_size` boundaries.
    ///
    /// The start is rounded up and the end rounded down. Returns `None` if
    /// no full page remains. `page_size` must be a power of two.
    pub fn aligned(&self, page_size: u64) -> Option<Self> {
        debug_assert!(page_size.is_power_of_two());

        let mask = page_size - 1;
        let start = self.gpa.0.checked_add(mask)? & !mask;
        let delta = start - self.gpa.0;
        if delta > self.size {
            return None;
        }

        let size = (self.size - delta) & !mask;
        if size == 0 {
            return None;
        }

        Some(Self {
            gpa: Gpa(start),
            hva: self.hva.checked_add(delta)?,
            size,
            flags: self.flags,
        })
    }

    /// Decides what adding (`add == true`) or removing the section does.
    ///
    /// Writable non-RAM regions are pure MMIO and never get a slot. A ROM
    /// device outside of ROMD mode must trap every access, so its slot is
    /// removed on both add and remove.
    pub(crate) fn action(&self, add: bool) -> SectionAction {
        if !self.flags.contains(RegionFlags::RAM) {
            if self.is_writable() {
                return SectionAction::Ignore;
            }

            if !self.flags.contains(RegionFlags::ROMD_MODE) {
                return SectionAction::Trap;
            }
        }

        if add {
            SectionAction::Add
        } else {
            SectionAction::Remove
        }
    }
}

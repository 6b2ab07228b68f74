//! Memory listener for guest memory slots.
//!
//! Translates memory-region changes of the device model into slot table
//! updates and dispatches faults on unmapped guest physical addresses,
//! either to the remap engine or to an MMIO handler.

mod mmio;
mod section;

use std::sync::Arc;

use memslot_core::{Gpa, Hva, MemslotCore, MemslotDriver, MemslotError, RemapOutcome, SlotRef};

pub use self::{
    mmio::{MmioHandler, NoMmio},
    section::{RegionFlags, RegionSection},
};
use self::section::SectionAction;

/// Host page size used to align sections unless configured otherwise.
pub const DEFAULT_PAGE_SIZE: u64 = 0x1000;

/// How a fault on an unmapped guest physical address was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultOutcome {
    /// The faulting slot was swapped in for an overlapping one. The vCPU
    /// can resume.
    Remapped,

    /// A slot covers the address but nothing could be swapped. The vCPU
    /// retries the access.
    Unresolved,

    /// No slot covers the address; the access was emulated by the MMIO
    /// handler.
    Emulated,
}

/// Keeps the slot table of one VM in sync with its memory regions.
pub struct MemoryListener<Driver, Mmio = NoMmio>
where
    Driver: MemslotDriver,
    Mmio: MmioHandler,
{
    core: Arc<MemslotCore<Driver>>,
    mmio: Mmio,
    page_size: u64,
}

impl<Driver> MemoryListener<Driver>
where
    Driver: MemslotDriver,
{
    /// Creates a new listener without an MMIO handler.
    ///
    /// Sections are aligned to [`DEFAULT_PAGE_SIZE`].
    pub fn new(core: Arc<MemslotCore<Driver>>) -> Self {
        Self {
            core,
            mmio: NoMmio,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl<Driver, Mmio> MemoryListener<Driver, Mmio>
where
    Driver: MemslotDriver,
    Mmio: MmioHandler,
{
    /// Replaces the MMIO handler.
    pub fn with_mmio_handler<M>(self, mmio: M) -> MemoryListener<Driver, M>
    where
        M: MmioHandler,
    {
        MemoryListener {
            core: self.core,
            mmio,
            page_size: self.page_size,
        }
    }

    /// Sets the host page size sections are aligned to.
    ///
    /// # Panics
    ///
    /// Panics if `page_size` is not a power of two.
    pub fn with_page_size(self, page_size: u64) -> Self {
        assert!(
            page_size.is_power_of_two(),
            "page size {page_size:#x} is not a power of two"
        );

        Self { page_size, ..self }
    }

    /// Returns the memslot core.
    pub fn core(&self) -> &Arc<MemslotCore<Driver>> {
        &self.core
    }

    /// Returns the MMIO handler.
    pub fn mmio_handler(&self) -> &Mmio {
        &self.mmio
    }

    /// Returns the host page size sections are aligned to.
    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    /// Handles a section being added to the guest address space.
    ///
    /// Returns the new slot, or `None` if the section does not get one:
    /// it is pure MMIO, smaller than a page after alignment, or a ROM
    /// device that has to trap (in which case a slot previously created
    /// for it is removed).
    pub fn region_add(&self, section: &RegionSection) -> Result<Option<SlotRef>, MemslotError> {
        let action = section.action(true);
        let Some(section) = self.prepare(section, action) else {
            return Ok(None);
        };

        match action {
            SectionAction::Add => {
                let readonly = !section.is_writable();
                let slot = self.on_region_add(section.gpa, section.hva, section.size, readonly)?;
                Ok(Some(slot))
            }
            SectionAction::Trap => {
                self.trap_region(&section);
                Ok(None)
            }
            SectionAction::Remove | SectionAction::Ignore => Ok(None),
        }
    }

    /// Handles a section being removed from the guest address space.
    pub fn region_remove(&self, section: &RegionSection) -> Result<(), MemslotError> {
        let action = section.action(false);
        let Some(section) = self.prepare(section, action) else {
            return Ok(());
        };

        match action {
            SectionAction::Trap => {
                self.trap_region(&section);
                Ok(())
            }
            _ => self.on_region_remove(section.gpa, section.hva, section.size),
        }
    }

    /// Adds a slot for the given region.
    ///
    /// The slot is installed right away unless its host memory overlaps an
    /// installed slot. In that case it stays unmapped until the guest
    /// faults on it (see [`unmapped_gpa_fault`]).
    ///
    /// # Errors
    ///
    /// - [`MemslotError::DuplicateRegion`] if the exact region is already
    ///   registered.
    /// - Any error of [`SlotTableGuard::append`].
    ///
    /// [`unmapped_gpa_fault`]: Self::unmapped_gpa_fault
    /// [`SlotTableGuard::append`]: memslot_core::SlotTableGuard::append
    pub fn on_region_add(
        &self,
        gpa: Gpa,
        hva: Hva,
        size: u64,
        readonly: bool,
    ) -> Result<SlotRef, MemslotError> {
        let mut guard = self.core.lock();

        if guard.find_by_region(gpa, hva, size).is_some() {
            tracing::warn!(%gpa, %hva, size, "memory region already registered");
            return Err(MemslotError::DuplicateRegion { gpa, hva, size });
        }

        let slot = guard.append(gpa, hva, size, readonly)?;

        let snapshot = guard.snapshot();
        match snapshot.find_overlap(&slot) {
            Some(overlap) => {
                tracing::debug!(
                    slot = %slot.id(),
                    %gpa,
                    overlap = %overlap.id(),
                    "host memory overlaps installed slot, deferring map"
                );
            }
            None => self.core.map_slot(&guard, &slot),
        }

        Ok(slot)
    }

    /// Removes the slot for the given region, unmapping it first if it is
    /// installed.
    ///
    /// # Errors
    ///
    /// [`MemslotError::NotFound`] if no slot describes exactly this
    /// region.
    pub fn on_region_remove(&self, gpa: Gpa, hva: Hva, size: u64) -> Result<(), MemslotError> {
        if !self.remove_region(gpa, hva, size) {
            tracing::warn!(%gpa, %hva, size, "memory region not registered");
            return Err(MemslotError::NotFound);
        }

        Ok(())
    }

    /// Handles a vCPU exit on an unmapped guest physical address.
    ///
    /// # Errors
    ///
    /// Whatever the MMIO handler returns when no slot covers `gpa`.
    pub fn unmapped_gpa_fault(&self, gpa: Gpa) -> Result<FaultOutcome, MemslotError> {
        match self.core.remap_overlap_region(gpa) {
            RemapOutcome::Ok => Ok(FaultOutcome::Remapped),
            RemapOutcome::NoOverlap => {
                tracing::warn!(%gpa, "found no overlap for unmapped region");
                Ok(FaultOutcome::Unresolved)
            }
            RemapOutcome::NoMapping => {
                self.mmio.handle_mmio(gpa)?;
                Ok(FaultOutcome::Emulated)
            }
        }
    }

    /// Aligns the section, or returns `None` if it is to be ignored.
    fn prepare(&self, section: &RegionSection, action: SectionAction) -> Option<RegionSection> {
        if action == SectionAction::Ignore {
            tracing::trace!(gpa = %section.gpa, size = section.size, "ignoring MMIO section");
            return None;
        }

        let aligned = section.aligned(self.page_size);
        if aligned.is_none() {
            tracing::trace!(gpa = %section.gpa, size = section.size, "section smaller than a page");
        }

        aligned
    }

    /// Removes the slot of a ROM device that has to trap, if it has one.
    fn trap_region(&self, section: &RegionSection) {
        if !self.remove_region(section.gpa, section.hva, section.size) {
            tracing::trace!(gpa = %section.gpa, size = section.size, "no slot for trapping ROM device");
        }
    }

    /// Unmaps and removes the slot describing the region. Returns `false`
    /// if there is none.
    fn remove_region(&self, gpa: Gpa, hva: Hva, size: u64) -> bool {
        let mut guard = self.core.lock();

        let Some(slot) = guard.find_by_region(gpa, hva, size) else {
            return false;
        };

        if slot.is_mapped() {
            self.core.unmap_slot(&guard, &slot);
        }

        // The slot was found under the same lock.
        guard.remove(&slot).is_ok()
    }
}

#[cfg(test)]
#[path = "listener_tests.rs"]
mod tests;

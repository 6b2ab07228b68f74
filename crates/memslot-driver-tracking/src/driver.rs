use indexmap::IndexMap;
use memslot_core::{Gpa, Hva, Slot};
use parking_lot::Mutex;

use crate::Error;

/// A mapping installed with the tracking driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackedMapping {
    /// Guest physical address of the mapping.
    pub gpa: Gpa,

    /// Host virtual address backing the mapping.
    pub hva: Hva,

    /// Size of the mapping in bytes.
    pub size: u64,

    /// Whether the guest may only read the mapping.
    pub readonly: bool,
}

impl TrackedMapping {
    fn from_slot(slot: &Slot) -> Self {
        Self {
            gpa: slot.guest_phys_addr(),
            hva: slot.userspace_addr(),
            size: slot.memory_size(),
            readonly: slot.readonly(),
        }
    }

    fn overlaps_gpa(&self, other: &Self) -> bool {
        self.gpa < other.gpa + other.size && other.gpa < self.gpa + self.size
    }

    fn overlaps_hva(&self, other: &Self) -> bool {
        self.hva < other.hva + other.size && other.hva < self.hva + self.size
    }
}

#[derive(Debug, Default)]
struct State {
    mappings: IndexMap<Gpa, TrackedMapping>,
    map_calls: usize,
    unmap_calls: usize,
}

/// Memory slot driver that tracks installed mappings in process.
pub struct TrackingDriver {
    state: Mutex<State>,
}

impl TrackingDriver {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    pub fn map(&self, slot: &Slot) -> Result<(), Error> {
        let mapping = TrackedMapping::from_slot(slot);
        tracing::trace!(gpa = %mapping.gpa, hva = %mapping.hva, size = mapping.size, "map");

        let mut state = self.state.lock();
        state.map_calls += 1;

        if state.mappings.contains_key(&mapping.gpa) {
            return Err(Error::AlreadyMapped { gpa: mapping.gpa });
        }

        for existing in state.mappings.values() {
            if existing.overlaps_gpa(&mapping) {
                return Err(Error::GuestOverlap {
                    gpa: mapping.gpa,
                    existing: existing.gpa,
                });
            }

            if existing.overlaps_hva(&mapping) {
                return Err(Error::HostOverlap {
                    hva: mapping.hva,
                    existing: existing.gpa,
                });
            }
        }

        state.mappings.insert(mapping.gpa, mapping);
        Ok(())
    }

    pub fn unmap(&self, slot: &Slot) -> Result<(), Error> {
        let mapping = TrackedMapping::from_slot(slot);
        tracing::trace!(gpa = %mapping.gpa, hva = %mapping.hva, size = mapping.size, "unmap");

        let mut state = self.state.lock();
        state.unmap_calls += 1;

        match state.mappings.get(&mapping.gpa) {
            Some(installed) if installed.hva == mapping.hva && installed.size == mapping.size => {}
            Some(_) => return Err(Error::Mismatch { gpa: mapping.gpa }),
            None => return Err(Error::NotMapped { gpa: mapping.gpa }),
        }

        state.mappings.shift_remove(&mapping.gpa);
        Ok(())
    }

    pub fn mappings(&self) -> Vec<TrackedMapping> {
        self.state.lock().mappings.values().copied().collect()
    }

    pub fn is_mapped(&self, gpa: Gpa) -> bool {
        self.state.lock().mappings.contains_key(&gpa)
    }

    pub fn map_calls(&self) -> usize {
        self.state.lock().map_calls
    }

    pub fn unmap_calls(&self) -> usize {
        self.state.lock().unmap_calls
    }
}

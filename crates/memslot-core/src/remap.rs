use serde::{Deserialize, Serialize};

use crate::{Gpa, MemslotCore, MemslotDriver, SlotTableGuard};

/// The result of [`MemslotCore::remap_overlap_region`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RemapOutcome {
    /// No slot covers the address.
    ///
    /// The access is most likely MMIO and should be emulated.
    NoMapping,

    /// A slot covers the address, but no installed slot overlaps its host
    /// memory. There is nothing to swap.
    NoOverlap,

    /// The overlapping slot was removed from the driver and the slot
    /// covering the address was installed in its place.
    Ok,
}

impl<Driver> MemslotCore<Driver>
where
    Driver: MemslotDriver,
{
    /// Resolves a fault on an unmapped guest physical address.
    ///
    /// Two slots may be backed by overlapping host memory (e.g. an aliased
    /// region, or a region re-added during hot-plug), but the hypervisor can
    /// only install one of them at a time. When the guest touches the one
    /// that is not installed, this swaps the two: the installed overlapping
    /// slot is unmapped and the slot covering `gpa` is mapped instead.
    ///
    /// The lookup first runs on a lock-free snapshot, because most faults
    /// are not overlap conflicts. Only when a conflict is found is the
    /// writer lock taken, and the lookup repeated on the now current
    /// table before anything is changed.
    ///
    /// Aborts the process if the driver fails.
    pub fn remap_overlap_region(&self, gpa: Gpa) -> RemapOutcome {
        {
            let snapshot = self.table.snapshot();

            let Some(gpa_slot) = snapshot.find_by_gpa(gpa) else {
                tracing::trace!(%gpa, "no slot for address");
                return RemapOutcome::NoMapping;
            };

            if snapshot.find_overlap(gpa_slot).is_none() {
                tracing::trace!(%gpa, slot = %gpa_slot.id(), "no overlapping slot");
                return RemapOutcome::NoOverlap;
            }
        }

        self.remap_locked(&self.table.lock(), gpa)
    }

    /// Slow path of [`remap_overlap_region`] under the writer lock.
    ///
    /// The table may have changed between the lock-free lookup and
    /// acquiring the lock. Only what is found now counts.
    ///
    /// [`remap_overlap_region`]: Self::remap_overlap_region
    fn remap_locked(&self, guard: &SlotTableGuard<'_>, gpa: Gpa) -> RemapOutcome {
        let snapshot = guard.snapshot();

        let Some(gpa_slot) = snapshot.find_by_gpa(gpa) else {
            tracing::debug!(%gpa, "slot for address vanished before remap");
            return RemapOutcome::NoMapping;
        };

        let Some(overlap_slot) = snapshot.find_overlap(gpa_slot) else {
            tracing::debug!(%gpa, slot = %gpa_slot.id(), "overlap resolved before remap");
            return RemapOutcome::NoOverlap;
        };

        tracing::debug!(
            %gpa,
            slot = %gpa_slot.id(),
            overlap = %overlap_slot.id(),
            "remapping overlapping slot"
        );

        self.unmap_slot(guard, overlap_slot);

        if gpa_slot.is_mapped() {
            //
            // Two installed slots overlapped. Unmapping the other one
            // already restored the invariant; mapping again would be a
            // double map.
            //
            tracing::warn!(%gpa, slot = %gpa_slot.id(), "faulting slot was already mapped");
        } else {
            self.map_slot(guard, gpa_slot);
        }

        RemapOutcome::Ok
    }
}

#[cfg(test)]
#[path = "remap_tests.rs"]
mod tests;

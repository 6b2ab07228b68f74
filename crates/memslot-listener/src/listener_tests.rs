use std::sync::Arc;

use memslot_core::{Gpa, Hva, MemslotCore, MemslotError};
use memslot_driver_tracking::MemslotTrackingDriver;
use parking_lot::Mutex;

use super::{FaultOutcome, MemoryListener, MmioHandler, RegionFlags, RegionSection};

///////////////////////////////////////////////////////////////////////////////
// Test Helpers
///////////////////////////////////////////////////////////////////////////////

#[derive(Default)]
struct RecordingMmio {
    accesses: Mutex<Vec<Gpa>>,
}

impl MmioHandler for RecordingMmio {
    fn handle_mmio(&self, gpa: Gpa) -> Result<(), MemslotError> {
        self.accesses.lock().push(gpa);
        Ok(())
    }
}

fn listener() -> MemoryListener<MemslotTrackingDriver> {
    MemoryListener::new(Arc::new(MemslotCore::new(MemslotTrackingDriver::new())))
}

fn installed(listener: &MemoryListener<MemslotTrackingDriver>) -> Vec<Gpa> {
    listener
        .core()
        .driver()
        .mappings()
        .iter()
        .map(|mapping| mapping.gpa)
        .collect()
}

///////////////////////////////////////////////////////////////////////////////
// Region Add / Remove
///////////////////////////////////////////////////////////////////////////////

#[test]
fn region_add_maps_ram() -> Result<(), MemslotError> {
    let listener = listener();

    let slot = listener
        .region_add(&RegionSection::ram(Gpa(0x0), Hva(0x7f00_0000), 0x10_0000))?
        .expect("ram section gets a slot");

    assert!(slot.is_mapped());
    assert!(!slot.readonly());
    assert_eq!(installed(&listener), vec![Gpa(0x0)]);

    Ok(())
}

#[test]
fn region_add_defers_overlapping_slot() -> Result<(), MemslotError> {
    let listener = listener();

    let slot1 = listener.on_region_add(Gpa(0x0), Hva(0x7f00_0000), 0x2000, false)?;
    let slot2 = listener.on_region_add(Gpa(0x10_0000), Hva(0x7f00_1000), 0x2000, false)?;

    assert!(slot1.is_mapped());
    assert!(!slot2.is_mapped());
    assert_eq!(installed(&listener), vec![Gpa(0x0)]);

    // The guest touches the deferred slot.
    assert_eq!(
        listener.unmapped_gpa_fault(Gpa(0x10_1000))?,
        FaultOutcome::Remapped
    );
    assert!(!slot1.is_mapped());
    assert!(slot2.is_mapped());
    assert_eq!(installed(&listener), vec![Gpa(0x10_0000)]);

    Ok(())
}

#[test]
fn region_add_rejects_duplicate() -> Result<(), MemslotError> {
    let listener = listener();

    listener.on_region_add(Gpa(0x0), Hva(0x7f00_0000), 0x1000, false)?;
    let result = listener.on_region_add(Gpa(0x0), Hva(0x7f00_0000), 0x1000, false);

    assert!(matches!(
        result,
        Err(MemslotError::DuplicateRegion {
            gpa: Gpa(0x0),
            hva: Hva(0x7f00_0000),
            size: 0x1000,
        })
    ));
    assert_eq!(listener.core().info().n_slots, 1);
    assert_eq!(listener.core().driver().map_calls(), 1);

    Ok(())
}

#[test]
fn region_remove_unmaps_mapped_slot() -> Result<(), MemslotError> {
    let listener = listener();

    let slot = listener.on_region_add(Gpa(0x0), Hva(0x7f00_0000), 0x1000, false)?;
    listener.on_region_remove(Gpa(0x0), Hva(0x7f00_0000), 0x1000)?;

    assert!(!slot.is_mapped());
    assert!(installed(&listener).is_empty());
    assert!(listener.core().snapshot().is_empty());
    assert_eq!(listener.core().driver().unmap_calls(), 1);

    Ok(())
}

#[test]
fn region_remove_of_deferred_slot_skips_unmap() -> Result<(), MemslotError> {
    let listener = listener();

    listener.on_region_add(Gpa(0x0), Hva(0x7f00_0000), 0x2000, false)?;
    listener.on_region_add(Gpa(0x10_0000), Hva(0x7f00_0000), 0x2000, false)?;
    listener.on_region_remove(Gpa(0x10_0000), Hva(0x7f00_0000), 0x2000)?;

    assert_eq!(listener.core().driver().unmap_calls(), 0);
    assert_eq!(listener.core().info().n_slots, 1);
    assert_eq!(installed(&listener), vec![Gpa(0x0)]);

    Ok(())
}

#[test]
fn region_remove_unknown_is_not_found() -> Result<(), MemslotError> {
    let listener = listener();

    listener.on_region_add(Gpa(0x0), Hva(0x7f00_0000), 0x2000, false)?;

    // Same start, different size.
    assert!(matches!(
        listener.on_region_remove(Gpa(0x0), Hva(0x7f00_0000), 0x1000),
        Err(MemslotError::NotFound)
    ));
    assert_eq!(listener.core().info().n_slots, 1);

    Ok(())
}

///////////////////////////////////////////////////////////////////////////////
// Section Filtering
///////////////////////////////////////////////////////////////////////////////

#[test]
fn writable_mmio_section_is_ignored() -> Result<(), MemslotError> {
    let listener = listener();
    let section = RegionSection::new(
        Gpa(0xfee0_0000),
        Hva(0x7f00_0000),
        0x1000,
        RegionFlags::empty(),
    );

    assert!(listener.region_add(&section)?.is_none());
    listener.region_remove(&section)?;
    assert!(listener.core().snapshot().is_empty());

    Ok(())
}

#[test]
fn readonly_ram_section_is_readonly_slot() -> Result<(), MemslotError> {
    let listener = listener();
    let section = RegionSection::new(
        Gpa(0xe_0000),
        Hva(0x7f00_0000),
        0x2_0000,
        RegionFlags::RAM | RegionFlags::READONLY,
    );

    let slot = listener.region_add(&section)?.expect("readonly ram gets a slot");
    assert!(slot.readonly());
    assert!(listener.core().driver().mappings()[0].readonly);

    Ok(())
}

#[test]
fn rom_device_outside_romd_mode_traps() -> Result<(), MemslotError> {
    let listener = listener();
    let romd = RegionSection::new(
        Gpa(0xffe0_0000),
        Hva(0x7f00_0000),
        0x20_0000,
        RegionFlags::ROM_DEVICE | RegionFlags::ROMD_MODE,
    );
    let trapping = RegionSection {
        flags: RegionFlags::ROM_DEVICE,
        ..romd
    };

    let slot = listener.region_add(&romd)?.expect("romd section gets a slot");
    assert!(slot.readonly());
    assert!(slot.is_mapped());

    // Leaving ROMD mode re-adds the section; its slot goes away.
    assert!(listener.region_add(&trapping)?.is_none());
    assert!(!slot.is_mapped());
    assert!(listener.core().snapshot().is_empty());

    // Nothing left to remove, and that is not an error.
    assert!(listener.region_add(&trapping)?.is_none());

    Ok(())
}

#[test]
fn trapping_rom_device_lifecycle_is_quiet() -> Result<(), MemslotError> {
    let listener = listener();
    let romd = RegionSection::new(
        Gpa(0xffe0_0000),
        Hva(0x7f00_0000),
        0x20_0000,
        RegionFlags::ROM_DEVICE | RegionFlags::ROMD_MODE,
    );
    let trapping = RegionSection {
        flags: RegionFlags::ROM_DEVICE,
        ..romd
    };

    listener.region_add(&romd)?;
    listener.region_remove(&romd)?;

    // The trapping section never had a slot; neither step is an error.
    assert!(listener.region_add(&trapping)?.is_none());
    listener.region_remove(&trapping)?;
    assert!(listener.core().snapshot().is_empty());

    // Removing a trapping section whose ROMD slot is still there drops it.
    let slot = listener.region_add(&romd)?.expect("romd section gets a slot");
    listener.region_remove(&trapping)?;
    assert!(!slot.is_mapped());
    assert!(listener.core().snapshot().is_empty());
    assert_eq!(listener.core().driver().unmap_calls(), 2);

    Ok(())
}

///////////////////////////////////////////////////////////////////////////////
// Section Alignment
///////////////////////////////////////////////////////////////////////////////

#[test]
fn section_is_trimmed_to_pages() {
    let section = RegionSection::ram(Gpa(0x1800), Hva(0x7f00_0800), 0x3000);
    let aligned = section.aligned(0x1000).expect("two full pages remain");

    assert_eq!(aligned.gpa, Gpa(0x2000));
    assert_eq!(aligned.hva, Hva(0x7f00_1000));
    assert_eq!(aligned.size, 0x2000);
    assert_eq!(aligned.flags, RegionFlags::RAM);

    // Already aligned sections are unchanged.
    let section = RegionSection::ram(Gpa(0x4000), Hva(0x7f00_0000), 0x2000);
    assert_eq!(section.aligned(0x1000), Some(section));
}

#[test]
fn subpage_section_is_dropped() -> Result<(), MemslotError> {
    assert_eq!(
        RegionSection::ram(Gpa(0x1800), Hva(0x7f00_0800), 0x1000).aligned(0x1000),
        None
    );
    assert_eq!(
        RegionSection::ram(Gpa(0x1800), Hva(0x7f00_0800), 0x400).aligned(0x1000),
        None
    );
    assert_eq!(
        RegionSection::ram(Gpa(u64::MAX - 0x10), Hva(0x0), 0x10).aligned(0x1000),
        None
    );

    let listener = listener();
    let section = RegionSection::ram(Gpa(0x1800), Hva(0x7f00_0800), 0x1000);
    assert!(listener.region_add(&section)?.is_none());
    assert!(listener.core().snapshot().is_empty());

    Ok(())
}

#[test]
fn section_at_top_of_host_memory_is_rejected() -> Result<(), MemslotError> {
    // Aligning the start would move the host address past the end.
    let section = RegionSection::ram(Gpa(0x1800), Hva(u64::MAX - 0x100), 0x4000);
    assert_eq!(section.aligned(0x1000), None);

    let listener = listener();
    assert!(listener.region_add(&section)?.is_none());

    // Aligned start fits, but the range wraps.
    let section = RegionSection::ram(Gpa(0x1000), Hva(u64::MAX - 0xfff), 0x2000);
    assert!(section.aligned(0x1000).is_some());
    assert!(matches!(
        listener.region_add(&section),
        Err(MemslotError::InvalidRegion { .. })
    ));
    assert!(listener.core().snapshot().is_empty());

    Ok(())
}

#[test]
fn page_size_is_configurable() -> Result<(), MemslotError> {
    let listener = listener().with_page_size(0x20_0000);
    assert_eq!(listener.page_size(), 0x20_0000);

    let section = RegionSection::ram(Gpa(0x10_0000), Hva(0x7f00_0000), 0x40_0000);
    let slot = listener.region_add(&section)?.expect("one large page remains");

    assert_eq!(slot.guest_phys_addr(), Gpa(0x20_0000));
    assert_eq!(slot.userspace_addr(), Hva(0x7f10_0000));
    assert_eq!(slot.memory_size(), 0x20_0000);

    listener.region_remove(&section)?;
    assert!(listener.core().snapshot().is_empty());

    Ok(())
}

#[test]
#[should_panic(expected = "not a power of two")]
fn page_size_must_be_power_of_two() {
    let _ = listener().with_page_size(0x3000);
}

///////////////////////////////////////////////////////////////////////////////
// Unmapped GPA Faults
///////////////////////////////////////////////////////////////////////////////

#[test]
fn fault_without_slot_goes_to_mmio() -> Result<(), MemslotError> {
    let mmio = Arc::new(RecordingMmio::default());
    let listener = listener().with_mmio_handler(mmio.clone());

    listener.on_region_add(Gpa(0x0), Hva(0x7f00_0000), 0x1000, false)?;

    assert_eq!(
        listener.unmapped_gpa_fault(Gpa(0xfee0_0000))?,
        FaultOutcome::Emulated
    );
    assert_eq!(*mmio.accesses.lock(), vec![Gpa(0xfee0_0000)]);

    Ok(())
}

#[test]
fn fault_without_mmio_handler_is_unhandled() {
    let listener = listener();

    assert!(matches!(
        listener.unmapped_gpa_fault(Gpa(0xfee0_0000)),
        Err(MemslotError::Unhandled(Gpa(0xfee0_0000)))
    ));
}

#[test]
fn fault_without_overlap_is_unresolved() -> Result<(), MemslotError> {
    let mmio = Arc::new(RecordingMmio::default());
    let listener = listener().with_mmio_handler(mmio.clone());

    listener.on_region_add(Gpa(0x0), Hva(0x7f00_0000), 0x2000, false)?;

    assert_eq!(
        listener.unmapped_gpa_fault(Gpa(0x1000))?,
        FaultOutcome::Unresolved
    );
    assert!(mmio.accesses.lock().is_empty());
    assert_eq!(listener.core().driver().map_calls(), 1);

    Ok(())
}

use memslot_core::{Gpa, Hva, MemslotCore, MemslotError, RemapOutcome, SlotTable};

use super::{Error, MemslotTrackingDriver, TrackedMapping};

#[test]
fn map_and_unmap() -> Result<(), MemslotError> {
    let driver = MemslotTrackingDriver::new();
    let table = SlotTable::new();
    let slot = table
        .lock()
        .append(Gpa(0x10_0000), Hva(0x7f00_0000), 0x4000, true)?;

    driver.try_map(&slot)?;
    assert!(driver.is_mapped(Gpa(0x10_0000)));
    assert_eq!(
        driver.mappings(),
        vec![TrackedMapping {
            gpa: Gpa(0x10_0000),
            hva: Hva(0x7f00_0000),
            size: 0x4000,
            readonly: true,
        }]
    );

    driver.try_unmap(&slot)?;
    assert!(!driver.is_mapped(Gpa(0x10_0000)));
    assert!(driver.mappings().is_empty());
    assert_eq!(driver.map_calls(), 1);
    assert_eq!(driver.unmap_calls(), 1);

    Ok(())
}

#[test]
fn double_map_is_rejected() -> Result<(), MemslotError> {
    let driver = MemslotTrackingDriver::new();
    let table = SlotTable::new();
    let slot = table
        .lock()
        .append(Gpa(0x0), Hva(0x7f00_0000), 0x1000, false)?;

    driver.try_map(&slot)?;
    let err = driver.try_map(&slot).unwrap_err();
    assert!(matches!(err, Error::AlreadyMapped { gpa: Gpa(0x0) }));
    assert_eq!(err.errno(), libc::EEXIST);
    assert_eq!(std::io::Error::from(err).raw_os_error(), Some(libc::EEXIST));

    // The rejected request still counts.
    assert_eq!(driver.map_calls(), 2);
    assert_eq!(driver.mappings().len(), 1);

    Ok(())
}

#[test]
fn overlapping_ranges_are_rejected() -> Result<(), MemslotError> {
    let driver = MemslotTrackingDriver::new();
    let table = SlotTable::new();

    let mut guard = table.lock();
    let base = guard.append(Gpa(0x0), Hva(0x7f00_0000), 0x2000, false)?;
    let guest_alias = guard.append(Gpa(0x1000), Hva(0x9000_0000), 0x2000, false)?;
    let host_alias = guard.append(Gpa(0x10_0000), Hva(0x7f00_1000), 0x1000, false)?;
    drop(guard);

    driver.try_map(&base)?;

    assert!(matches!(
        driver.try_map(&guest_alias),
        Err(Error::GuestOverlap {
            gpa: Gpa(0x1000),
            existing: Gpa(0x0),
        })
    ));
    assert!(matches!(
        driver.try_map(&host_alias),
        Err(Error::HostOverlap {
            hva: Hva(0x7f00_1000),
            existing: Gpa(0x0),
        })
    ));

    // Once the base is gone, the host alias fits.
    driver.try_unmap(&base)?;
    driver.try_map(&host_alias)?;
    assert!(driver.is_mapped(Gpa(0x10_0000)));

    Ok(())
}

#[test]
fn unmap_requires_installed_mapping() -> Result<(), MemslotError> {
    let driver = MemslotTrackingDriver::new();
    let table = SlotTable::new();

    let mut guard = table.lock();
    let slot = guard.append(Gpa(0x0), Hva(0x7f00_0000), 0x2000, false)?;
    let other = guard.append(Gpa(0x0), Hva(0x7f00_0000), 0x1000, false)?;
    drop(guard);

    let err = driver.try_unmap(&slot).unwrap_err();
    assert!(matches!(err, Error::NotMapped { gpa: Gpa(0x0) }));
    assert_eq!(err.errno(), libc::ENOENT);

    driver.try_map(&slot)?;
    let err = driver.try_unmap(&other).unwrap_err();
    assert!(matches!(err, Error::Mismatch { gpa: Gpa(0x0) }));
    assert_eq!(err.errno(), libc::EINVAL);
    assert!(driver.is_mapped(Gpa(0x0)));

    Ok(())
}

#[test]
fn errors_convert_into_driver_errors() {
    let err = MemslotError::from(Error::NotMapped { gpa: Gpa(0x1000) });
    assert!(matches!(err, MemslotError::Driver(_)));
    assert!(err.to_string().contains("0x0000000000001000"));
}

#[test]
fn remap_leaves_only_faulting_slot_installed() -> Result<(), MemslotError> {
    let core = MemslotCore::new(MemslotTrackingDriver::new());

    let mut guard = core.lock();
    let slot1 = guard.append(Gpa(0x0), Hva(0x7f00_0000), 0x2000, false)?;
    let slot2 = guard.append(Gpa(0x10_0000), Hva(0x7f00_1000), 0x2000, false)?;
    core.map_slot(&guard, &slot1);
    drop(guard);

    assert_eq!(core.remap_overlap_region(Gpa(0x10_1000)), RemapOutcome::Ok);

    let driver = core.driver();
    assert!(!slot1.is_mapped());
    assert!(slot2.is_mapped());
    assert_eq!(
        driver.mappings().iter().map(|m| m.gpa).collect::<Vec<_>>(),
        vec![Gpa(0x10_0000)]
    );
    assert_eq!(driver.map_calls(), 2);
    assert_eq!(driver.unmap_calls(), 1);

    Ok(())
}

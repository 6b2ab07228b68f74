use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use memslot::{
    Gpa, Hva, MemslotCore,
    driver::tracking::MemslotTrackingDriver,
    listener::{FaultOutcome, MemoryListener},
};

const VCPUS: usize = 4;
const HOST_BASE: Hva = Hva(0x7f00_0000_0000);
const ALIAS_SIZE: u64 = 0x10_0000;

// Both aliases are backed by the same host memory.
const ALIAS_LOW: Gpa = Gpa(0x1000_0000);
const ALIAS_HIGH: Gpa = Gpa(0x2000_0000);

// A DIMM with its own host memory.
const DIMM_GPA: Gpa = Gpa(0x1_0000_0000);
const DIMM_HVA: Hva = Hva(0x7f10_0000_0000);
const DIMM_SIZE: u64 = 0x4000_0000;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        // Racing vCPUs report every lost swap as a warning.
        .with_max_level(tracing::Level::ERROR)
        .with_target(false)
        .init();

    let core = Arc::new(MemslotCore::new(MemslotTrackingDriver::new()));
    let listener = Arc::new(MemoryListener::new(core.clone()));

    listener.on_region_add(ALIAS_LOW, HOST_BASE, ALIAS_SIZE, false)?;
    listener.on_region_add(ALIAS_HIGH, HOST_BASE, ALIAS_SIZE, false)?;

    let done = Arc::new(AtomicBool::new(false));

    // Each vCPU keeps touching both aliases, which forces a swap on almost
    // every access.
    let vcpus: Vec<_> = (0..VCPUS)
        .map(|vcpu| {
            let listener = listener.clone();
            let done = done.clone();

            thread::spawn(move || {
                let mut faults = 0usize;
                let mut remapped = 0usize;
                let mut unresolved = 0usize;

                while !done.load(Ordering::Relaxed) {
                    let gpa = if (faults + vcpu) % 2 == 0 {
                        ALIAS_LOW
                    } else {
                        ALIAS_HIGH
                    };

                    faults += 1;
                    match listener.unmapped_gpa_fault(gpa + 0x800) {
                        Ok(FaultOutcome::Remapped) => remapped += 1,
                        Ok(FaultOutcome::Unresolved) => unresolved += 1,
                        Ok(FaultOutcome::Emulated) | Err(_) => unreachable!("alias without slot"),
                    }
                }

                (faults, remapped, unresolved)
            })
        })
        .collect();

    // Meanwhile, plug and unplug the DIMM.
    for _ in 0..100 {
        listener.on_region_add(DIMM_GPA, DIMM_HVA, DIMM_SIZE, false)?;
        thread::sleep(Duration::from_micros(50));
        listener.on_region_remove(DIMM_GPA, DIMM_HVA, DIMM_SIZE)?;
        thread::sleep(Duration::from_micros(50));
    }

    done.store(true, Ordering::Relaxed);

    for (vcpu, handle) in vcpus.into_iter().enumerate() {
        let (faults, remapped, unresolved) =
            handle.join().map_err(|_| "vCPU thread panicked")?;
        println!("vCPU {vcpu}: {faults} faults, {remapped} remaps, {unresolved} lost races");
    }

    let snapshot = core.snapshot();
    let mapped = snapshot.iter().filter(|slot| slot.is_mapped()).count();
    assert!(mapped <= 1, "overlapping slots installed at once");

    println!("{:#?}", core.info());
    println!(
        "driver: {} maps, {} unmaps",
        core.driver().map_calls(),
        core.driver().unmap_calls()
    );

    Ok(())
}

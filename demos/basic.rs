use std::sync::Arc;

use memslot::{
    Gpa, Hva, MemslotCore, MemslotError,
    driver::tracking::MemslotTrackingDriver,
    listener::{MemoryListener, MmioHandler, RegionFlags, RegionSection},
};

struct PrintMmio;

impl MmioHandler for PrintMmio {
    fn handle_mmio(&self, gpa: Gpa) -> Result<(), MemslotError> {
        println!("MMIO access at {gpa}");
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(false)
        .init();

    // Setup the slot table.
    let core = Arc::new(MemslotCore::new(MemslotTrackingDriver::new()));
    let listener = MemoryListener::new(core.clone()).with_mmio_handler(PrintMmio);

    // Low RAM, the BIOS ROM and the local APIC.
    let sections = [
        RegionSection::ram(Gpa(0x0), Hva(0x7f00_0000_0000), 0xa_0000),
        RegionSection::new(
            Gpa(0xfffc_0000),
            Hva(0x7f10_0000_0000),
            0x4_0000,
            RegionFlags::ROM_DEVICE | RegionFlags::ROMD_MODE,
        ),
        RegionSection::new(
            Gpa(0xfee0_0000),
            Hva(0x0),
            0x1000,
            RegionFlags::empty(),
        ),
    ];

    for section in &sections {
        match listener.region_add(section)? {
            Some(slot) => println!("{:#?}", slot.info()),
            None => println!("no slot for section at {}", section.gpa),
        }
    }

    core.table().dump();

    // Faults on RAM need no remap; the APIC is emulated.
    for gpa in [Gpa(0x1000), Gpa(0xfee0_0020)] {
        let outcome = listener.unmapped_gpa_fault(gpa)?;
        println!("fault at {gpa}: {outcome:?}");
    }

    println!("{:#?}", core.info());
    println!("installed: {:#?}", core.driver().mappings());

    Ok(())
}

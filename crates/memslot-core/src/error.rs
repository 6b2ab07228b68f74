use crate::{Gpa, Hva};

/// An error that can occur when working with memory slots.
#[derive(thiserror::Error, Debug)]
pub enum MemslotError {
    /// An error occurred in the memory slot driver.
    #[error(transparent)]
    Driver(Box<dyn std::error::Error + Send + Sync>),

    /// The slot table is full.
    #[error("No free memory slots (maximum: {max})")]
    NoFreeSlots {
        /// The configured maximum slot count.
        max: usize,
    },

    /// The slot is not present in the table.
    #[error("Memory slot not found")]
    NotFound,

    /// A slot with the same GPA, HVA and size is already registered.
    #[error("Memory region already registered (gpa: {gpa}, hva: {hva}, size: {size:#x})")]
    DuplicateRegion {
        /// Guest physical address of the region.
        gpa: Gpa,

        /// Host virtual address of the region.
        hva: Hva,

        /// Size of the region in bytes.
        size: u64,
    },

    /// The region is empty or wraps around the address space.
    #[error("Invalid memory region (gpa: {gpa}, hva: {hva}, size: {size:#x})")]
    InvalidRegion {
        /// Guest physical address of the region.
        gpa: Gpa,

        /// Host virtual address of the region.
        hva: Hva,

        /// Size of the region in bytes.
        size: u64,
    },

    /// An access to the given address could not be handled.
    #[error("Unhandled access at {0}")]
    Unhandled(Gpa),
}

impl MemslotError {
    /// Wraps a driver-specific error.
    pub fn driver(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Driver(Box::new(err))
    }
}

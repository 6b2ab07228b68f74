use std::sync::Arc;

use memslot_core::{Gpa, MemslotError};

/// Emulates accesses to guest physical addresses that no slot covers.
pub trait MmioHandler {
    /// Handles an access to `gpa`.
    fn handle_mmio(&self, gpa: Gpa) -> Result<(), MemslotError>;
}

impl<T> MmioHandler for &T
where
    T: MmioHandler + ?Sized,
{
    fn handle_mmio(&self, gpa: Gpa) -> Result<(), MemslotError> {
        (**self).handle_mmio(gpa)
    }
}

impl<T> MmioHandler for Arc<T>
where
    T: MmioHandler + ?Sized,
{
    fn handle_mmio(&self, gpa: Gpa) -> Result<(), MemslotError> {
        (**self).handle_mmio(gpa)
    }
}

/// MMIO handler that rejects every access.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMmio;

impl MmioHandler for NoMmio {
    fn handle_mmio(&self, gpa: Gpa) -> Result<(), MemslotError> {
        tracing::warn!(%gpa, "no MMIO handler for unmapped address");
        Err(MemslotError::Unhandled(gpa))
    }
}

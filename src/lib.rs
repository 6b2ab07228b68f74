//! Guest memory slot management for hypervisors.
//!
//! Tracks the guest physical memory slots of a virtual machine, installs
//! them through a [`MemslotDriver`], and resolves faults on slots whose
//! host memory overlaps another installed slot.
//!
//! This crate re-exports [`memslot_core`] at its root. The optional parts
//! live in submodules, each behind a cargo feature:
//!
//! - [`driver::tracking`] (`driver-tracking`): an in-process driver that
//!   records installed mappings.
//! - [`listener`] (`listener`): translates memory-region changes into slot
//!   table updates and dispatches unmapped-GPA faults.
//!
//! # Example
//!
//! ```
//! # #[cfg(all(feature = "driver-tracking", feature = "listener"))]
//! # fn main() -> Result<(), memslot::MemslotError> {
//! use std::sync::Arc;
//!
//! use memslot::{
//!     Gpa, Hva, MemslotCore,
//!     driver::tracking::MemslotTrackingDriver,
//!     listener::{FaultOutcome, MemoryListener},
//! };
//!
//! let core = Arc::new(MemslotCore::new(MemslotTrackingDriver::new()));
//! let listener = MemoryListener::new(core.clone());
//!
//! // Two regions backed by the same host memory. Only the first one is
//! // installed right away.
//! listener.on_region_add(Gpa(0x0), Hva(0x7f00_0000), 0x2000, false)?;
//! listener.on_region_add(Gpa(0x10_0000), Hva(0x7f00_0000), 0x2000, false)?;
//!
//! // The guest touches the second region, which swaps the two.
//! let outcome = listener.unmapped_gpa_fault(Gpa(0x10_0000))?;
//! assert_eq!(outcome, FaultOutcome::Remapped);
//! assert!(core.driver().is_mapped(Gpa(0x10_0000)));
//! # Ok(())
//! # }
//! # #[cfg(not(all(feature = "driver-tracking", feature = "listener")))]
//! # fn main() {}
//! ```

pub use memslot_core::*;

/// Memory slot drivers.
pub mod driver {
    /// In-process driver that tracks installed mappings.
    #[cfg(feature = "driver-tracking")]
    pub mod tracking {
        pub use memslot_driver_tracking::*;
    }
}

/// Memory listener and unmapped-GPA fault dispatch.
#[cfg(feature = "listener")]
pub mod listener {
    pub use memslot_listener::*;
}

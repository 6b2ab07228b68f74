use memslot_core::{Gpa, Hva};

/// Error type for the tracking driver.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A mapping already starts at the guest address.
    #[error("Mapping already installed at {gpa}")]
    AlreadyMapped {
        /// Guest physical address of the rejected mapping.
        gpa: Gpa,
    },

    /// The guest range overlaps an installed mapping.
    #[error("Guest range at {gpa} overlaps mapping at {existing}")]
    GuestOverlap {
        /// Guest physical address of the rejected mapping.
        gpa: Gpa,

        /// Guest physical address of the installed mapping.
        existing: Gpa,
    },

    /// The host range overlaps an installed mapping.
    #[error("Host range at {hva} overlaps mapping at {existing}")]
    HostOverlap {
        /// Host virtual address of the rejected mapping.
        hva: Hva,

        /// Guest physical address of the installed mapping.
        existing: Gpa,
    },

    /// No mapping is installed at the guest address.
    #[error("No mapping installed at {gpa}")]
    NotMapped {
        /// Guest physical address of the unmap request.
        gpa: Gpa,
    },

    /// The installed mapping differs from the unmap request.
    #[error("Mapping at {gpa} does not match the unmap request")]
    Mismatch {
        /// Guest physical address of the unmap request.
        gpa: Gpa,
    },
}

impl Error {
    /// Returns the errno a hypervisor would report for this error.
    pub fn errno(&self) -> i32 {
        match self {
            Self::AlreadyMapped { .. } | Self::GuestOverlap { .. } | Self::HostOverlap { .. } => {
                libc::EEXIST
            }
            Self::NotMapped { .. } => libc::ENOENT,
            Self::Mismatch { .. } => libc::EINVAL,
        }
    }
}

impl From<Error> for std::io::Error {
    fn from(value: Error) -> Self {
        Self::from_raw_os_error(value.errno())
    }
}

impl From<Error> for memslot_core::MemslotError {
    fn from(value: Error) -> Self {
        Self::driver(value)
    }
}

mod address;
pub(crate) mod macros;

pub use self::address::{Gpa, Hva, SlotId};

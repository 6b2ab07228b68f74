use serde::{Deserialize, Serialize};

use super::macros::impl_address;

impl_address!(Gpa, u64, "Guest Physical Address");
impl_address!(Hva, u64, "Host (userspace) Virtual Address");

/// A memory slot identifier.
///
/// Identifiers are handed out in increasing order by the owning table and
/// wrap around after `u32::MAX`. They exist for logging; slot identity is
/// the shared allocation itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlotId(pub u32);

impl std::fmt::Display for SlotId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

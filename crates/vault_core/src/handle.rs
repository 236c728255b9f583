//! Handle keys
//!
//! A [`HandleKey`] names one slot in the [`HandleCache`] plus the generation
//! that slot was on when the key was issued. Releasing a slot bumps its
//! generation, so keys issued before the release stop resolving even after
//! the slot is reused.
//!
//! [`HandleCache`]: crate::HandleCache

use std::fmt;

/// Slot position and the generation it was issued for.
///
/// Only the cache mints keys; host code receives them from the cache or from
/// a checked script handle.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct HandleKey {
    index: u32,
    generation: u32,
}

impl HandleKey {
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Single integer form, generation in the high half. Used for logs and
    /// as a sortable id.
    pub fn to_bits(&self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.index)
    }
}

impl fmt::Display for HandleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

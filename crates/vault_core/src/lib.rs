//! Vault Core
//!
//! Ownership bookkeeping shared by the scripting bridge:
//! - Generational handle keys handed to scripts
//! - The handle ownership cache that owns every native instance

pub mod cache;
pub mod handle;

pub use cache::{CacheError, DestroyFn, HandleCache, HandleSlot, Instance, InstanceCell};
pub use handle::HandleKey;

/// Engine version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }
}

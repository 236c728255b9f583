//! Handle ownership cache
//!
//! The cache is the sole owner of every native instance handed to scripts.
//! Scripts only ever see a [`HandleKey`]; releasing that key destroys the
//! instance exactly once. If host code still borrows the instance at that
//! point, the destructor runs when the last borrower lets go.

use crate::HandleKey;
use std::any::Any;
use std::cell::{BorrowError, BorrowMutError, Cell, Ref, RefCell, RefMut};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use thiserror::Error;

/// Shared access to an owned native instance.
pub type Instance = Rc<InstanceCell>;

/// Type-erased destructor run when an instance is torn down.
pub type DestroyFn = Rc<dyn Fn(Box<dyn Any>)>;

/// Errors reported by the cache. They indicate a defect in the caller, not
/// bad script input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("no live slot for handle {key} (double release or corrupted handle)")]
    InternalConsistency { key: HandleKey },
}

/// A native instance together with the destructor that tears it down.
///
/// The destructor runs when the cell itself is dropped, i.e. once the cache
/// slot and every outstanding [`Instance`] clone are gone.
pub struct InstanceCell {
    identity: Rc<str>,
    value: RefCell<Box<dyn Any>>,
    destroy: DestroyFn,
}

impl InstanceCell {
    /// Type identity the instance was created under.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn borrow(&self) -> Ref<'_, Box<dyn Any>> {
        self.value.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, Box<dyn Any>> {
        self.value.borrow_mut()
    }

    pub fn try_borrow(&self) -> Result<Ref<'_, Box<dyn Any>>, BorrowError> {
        self.value.try_borrow()
    }

    pub fn try_borrow_mut(&self) -> Result<RefMut<'_, Box<dyn Any>>, BorrowMutError> {
        self.value.try_borrow_mut()
    }
}

impl Drop for InstanceCell {
    fn drop(&mut self) {
        // Zero-sized placeholder, no allocation.
        let value = std::mem::replace(self.value.get_mut(), Box::new(()));
        let destroy = Rc::clone(&self.destroy);

        if panic::catch_unwind(AssertUnwindSafe(|| destroy(value))).is_err() {
            tracing::error!(identity = %self.identity, "destructor panicked: caught unknown exception");
        }
    }
}

/// Owning record for one native instance.
pub struct HandleSlot {
    instance: Instance,
}

impl HandleSlot {
    pub fn new(identity: Rc<str>, instance: Box<dyn Any>, destroy: DestroyFn) -> Self {
        Self {
            instance: Rc::new(InstanceCell {
                identity,
                value: RefCell::new(instance),
                destroy,
            }),
        }
    }

    /// Type identity the instance was created under.
    pub fn identity(&self) -> &str {
        self.instance.identity()
    }

    /// Whether something besides this slot still holds the instance.
    fn is_shared(&self) -> bool {
        Rc::strong_count(&self.instance) > 1
    }
}

struct Entry {
    generation: u32,
    slot: Option<HandleSlot>,
}

/// Slot table keyed by generational index.
///
/// Not thread-safe: every call happens on the script thread. No internal
/// borrow is held while a destructor runs, so destructors (and finalizers
/// running inside the collector) may call back into the cache.
#[derive(Default)]
pub struct HandleCache {
    entries: RefCell<Vec<Entry>>,
    free: RefCell<Vec<u32>>,
    live: Cell<usize>,
}

impl HandleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new owning slot and return the key scripts will alias it by.
    pub fn insert(&self, slot: HandleSlot) -> HandleKey {
        let mut entries = self.entries.borrow_mut();
        let reused = self.free.borrow_mut().pop();

        let key = match reused {
            Some(index) => {
                let entry = &mut entries[index as usize];
                entry.slot = Some(slot);
                HandleKey::new(index, entry.generation)
            }
            None => {
                let index = u32::try_from(entries.len()).expect("handle cache exceeded u32 slots");
                entries.push(Entry {
                    generation: 0,
                    slot: Some(slot),
                });
                HandleKey::new(index, 0)
            }
        };

        self.live.set(self.live.get() + 1);
        tracing::trace!(%key, live = self.live.get(), "slot inserted");
        key
    }

    /// Remove the slot owned under `key` and run its destructor once.
    ///
    /// The destructor runs immediately unless an [`Instance`] obtained from
    /// [`HandleCache::instance`] is still alive; then it runs when the last
    /// one is dropped. A key that matches no live slot leaves the cache
    /// untouched and reports [`CacheError::InternalConsistency`].
    pub fn release(&self, key: HandleKey) -> Result<(), CacheError> {
        let slot = self.take(key)?;
        let deferred = slot.is_shared();
        tracing::trace!(%key, identity = slot.identity(), live = self.live.get(), deferred, "slot released");
        drop(slot);
        Ok(())
    }

    /// Shared access to the instance owned under `key`.
    pub fn instance(&self, key: HandleKey) -> Result<Instance, CacheError> {
        let entries = self.entries.borrow();
        entries
            .get(key.index() as usize)
            .filter(|entry| entry.generation == key.generation())
            .and_then(|entry| entry.slot.as_ref())
            .map(|slot| Rc::clone(&slot.instance))
            .ok_or(CacheError::InternalConsistency { key })
    }

    pub fn contains(&self, key: HandleKey) -> bool {
        self.instance(key).is_ok()
    }

    /// Number of live slots.
    pub fn len(&self) -> usize {
        self.live.get()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn take(&self, key: HandleKey) -> Result<HandleSlot, CacheError> {
        let slot = {
            let mut entries = self.entries.borrow_mut();
            match entries.get_mut(key.index() as usize) {
                Some(entry) if entry.generation == key.generation() => {
                    let slot = entry.slot.take();
                    if slot.is_some() {
                        entry.generation = entry.generation.wrapping_add(1);
                    }
                    slot
                }
                _ => None,
            }
        };

        let slot = slot.ok_or(CacheError::InternalConsistency { key })?;
        self.free.borrow_mut().push(key.index());
        self.live.set(self.live.get() - 1);
        Ok(slot)
    }
}

impl Drop for HandleCache {
    fn drop(&mut self) {
        let leaked: Vec<(HandleKey, HandleSlot)> = self
            .entries
            .get_mut()
            .iter_mut()
            .enumerate()
            .filter_map(|(index, entry)| {
                let key = HandleKey::new(index as u32, entry.generation);
                entry.slot.take().map(|slot| (key, slot))
            })
            .collect();

        if leaked.is_empty() {
            return;
        }

        tracing::warn!(count = leaked.len(), "destroying slots still owned at cache teardown");
        for (key, slot) in leaked {
            tracing::debug!(%key, identity = slot.identity(), "leaked slot destroyed");
        }
    }
}

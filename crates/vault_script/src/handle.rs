//! Script-visible handles
//!
//! A handle is a Lua userdata that aliases one cache slot by key. It never
//! owns the native instance; dropping it (explicitly or from the collector)
//! asks the cache to release the slot.

use crate::binding::{ErasedMethod, RegisteredType};
use crate::error::{guarded, BindingError};
use mlua::{Function, Lua, MetaMethod, MultiValue, Table, UserData, UserDataMethods, Value};
use std::cell::{Cell, Ref, RefMut};
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;
use vault_core::{HandleCache, HandleKey, Instance};

pub(crate) struct NativeHandle {
    binding: Rc<RegisteredType>,
    cache: Rc<HandleCache>,
    key: Cell<Option<HandleKey>>,
}

impl NativeHandle {
    pub(crate) fn new(binding: Rc<RegisteredType>, cache: Rc<HandleCache>, key: HandleKey) -> Self {
        Self {
            binding,
            cache,
            key: Cell::new(Some(key)),
        }
    }

    pub(crate) fn identity(&self) -> &str {
        &self.binding.identity
    }

    pub(crate) fn cache(&self) -> &Rc<HandleCache> {
        &self.cache
    }

    pub(crate) fn key(&self) -> Option<HandleKey> {
        self.key.get()
    }

    pub(crate) fn instance(&self) -> Result<Instance, BindingError> {
        let key = self.key().ok_or_else(|| BindingError::TypeMismatch {
            expected: self.identity().to_string(),
            found: "released handle".to_string(),
        })?;
        Ok(self.cache.instance(key)?)
    }

    /// Release the aliased slot. Later calls are no-ops.
    pub(crate) fn release(&self) -> Result<(), BindingError> {
        match self.key.take() {
            Some(key) => Ok(self.cache.release(key)?),
            None => Ok(()),
        }
    }

    fn lookup(&self, lua: &Lua, name: &str) -> mlua::Result<Value> {
        let methods = method_table(lua, &self.binding)?;
        methods.get(name)
    }
}

impl Drop for NativeHandle {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            tracing::error!(identity = self.identity(), %err, "finalizer could not release handle");
        }
    }
}

impl fmt::Display for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.key() {
            Some(key) => write!(f, "{}: {}", self.identity(), key),
            None => write!(f, "{}: released", self.identity()),
        }
    }
}

impl UserData for NativeHandle {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_meta_method(MetaMethod::Index, |lua, this, name: String| {
            this.lookup(lua, &name)
        });
        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| Ok(this.to_string()));
    }
}

/// Per-state table of dispatch functions for one binding, built on first use.
fn method_table(lua: &Lua, binding: &Rc<RegisteredType>) -> mlua::Result<Table> {
    let registry_key = format!("vault.methods.{}", binding.id);
    let cached: Option<Table> = lua.named_registry_value(&registry_key)?;
    if let Some(table) = cached {
        return Ok(table);
    }

    let table = lua.create_table()?;
    for (name, method) in &binding.methods {
        let function = dispatcher(lua, Rc::clone(&binding.identity), Rc::clone(method))?;
        table.set(name.as_str(), function)?;
    }
    lua.set_named_registry_value(&registry_key, table.clone())?;
    Ok(table)
}

/// Wrap an erased method so it can be called as `handle:name(...)`.
fn dispatcher(lua: &Lua, identity: Rc<str>, method: ErasedMethod) -> mlua::Result<Function> {
    lua.create_function(move |lua, (receiver, args): (Value, MultiValue)| {
        let instance = receiver_instance(&identity, &receiver)?;
        let mut this = instance.try_borrow_mut().map_err(|_| BindingError::InstanceBusy {
            identity: identity.to_string(),
        })?;

        match guarded(|| method(lua, &mut **this, args)) {
            Ok(result) => result,
            Err(message) => Err(mlua::Error::runtime(message)),
        }
    })
}

fn receiver_instance(identity: &str, receiver: &Value) -> Result<Instance, BindingError> {
    let mismatch = |found: String| BindingError::TypeMismatch {
        expected: identity.to_string(),
        found,
    };

    let Value::UserData(ud) = receiver else {
        return Err(mismatch(receiver.type_name().to_string()));
    };
    let handle = ud
        .borrow::<NativeHandle>()
        .map_err(|_| mismatch("foreign userdata".to_string()))?;
    if handle.identity() != identity {
        return Err(mismatch(format!("`{}'", handle.identity())));
    }
    handle.instance()
}

/// Checked, typed view of a native instance owned by the cache.
///
/// Holding a `Native` keeps the instance borrowed from the cache; drop it
/// before the handle is finalized.
pub struct Native<T> {
    key: HandleKey,
    instance: Instance,
    _type: PhantomData<fn() -> T>,
}

impl<T: 'static> Native<T> {
    pub(crate) fn new(key: HandleKey, instance: Instance) -> Self {
        Self {
            key,
            instance,
            _type: PhantomData,
        }
    }

    /// Key of the slot that owns the instance.
    pub fn key(&self) -> HandleKey {
        self.key
    }

    /// Shared borrow of the instance.
    ///
    /// # Panics
    ///
    /// Panics if the instance is mutably borrowed, e.g. by a method that is
    /// running on it. Use [`Native::try_borrow`] to handle that case.
    pub fn borrow(&self) -> Ref<'_, T> {
        self.try_borrow().unwrap_or_else(|err| panic!("{err}"))
    }

    /// Exclusive borrow of the instance.
    ///
    /// # Panics
    ///
    /// Panics if the instance is already borrowed.
    pub fn borrow_mut(&self) -> RefMut<'_, T> {
        self.try_borrow_mut().unwrap_or_else(|err| panic!("{err}"))
    }

    pub fn try_borrow(&self) -> Result<Ref<'_, T>, BindingError> {
        let value = self.instance.try_borrow().map_err(|_| self.busy())?;
        Ref::filter_map(value, |value| (**value).downcast_ref::<T>()).map_err(|_| self.mismatch())
    }

    pub fn try_borrow_mut(&self) -> Result<RefMut<'_, T>, BindingError> {
        let value = self.instance.try_borrow_mut().map_err(|_| self.busy())?;
        RefMut::filter_map(value, |value| (**value).downcast_mut::<T>()).map_err(|_| self.mismatch())
    }

    fn busy(&self) -> BindingError {
        BindingError::InstanceBusy {
            identity: self.instance.identity().to_string(),
        }
    }

    fn mismatch(&self) -> BindingError {
        BindingError::TypeMismatch {
            expected: self.instance.identity().to_string(),
            found: "another native type".to_string(),
        }
    }
}

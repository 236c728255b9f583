//! Native type bindings
//!
//! A [`TypeBinding`] describes everything a native type must provide to be
//! usable from scripts: an identity, a factory, a destructor and a method
//! table. The [`TypeRegistry`] owns the bindings, creates instances into the
//! handle cache and validates handles coming back from scripts.

use crate::error::{guarded, BindingError};
use crate::handle::{Native, NativeHandle};
use mlua::{AnyUserData, FromLuaMulti, IntoLuaMulti, Lua, MultiValue, Table, Value};
use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use vault_core::{DestroyFn, HandleCache, HandleKey, HandleSlot, Instance};

/// Runtime-callable entry point bound to a native type.
pub type Method<T> = Rc<dyn Fn(&Lua, &mut T, MultiValue) -> mlua::Result<MultiValue>>;

type Factory<T> = Box<dyn Fn() -> anyhow::Result<T>>;
type Destructor<T> = Box<dyn Fn(T)>;

/// Source of [`RegisteredType::id`]; never reused within a process.
static NEXT_BINDING_ID: AtomicU64 = AtomicU64::new(0);

pub(crate) type ErasedMethod = Rc<dyn Fn(&Lua, &mut dyn Any, MultiValue) -> mlua::Result<MultiValue>>;

/// Configuration for one native type.
///
/// ```ignore
/// let binding = TypeBinding::<Foo>::new("foo")
///     .method("get_a", |_, foo, ()| Ok(foo.a.clone()))
///     .method("set_a", |_, foo, a: String| {
///         foo.a = a;
///         Ok(())
///     });
/// registry.register(binding)?;
/// ```
pub struct TypeBinding<T> {
    identity: String,
    create: Factory<T>,
    destroy: Destructor<T>,
    methods: HashMap<String, Method<T>>,
}

impl<T: Default + 'static> TypeBinding<T> {
    /// Binding whose factory is `T::default()` and whose destructor drops.
    pub fn new(identity: impl Into<String>) -> Self {
        Self::with_factory(identity, || Ok(T::default()))
    }
}

impl<T: 'static> TypeBinding<T> {
    pub fn with_factory<F>(identity: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> anyhow::Result<T> + 'static,
    {
        Self {
            identity: identity.into(),
            create: Box::new(factory),
            destroy: Box::new(drop::<T>),
            methods: HashMap::new(),
        }
    }

    /// Replace the factory.
    pub fn factory<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> anyhow::Result<T> + 'static,
    {
        self.create = Box::new(factory);
        self
    }

    /// Replace the destructor, e.g. to release external resources.
    pub fn destructor<F>(mut self, destroy: F) -> Self
    where
        F: Fn(T) + 'static,
    {
        self.destroy = Box::new(destroy);
        self
    }

    /// Add a method with typed arguments and results.
    pub fn method<A, R, F>(self, name: impl Into<String>, method: F) -> Self
    where
        A: FromLuaMulti,
        R: IntoLuaMulti,
        F: Fn(&Lua, &mut T, A) -> mlua::Result<R> + 'static,
    {
        let entry: Method<T> = Rc::new(move |lua: &Lua, this: &mut T, args: MultiValue| {
            let args = A::from_lua_multi(args, lua)?;
            method(lua, this, args)?.into_lua_multi(lua)
        });
        self.raw_method(name, entry)
    }

    /// Add a method working on the raw argument list.
    pub fn raw_method(mut self, name: impl Into<String>, method: Method<T>) -> Self {
        let name = name.into();
        if self.methods.insert(name.clone(), method).is_some() {
            tracing::warn!(identity = %self.identity, method = %name, "method redefined");
        }
        self
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }

    fn erase(self) -> RegisteredType {
        let TypeBinding {
            identity,
            create,
            destroy,
            methods,
        } = self;
        let identity: Rc<str> = Rc::from(identity);

        let tag = Rc::clone(&identity);
        let destroy: DestroyFn = Rc::new(move |instance: Box<dyn Any>| {
            match instance.downcast::<T>() {
                Ok(value) => destroy(*value),
                Err(_) => tracing::error!(identity = %tag, "destructor received a foreign instance"),
            }
        });

        let methods = methods
            .into_iter()
            .map(|(name, method)| {
                let tag = Rc::clone(&identity);
                let erased: ErasedMethod =
                    Rc::new(move |lua: &Lua, instance: &mut dyn Any, args: MultiValue| {
                        let this = instance.downcast_mut::<T>().ok_or_else(|| {
                            mlua::Error::runtime(format!("expected instance of type `{tag}'"))
                        })?;
                        method(lua, this, args)
                    });
                (name, erased)
            })
            .collect();

        RegisteredType {
            id: NEXT_BINDING_ID.fetch_add(1, Ordering::Relaxed),
            identity,
            create: Box::new(move || create().map(|value| Box::new(value) as Box<dyn Any>)),
            destroy,
            methods,
        }
    }
}

/// Type-erased binding as stored in the registry. Immutable once registered.
pub(crate) struct RegisteredType {
    /// Process-unique id, used to key per-state caches.
    pub(crate) id: u64,
    pub(crate) identity: Rc<str>,
    create: Box<dyn Fn() -> anyhow::Result<Box<dyn Any>>>,
    destroy: DestroyFn,
    pub(crate) methods: HashMap<String, ErasedMethod>,
}

struct RegistryInner {
    cache: Rc<HandleCache>,
    types: RefCell<HashMap<String, Rc<RegisteredType>>>,
}

thread_local! {
    static SHARED: TypeRegistry = TypeRegistry::new();
}

/// Identity → binding map plus the cache that owns every created instance.
///
/// Cloning is cheap and shares the same bindings and cache.
#[derive(Clone)]
pub struct TypeRegistry {
    inner: Rc<RegistryInner>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::with_cache(Rc::new(HandleCache::new()))
    }

    pub fn with_cache(cache: Rc<HandleCache>) -> Self {
        Self {
            inner: Rc::new(RegistryInner {
                cache,
                types: RefCell::new(HashMap::new()),
            }),
        }
    }

    /// Registry shared by everything running on the script thread.
    pub fn shared() -> Self {
        SHARED.with(Clone::clone)
    }

    pub fn cache(&self) -> &Rc<HandleCache> {
        &self.inner.cache
    }

    /// Register a binding. Each identity may be registered once.
    pub fn register<T: 'static>(&self, binding: TypeBinding<T>) -> Result<(), BindingError> {
        let mut types = self.inner.types.borrow_mut();
        if types.contains_key(binding.identity()) {
            return Err(BindingError::Registration {
                identity: binding.identity().to_string(),
            });
        }

        let registered = binding.erase();
        tracing::debug!(
            identity = %registered.identity,
            methods = registered.methods.len(),
            "type registered"
        );
        types.insert(registered.identity.to_string(), Rc::new(registered));
        Ok(())
    }

    pub fn is_registered(&self, identity: &str) -> bool {
        self.inner.types.borrow().contains_key(identity)
    }

    /// Registered identities in sorted order.
    pub fn identities(&self) -> Vec<String> {
        let mut identities: Vec<String> = self.inner.types.borrow().keys().cloned().collect();
        identities.sort_unstable();
        identities
    }

    /// Construct a new instance of `identity` and hand back its script handle.
    pub fn create(&self, lua: &Lua, identity: &str) -> Result<AnyUserData, BindingError> {
        let binding = self.binding(identity)?;

        let instance = match guarded(|| (binding.create)()) {
            Ok(Ok(instance)) => instance,
            Ok(Err(err)) => {
                return Err(BindingError::Construction {
                    identity: identity.to_string(),
                    message: format!("{err:#}"),
                })
            }
            Err(message) => {
                return Err(BindingError::Construction {
                    identity: identity.to_string(),
                    message,
                })
            }
        };

        let slot = HandleSlot::new(
            Rc::clone(&binding.identity),
            instance,
            Rc::clone(&binding.destroy),
        );
        let key = self.inner.cache.insert(slot);
        tracing::debug!(identity, %key, "native instance created");

        // On failure the handle is dropped inside mlua, which releases the slot.
        let handle = NativeHandle::new(binding, Rc::clone(&self.inner.cache), key);
        lua.create_userdata(handle)
            .map_err(|err| BindingError::Construction {
                identity: identity.to_string(),
                message: err.to_string(),
            })
    }

    /// Validate that `value` is a live handle tagged `expected` owning a `T`.
    pub fn check<T: 'static>(&self, value: &Value, expected: &str) -> Result<Native<T>, BindingError> {
        let (key, instance) = self.check_erased(value, expected)?;

        let holds_type = match instance.try_borrow() {
            Ok(value) => (**value).is::<T>(),
            Err(_) => {
                return Err(BindingError::InstanceBusy {
                    identity: expected.to_string(),
                })
            }
        };
        if !holds_type {
            return Err(BindingError::TypeMismatch {
                expected: expected.to_string(),
                found: format!("`{expected}' handle with another native type"),
            });
        }
        Ok(Native::new(key, instance))
    }

    /// Slot key behind a handle tagged `expected`.
    pub fn key_of(&self, value: &Value, expected: &str) -> Result<HandleKey, BindingError> {
        self.check_erased(value, expected).map(|(key, _)| key)
    }

    /// Finalize a handle: validate it, detach it from its userdata and
    /// release its slot. The collector runs the same release when it drops an
    /// unreachable handle.
    pub fn finalize(&self, value: &Value) -> Result<(), BindingError> {
        let ud = as_userdata(value, "vault handle")?;
        let identity = ud
            .borrow::<NativeHandle>()
            .map(|handle| handle.identity().to_string())
            .map_err(|err| mismatch("vault handle", &err))?;

        let (key, instance) = self.check_erased(value, &identity)?;
        drop(instance);

        let handle = ud.take::<NativeHandle>()?;
        handle.release()?;
        tracing::debug!(identity = %identity, %key, "handle finalized");
        Ok(())
    }

    /// Expose every registered type to scripts as `<namespace>.<identity>.new()`.
    pub fn install(&self, lua: &Lua, namespace: &str) -> mlua::Result<()> {
        let globals = lua.globals();
        let existing: Option<Table> = globals.get(namespace)?;
        let table = match existing {
            Some(table) => table,
            None => {
                let table = lua.create_table()?;
                globals.set(namespace, table.clone())?;
                table
            }
        };

        for identity in self.identities() {
            let registry = self.clone();
            let tag = identity.clone();
            let constructor = lua.create_function(move |lua, ()| {
                registry.create(lua, &tag).map_err(mlua::Error::from)
            })?;

            let entry = lua.create_table()?;
            entry.set("new", constructor)?;
            table.set(identity.as_str(), entry)?;
        }

        tracing::debug!(namespace, "bindings installed");
        Ok(())
    }

    fn binding(&self, identity: &str) -> Result<Rc<RegisteredType>, BindingError> {
        self.inner
            .types
            .borrow()
            .get(identity)
            .cloned()
            .ok_or_else(|| BindingError::UnknownType {
                identity: identity.to_string(),
            })
    }

    fn check_erased(&self, value: &Value, expected: &str) -> Result<(HandleKey, Instance), BindingError> {
        let type_mismatch = |found: String| BindingError::TypeMismatch {
            expected: expected.to_string(),
            found,
        };

        let ud = as_userdata(value, expected)?;
        let handle = ud
            .borrow::<NativeHandle>()
            .map_err(|err| mismatch(expected, &err))?;

        if handle.identity() != expected {
            return Err(type_mismatch(format!("`{}'", handle.identity())));
        }
        if !Rc::ptr_eq(handle.cache(), &self.inner.cache) {
            return Err(type_mismatch("handle owned by another registry".to_string()));
        }

        let key = handle
            .key()
            .ok_or_else(|| type_mismatch("released handle".to_string()))?;
        let instance = self.inner.cache.instance(key)?;
        Ok((key, instance))
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn as_userdata<'v>(value: &'v Value, expected: &str) -> Result<&'v AnyUserData, BindingError> {
    match value {
        Value::UserData(ud) => Ok(ud),
        other => Err(BindingError::TypeMismatch {
            expected: expected.to_string(),
            found: other.type_name().to_string(),
        }),
    }
}

fn mismatch(expected: &str, err: &mlua::Error) -> BindingError {
    let found = match err {
        mlua::Error::UserDataDestructed => "finalized handle",
        _ => "foreign userdata",
    };
    BindingError::TypeMismatch {
        expected: expected.to_string(),
        found: found.to_string(),
    }
}

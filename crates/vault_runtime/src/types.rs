//! Native types exposed to scripts
//!
//! Plain data holders; all behavior lives in their method tables.

use std::collections::HashMap;
use vault_script::{BindingError, TypeBinding, TypeRegistry};

#[derive(Debug, Default, Clone)]
pub struct Foo {
    pub a: String,
}

#[derive(Debug, Default, Clone)]
pub struct Bar {
    pub a: String,
    pub b: Foo,
}

impl Bar {
    pub fn describe(&self) -> String {
        format!("bar_t {{\n\ta : {},\n\tb : {{\n\t\ta : {}\n\t}}\n}}", self.a, self.b.a)
    }
}

pub type StringMap = HashMap<String, String>;

pub fn foo_binding() -> TypeBinding<Foo> {
    TypeBinding::<Foo>::new("foo")
        .method("a", |_, foo, ()| Ok(foo.a.clone()))
        .method("set_a", |_, foo, a: String| {
            foo.a = a;
            Ok(())
        })
}

pub fn bar_binding() -> TypeBinding<Bar> {
    TypeBinding::<Bar>::new("bar")
        .method("a", |_, bar, ()| Ok(bar.a.clone()))
        .method("set_a", |_, bar, a: String| {
            bar.a = a;
            Ok(())
        })
        .method("b_a", |_, bar, ()| Ok(bar.b.a.clone()))
        .method("set_b_a", |_, bar, a: String| {
            bar.b.a = a;
            Ok(())
        })
        .method("describe", |_, bar, ()| Ok(bar.describe()))
}

pub fn map_binding() -> TypeBinding<StringMap> {
    TypeBinding::<StringMap>::new("map")
        .method("get", |_, map, key: String| Ok(map.get(&key).cloned()))
        .method("set", |_, map, (key, value): (String, String)| {
            map.insert(key, value);
            Ok(())
        })
        .method("len", |_, map, ()| Ok(map.len()))
}

/// Register `foo`, `bar` and `map`.
pub fn register_all(registry: &TypeRegistry) -> Result<(), BindingError> {
    registry.register(foo_binding())?;
    registry.register(bar_binding())?;
    registry.register(map_binding())?;
    Ok(())
}

//! End-to-end scenarios across the binding bridge and the bytecode pipeline.

use std::cell::Cell;
use std::rc::Rc;
use vault_script::mlua::{Function, Value};
use vault_script::{
    BindingError, CompiledScript, ReaderState, ScriptError, ScriptRuntime, TypeBinding,
    TypeRegistry,
};

#[derive(Default)]
struct Foo {
    a: String,
}

#[derive(Default)]
struct Bar;

fn counted_foo(identity: &str, destroyed: &Rc<Cell<usize>>) -> TypeBinding<Foo> {
    let destroyed = Rc::clone(destroyed);
    TypeBinding::<Foo>::new(identity)
        .destructor(move |_| destroyed.set(destroyed.get() + 1))
        .method("a", |_, foo, ()| Ok(foo.a.clone()))
        .method("set_a", |_, foo, a: String| {
            foo.a = a;
            Ok(())
        })
}

#[test]
fn return_one_plus_one() {
    let runtime = ScriptRuntime::new();
    let mut script = CompiledScript::compile_isolated("t1", "return 1+1").unwrap();

    let function = script.load(runtime.lua()).unwrap();
    let value: i64 = function.call(()).unwrap();
    assert_eq!(value, 2);
}

#[test]
fn syntax_error_is_compile_error() {
    match CompiledScript::compile_isolated("broken", "syntax error (((") {
        Err(ScriptError::Compile { message, .. }) => assert!(!message.is_empty()),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("compiled invalid source"),
    }
}

#[test]
fn bytecode_matches_direct_execution() {
    let source = r#"
        local function fib(n)
            if n < 2 then return n end
            return fib(n - 1) + fib(n - 2)
        end
        local words = {}
        for w in string.gmatch("alpha beta gamma", "%a+") do
            words[#words + 1] = w:upper()
        end
        return fib(15), table.concat(words, ",")
    "#;

    let runtime = ScriptRuntime::new();
    let direct: (i64, String) = runtime.lua().load(source).eval().unwrap();

    let mut script = CompiledScript::compile_isolated("mixed", source).unwrap();
    let replayed: (i64, String) = script.load(runtime.lua()).unwrap().call(()).unwrap();

    assert_eq!(direct, replayed);
    assert_eq!(replayed, (610, "ALPHA,BETA,GAMMA".to_string()));
}

#[test]
fn reload_many_times_into_many_states() {
    let mut script =
        CompiledScript::compile_isolated("stateful", "count = (count or 0) + 1 return count")
            .unwrap();

    let first = ScriptRuntime::new();
    let second = ScriptRuntime::new();

    let mut functions: Vec<Function> = Vec::new();
    for _ in 0..5 {
        functions.push(script.load(first.lua()).unwrap());
        assert_eq!(script.reader_state(), ReaderState::Armed);
    }
    for (expected, function) in (1..=5).zip(&functions) {
        let count: i64 = function.call(()).unwrap();
        assert_eq!(count, expected);
    }

    // A separate state has its own globals.
    let count: i64 = script.load(second.lua()).unwrap().call(()).unwrap();
    assert_eq!(count, 1);
}

#[test]
fn compile_in_shared_runtime_then_execute_there() {
    let runtime = ScriptRuntime::new();
    let mut script = runtime
        .compile("shared", "return select('#', ...), ...")
        .unwrap();

    let (count, first): (i64, String) = runtime
        .load(&mut script)
        .unwrap()
        .call(("x", "y"))
        .unwrap();
    assert_eq!((count, first.as_str()), (2, "x"));
}

#[test]
fn foo_create_check_and_mismatch() {
    let runtime = ScriptRuntime::new();
    let registry = TypeRegistry::new();
    registry.register(TypeBinding::<Foo>::new("foo")).unwrap();
    registry.register(TypeBinding::<Bar>::new("bar")).unwrap();

    let handle = Value::UserData(registry.create(runtime.lua(), "foo").unwrap());
    {
        let foo = registry.check::<Foo>(&handle, "foo").unwrap();
        foo.borrow_mut().a = "set from host".to_string();
        assert_eq!(foo.borrow().a, "set from host");
    }

    match registry.check::<Bar>(&handle, "bar") {
        Err(BindingError::TypeMismatch { expected, .. }) => assert_eq!(expected, "bar"),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("foo handle accepted as bar"),
    }
}

#[test]
fn duplicate_registration_fails() {
    let registry = TypeRegistry::new();
    registry.register(TypeBinding::<Foo>::new("foo")).unwrap();
    assert!(matches!(
        registry.register(TypeBinding::<Foo>::new("foo")),
        Err(BindingError::Registration { .. })
    ));
}

#[test]
fn finalize_then_release_reports_inconsistency() {
    let runtime = ScriptRuntime::new();
    let registry = TypeRegistry::new();
    let destroyed = Rc::new(Cell::new(0));
    registry.register(counted_foo("foo", &destroyed)).unwrap();

    let handle = Value::UserData(registry.create(runtime.lua(), "foo").unwrap());
    let key = registry.key_of(&handle, "foo").unwrap();

    registry.finalize(&handle).unwrap();
    assert_eq!(destroyed.get(), 1);

    let err = registry.cache().release(key).unwrap_err();
    assert!(err.to_string().contains("double release"));
    assert_eq!(destroyed.get(), 1);
}

#[test]
fn collector_finalizes_every_script_handle_once() {
    let runtime = ScriptRuntime::new();
    let registry = TypeRegistry::new();
    let destroyed = Rc::new(Cell::new(0));
    registry.register(counted_foo("foo", &destroyed)).unwrap();
    runtime.install(&registry).unwrap();

    let mut script = runtime
        .compile(
            "spawn",
            r#"
            local n = ...
            local names = {}
            for i = 1, n do
                local foo = vault.foo.new()
                foo:set_a("foo" .. i)
                names[i] = foo:a()
            end
            return table.concat(names, " ")
            "#,
        )
        .unwrap();

    let names: String = runtime.load(&mut script).unwrap().call(8).unwrap();
    assert_eq!(names.split(' ').count(), 8);

    runtime.collect_garbage().unwrap();
    assert!(registry.cache().is_empty());
    assert_eq!(destroyed.get(), 8);
}

#[test]
fn collector_defers_destroy_while_host_views_instance() {
    let runtime = ScriptRuntime::new();
    let registry = TypeRegistry::new();
    let destroyed = Rc::new(Cell::new(0));
    registry.register(counted_foo("foo", &destroyed)).unwrap();
    runtime.install(&registry).unwrap();

    let handle: Value = runtime
        .lua()
        .load(r#"held = vault.foo.new() held:set_a("viewed") return held"#)
        .eval()
        .unwrap();
    let foo = registry.check::<Foo>(&handle, "foo").unwrap();
    drop(handle);

    runtime.execute("held = nil").unwrap();
    runtime.collect_garbage().unwrap();
    assert!(registry.cache().is_empty());
    assert_eq!(destroyed.get(), 0);
    assert_eq!(foo.borrow().a, "viewed");

    drop(foo);
    assert_eq!(destroyed.get(), 1);
}

#[test]
fn registries_sharing_one_state_keep_their_own_methods() {
    let runtime = ScriptRuntime::new();
    let first = TypeRegistry::new();
    let second = TypeRegistry::new();
    first
        .register(TypeBinding::<Foo>::new("foo").method("origin", |_, _, ()| Ok("first")))
        .unwrap();
    second
        .register(
            TypeBinding::<Foo>::new("foo")
                .method("origin", |_, _, ()| Ok("second"))
                .method("only_second", |_, _, ()| Ok(true)),
        )
        .unwrap();
    first.install(runtime.lua(), "one").unwrap();
    second.install(runtime.lua(), "two").unwrap();

    let (a, b, missing, present): (String, String, bool, bool) = runtime
        .lua()
        .load(
            r#"
            local a, b = one.foo.new(), two.foo.new()
            return a:origin(), b:origin(), a.only_second == nil, b:only_second()
            "#,
        )
        .eval()
        .unwrap();
    assert_eq!((a.as_str(), b.as_str(), missing, present), ("first", "second", true, true));

    runtime.collect_garbage().unwrap();
    assert!(first.cache().is_empty());
    assert!(second.cache().is_empty());
}

#[test]
fn construction_failure_is_a_script_error() {
    let runtime = ScriptRuntime::new();
    let registry = TypeRegistry::new();
    registry
        .register(TypeBinding::<Foo>::with_factory("flaky", || {
            anyhow::bail!("factory offline")
        }))
        .unwrap();
    runtime.install(&registry).unwrap();

    let message: String = runtime
        .lua()
        .load("local ok, err = pcall(vault.flaky.new) assert(not ok) return tostring(err)")
        .eval()
        .unwrap();
    assert!(message.contains("factory offline"), "{message}");
    assert!(registry.cache().is_empty());
}

#[test]
fn host_can_check_handles_returned_by_scripts() {
    let runtime = ScriptRuntime::new();
    let registry = TypeRegistry::new();
    let destroyed = Rc::new(Cell::new(0));
    registry.register(counted_foo("foo", &destroyed)).unwrap();
    runtime.install(&registry).unwrap();

    let handle: Value = runtime
        .lua()
        .load(r#"local f = vault.foo.new() f:set_a("from script") return f"#)
        .eval()
        .unwrap();

    let foo = registry.check::<Foo>(&handle, "foo").unwrap();
    assert_eq!(foo.borrow().a, "from script");
    drop(foo);

    registry.finalize(&handle).unwrap();
    assert!(registry.cache().is_empty());
    assert_eq!(destroyed.get(), 1);
}

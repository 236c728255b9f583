//! Script runtime management
//!
//! Owns the Lua state scripts execute in. Bound types are installed from a
//! [`TypeRegistry`]; precompiled scripts are loaded through [`CompiledScript`].

use crate::binding::TypeRegistry;
use crate::error::ScriptError;
use crate::script::CompiledScript;
use crate::settings::ScriptSettings;
use mlua::{FromLuaMulti, Function, IntoLuaMulti, Lua, LuaOptions, StdLib};
use std::path::Path;

/// Script execution context
pub struct ScriptRuntime {
    lua: Lua,
    settings: ScriptSettings,
}

impl ScriptRuntime {
    pub fn new() -> Self {
        Self::with_settings(ScriptSettings::default())
    }

    pub fn with_settings(settings: ScriptSettings) -> Self {
        // SAFETY: only the safe standard libraries are opened. The unsafe
        // constructor is needed because safe states refuse binary chunks, and
        // the binary chunks fed here come from `CompiledScript` dumps.
        let lua = unsafe { Lua::unsafe_new_with(StdLib::ALL_SAFE, LuaOptions::new()) };
        Self { lua, settings }
    }

    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    pub fn settings(&self) -> &ScriptSettings {
        &self.settings
    }

    /// Compile `source` with this runtime's compiler and dump options.
    pub fn compile(
        &self,
        name: &str,
        source: impl AsRef<[u8]>,
    ) -> Result<CompiledScript, ScriptError> {
        CompiledScript::compile_with(name, source, &self.lua, self.settings.compile_options())
    }

    /// Load a compiled script into this runtime without running it.
    pub fn load(&self, script: &mut CompiledScript) -> Result<Function, ScriptError> {
        script.load(&self.lua)
    }

    /// Expose every type bound in `registry` under the configured namespace.
    pub fn install(&self, registry: &TypeRegistry) -> Result<(), ScriptError> {
        registry.install(&self.lua, &self.settings.namespace)?;
        Ok(())
    }

    pub fn execute(&self, source: &str) -> Result<(), ScriptError> {
        self.lua.load(source).exec()?;
        Ok(())
    }

    pub fn execute_file(&self, path: &Path) -> Result<(), ScriptError> {
        let name = path.display().to_string();
        let source = match std::fs::read(path) {
            Ok(source) => source,
            Err(source) => return Err(ScriptError::Io { name, source }),
        };
        self.lua.load(source).set_name(name).exec()?;
        Ok(())
    }

    /// Call a global function by name.
    pub fn call_function<A, R>(&self, name: &str, args: A) -> Result<R, ScriptError>
    where
        A: IntoLuaMulti,
        R: FromLuaMulti,
    {
        let function: Function = self.lua.globals().get(name)?;
        Ok(function.call(args)?)
    }

    /// Run a full collection so unreachable handles are finalized.
    pub fn collect_garbage(&self) -> Result<(), ScriptError> {
        // The first cycle may only mark finalizable userdata.
        self.lua.gc_collect()?;
        self.lua.gc_collect()?;
        Ok(())
    }
}

impl Default for ScriptRuntime {
    fn default() -> Self {
        Self::new()
    }
}

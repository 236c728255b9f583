//! Precompiled scripts
//!
//! Source is compiled once and dumped to bytecode; the compiled function is
//! thrown away. Every later [`CompiledScript::load`] replays the bytecode
//! through the reader into whichever Lua state asks for it.

use crate::error::{diagnostic, ScriptError};
use crate::reader::{BytecodeReader, ReaderState};
use mlua::{ChunkMode, Function, Lua};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Options applied when dumping compiled source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    pub strip_debug: bool,
}

/// Bytecode for one script plus the reader state used to load it.
#[derive(Debug, Clone)]
pub struct CompiledScript {
    name: String,
    bytecode: Vec<u8>,
    reader: ReaderState,
}

impl CompiledScript {
    /// Compile `source` using `lua` as the compiler.
    pub fn compile(
        name: impl Into<String>,
        source: impl AsRef<[u8]>,
        lua: &Lua,
    ) -> Result<Self, ScriptError> {
        Self::compile_with(name, source, lua, CompileOptions::default())
    }

    /// Compile `source` using `lua`, dumping with `options`.
    ///
    /// Source is taken as raw bytes, like any Lua chunk. Nothing is executed
    /// and no value is left behind in `lua`.
    pub fn compile_with(
        name: impl Into<String>,
        source: impl AsRef<[u8]>,
        lua: &Lua,
        options: CompileOptions,
    ) -> Result<Self, ScriptError> {
        let name = name.into();

        let function = lua
            .load(source.as_ref())
            .set_name(name.as_str())
            .set_mode(ChunkMode::Text)
            .into_function()
            .map_err(|err| ScriptError::Compile {
                name: name.clone(),
                message: diagnostic(&err),
            })?;

        let bytecode = function.dump(options.strip_debug);
        drop(function);

        if bytecode.is_empty() {
            return Err(ScriptError::Dump { name });
        }

        tracing::debug!(script = %name, bytes = bytecode.len(), "script compiled");
        Ok(Self {
            name,
            bytecode,
            reader: ReaderState::Armed,
        })
    }

    /// Compile in a private Lua state that is closed right after.
    pub fn compile_isolated(
        name: impl Into<String>,
        source: impl AsRef<[u8]>,
    ) -> Result<Self, ScriptError> {
        Self::compile_isolated_with(name, source, CompileOptions::default())
    }

    pub fn compile_isolated_with(
        name: impl Into<String>,
        source: impl AsRef<[u8]>,
        options: CompileOptions,
    ) -> Result<Self, ScriptError> {
        let lua = Lua::new();
        Self::compile_with(name, source, &lua, options)
    }

    /// Read all source bytes from `reader` and compile them in isolation.
    pub fn from_reader<R: Read>(
        name: impl Into<String>,
        mut reader: R,
        options: CompileOptions,
    ) -> Result<Self, ScriptError> {
        let name = name.into();
        let mut source = Vec::new();
        if let Err(source) = reader.read_to_end(&mut source) {
            return Err(ScriptError::Io { name, source });
        }
        Self::compile_isolated_with(name, source, options)
    }

    /// Compile the file at `path`, named after the path.
    pub fn from_path(path: impl AsRef<Path>, options: CompileOptions) -> Result<Self, ScriptError> {
        let path = path.as_ref();
        let name = path.display().to_string();
        let file = match File::open(path) {
            Ok(file) => file,
            Err(source) => return Err(ScriptError::Io { name, source }),
        };
        Self::from_reader(name, file, options)
    }

    /// Load the bytecode into `lua` as a callable function.
    ///
    /// The reader is rearmed first, so a previous cycle that stopped early
    /// cannot affect this one. The chunk is not executed.
    pub fn load(&mut self, lua: &Lua) -> Result<Function, ScriptError> {
        self.reader = ReaderState::Armed;
        let chunk = BytecodeReader::new(&self.bytecode, &mut self.reader).drain();

        let loaded = lua
            .load(&*chunk)
            .set_name(self.name.as_str())
            .set_mode(ChunkMode::Binary)
            .into_function();

        match loaded {
            Ok(function) => {
                tracing::trace!(script = %self.name, "bytecode loaded");
                Ok(function)
            }
            Err(err) => Err(ScriptError::Load {
                name: self.name.clone(),
                message: diagnostic(&err),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bytecode(&self) -> &[u8] {
        &self.bytecode
    }

    pub fn reader_state(&self) -> ReaderState {
        self.reader
    }
}

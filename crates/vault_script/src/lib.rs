//! Vault Scripting System
//!
//! Lua execution with native type bindings and precompiled bytecode
//!
//! ## Architecture
//!
//! - **Bindings:** [`TypeRegistry`] maps a type identity to its factory,
//!   destructor and method table. Instances live in the [`HandleCache`];
//!   scripts only hold generational keys.
//! - **Bytecode:** [`CompiledScript`] compiles source once, keeps the dumped
//!   chunk and replays it into any [`ScriptRuntime`] through a two-state
//!   reader.
//! - **Boundary:** everything registered into Lua returns `mlua::Result`;
//!   native errors and panics are converted before they reach the VM.
//!
//! [`HandleCache`]: vault_core::HandleCache

pub mod binding;
pub mod error;
mod handle;
pub mod reader;
pub mod runtime;
pub mod script;
pub mod settings;

pub use binding::{Method, TypeBinding, TypeRegistry};
pub use error::{BindingError, ScriptError};
pub use handle::Native;
pub use reader::{BytecodeReader, ReaderState};
pub use runtime::ScriptRuntime;
pub use script::{CompileOptions, CompiledScript};
pub use settings::ScriptSettings;

pub use mlua;

//! Error taxonomy for the binding bridge and the bytecode pipeline.

use std::panic::{self, AssertUnwindSafe};
use thiserror::Error;
use vault_core::CacheError;

/// Message reported when a native callback fails without a usable error.
pub(crate) const UNKNOWN_FAILURE: &str = "caught unknown exception";

/// Errors raised while binding native types to scripts.
#[derive(Debug, Error)]
pub enum BindingError {
    #[error("type '{identity}' is already registered")]
    Registration { identity: String },

    #[error("type '{identity}' is not registered")]
    UnknownType { identity: String },

    #[error("failed to construct '{identity}': {message}")]
    Construction { identity: String, message: String },

    #[error("expected instance of type `{expected}', found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("instance of `{identity}' is already in use")]
    InstanceBusy { identity: String },

    #[error(transparent)]
    InternalConsistency(#[from] CacheError),

    #[error("runtime error: {0}")]
    Runtime(#[from] mlua::Error),
}

impl From<BindingError> for mlua::Error {
    fn from(err: BindingError) -> Self {
        mlua::Error::runtime(err.to_string())
    }
}

/// Errors raised while compiling, loading or running scripts.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("failed to compile '{name}': {message}")]
    Compile { name: String, message: String },

    #[error("failed to dump bytecode for '{name}'")]
    Dump { name: String },

    #[error("failed to load '{name}': {message}")]
    Load { name: String, message: String },

    #[error("execution error: {0}")]
    Execution(#[from] mlua::Error),

    #[error("failed to read script '{name}': {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// The runtime's own diagnostic text, without mlua's wrapping.
pub(crate) fn diagnostic(err: &mlua::Error) -> String {
    match err {
        mlua::Error::SyntaxError { message, .. }
        | mlua::Error::RuntimeError(message)
        | mlua::Error::MemoryError(message)
        | mlua::Error::SafetyError(message) => message.clone(),
        other => other.to_string(),
    }
}

/// Run native code that must not unwind into the Lua VM.
pub(crate) fn guarded<R>(f: impl FnOnce() -> R) -> Result<R, String> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|_| UNKNOWN_FAILURE.to_string())
}

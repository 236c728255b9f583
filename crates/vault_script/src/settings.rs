//! Script settings

use crate::script::CompileOptions;
use serde::{Deserialize, Serialize};

/// Settings shared by every script runtime on the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptSettings {
    /// Global table bound types are installed under.
    pub namespace: String,
    /// Strip debug information from compiled bytecode.
    pub strip_debug: bool,
}

impl ScriptSettings {
    pub fn compile_options(&self) -> CompileOptions {
        CompileOptions {
            strip_debug: self.strip_debug,
        }
    }
}

impl Default for ScriptSettings {
    fn default() -> Self {
        Self {
            namespace: "vault".to_string(),
            strip_debug: false,
        }
    }
}

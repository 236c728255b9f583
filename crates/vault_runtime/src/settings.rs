//! Runtime settings

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use vault_script::ScriptSettings;

/// Host settings, read from an optional JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    pub script: ScriptSettings,
    /// Script defining `register_usercode` / `execute_usercode`.
    pub environment: Option<PathBuf>,
    /// How many times the user script is executed.
    pub iterations: u64,
}

impl RuntimeSettings {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read settings from {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("invalid settings in {}", path.display()))
    }
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            script: ScriptSettings::default(),
            environment: None,
            iterations: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_run_once_without_environment() {
        let settings = RuntimeSettings::default();
        assert_eq!(settings.iterations, 1);
        assert!(settings.environment.is_none());
        assert_eq!(settings.script.namespace, "vault");
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let settings: RuntimeSettings = serde_json::from_str(
            r#"{ "iterations": 10, "script": { "namespace": "native" } }"#,
        )
        .unwrap();
        assert_eq!(settings.iterations, 10);
        assert_eq!(settings.script.namespace, "native");
        assert!(!settings.script.strip_debug);
    }

    #[test]
    fn missing_file_is_reported() {
        let err = RuntimeSettings::load(Path::new("/no/such/settings.json")).unwrap_err();
        assert!(err.to_string().contains("failed to read settings"));
    }
}

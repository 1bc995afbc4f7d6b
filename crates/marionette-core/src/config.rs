//! Channel configuration.
//!
//! Configuration is read from `$MARIONETTE_CONFIG`, or from
//! `<config dir>/marionette/config.json` when that file exists. Every field has
//! a default, so an empty object (or no file at all) is a valid configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::process::{InterpreterSpec, Readiness};

/// Environment variable naming an explicit configuration file.
pub const CONFIG_ENV: &str = "MARIONETTE_CONFIG";
/// Environment variable overriding the script engine program.
pub const SCRIPT_PROGRAM_ENV: &str = "MARIONETTE_SCRIPT_PROGRAM";
/// Environment variable overriding the code helper program.
pub const CODE_PROGRAM_ENV: &str = "MARIONETTE_CODE_PROGRAM";

/// Placeholder replaced by the token-qualified marker in a sentinel template.
pub const MARKER_PLACEHOLDER: &str = "{marker}";

/// Source of the default code helper, run with `python3 -u -c`.
pub const CODE_HELPER_SOURCE: &str = include_str!("../assets/code_helper.py");

/// How the script channel runs scripts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptMode {
    /// One long-lived interpreter, sentinel-framed.
    #[default]
    Persistent,
    /// A fresh interpreter per call; exit marks the end of the response.
    OneShot,
}

/// Script engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptEngineConfig {
    /// Interpreter program.
    pub program: String,
    /// Arguments for persistent mode.
    pub args: Vec<String>,
    /// Arguments placed before the script in one-shot mode.
    pub one_shot_args: Vec<String>,
    /// Fixed part of the end-of-output marker.
    pub sentinel: String,
    /// Statement that prints the marker; must contain `{marker}`.
    pub sentinel_template: String,
    /// Per-call timeout in milliseconds.
    pub timeout_ms: u64,
    /// How long to wait for late stderr after the sentinel, in milliseconds.
    pub stderr_grace_ms: u64,
    /// Execution mode.
    pub mode: ScriptMode,
}

impl Default for ScriptEngineConfig {
    fn default() -> Self {
        let (program, args, one_shot_args, template) = if cfg!(target_os = "macos") {
            ("osascript", vec!["-i"], vec!["-e"], "\"{marker}\"")
        } else {
            ("sh", vec![], vec!["-c"], "echo {marker}")
        };

        Self {
            program: program.to_string(),
            args: args.into_iter().map(String::from).collect(),
            one_shot_args: one_shot_args.into_iter().map(String::from).collect(),
            sentinel: "__MARIONETTE_DONE__".to_string(),
            sentinel_template: template.to_string(),
            timeout_ms: 10_000,
            stderr_grace_ms: 20,
            mode: ScriptMode::Persistent,
        }
    }
}

impl ScriptEngineConfig {
    /// Per-call timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Grace period for stderr that trails the sentinel.
    pub fn stderr_grace(&self) -> Duration {
        Duration::from_millis(self.stderr_grace_ms)
    }

    /// The statement that prints `marker`.
    pub fn render_sentinel(&self, marker: &str) -> String {
        self.sentinel_template.replace(MARKER_PLACEHOLDER, marker)
    }

    /// Launch specification for persistent mode.
    pub fn interpreter_spec(&self) -> InterpreterSpec {
        InterpreterSpec {
            name: "script engine",
            program: self.program.clone(),
            args: self.args.clone(),
            env: Vec::new(),
            readiness: Readiness::Immediate,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.program.trim().is_empty() {
            return Err(Error::Config("script.program must not be empty".to_string()));
        }
        if self.sentinel.trim().is_empty() {
            return Err(Error::Config("script.sentinel must not be empty".to_string()));
        }
        if !self.sentinel_template.contains(MARKER_PLACEHOLDER) {
            return Err(Error::Config(format!(
                "script.sentinel_template must contain {}",
                MARKER_PLACEHOLDER
            )));
        }
        if self.timeout_ms == 0 {
            return Err(Error::Config("script.timeout_ms must be positive".to_string()));
        }
        Ok(())
    }
}

/// Code helper settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodeHelperConfig {
    /// Helper program.
    pub program: String,
    /// Helper arguments. Empty means "run the bundled helper source".
    pub args: Vec<String>,
    /// Line written to stderr once framework imports are done.
    pub ready_marker: String,
    /// Maximum wait for the ready marker, in milliseconds.
    pub startup_timeout_ms: u64,
    /// Default per-call timeout in milliseconds.
    pub timeout_ms: u64,
    /// Framework modules the bundled helper pre-imports.
    pub frameworks: Vec<String>,
}

impl Default for CodeHelperConfig {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            args: Vec::new(),
            ready_marker: "MARIONETTE_READY".to_string(),
            startup_timeout_ms: 30_000,
            timeout_ms: 15_000,
            frameworks: ["Quartz", "AppKit", "ApplicationServices"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl CodeHelperConfig {
    /// Default per-call timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Maximum wait for readiness.
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    /// Launch specification for the helper.
    pub fn interpreter_spec(&self) -> InterpreterSpec {
        let args = if self.args.is_empty() {
            vec![
                "-u".to_string(),
                "-c".to_string(),
                CODE_HELPER_SOURCE.to_string(),
            ]
        } else {
            self.args.clone()
        };

        InterpreterSpec {
            name: "code helper",
            program: self.program.clone(),
            args,
            env: vec![
                (
                    "MARIONETTE_READY_MARKER".to_string(),
                    self.ready_marker.clone(),
                ),
                (
                    "MARIONETTE_FRAMEWORKS".to_string(),
                    self.frameworks.join(","),
                ),
            ],
            readiness: Readiness::StderrMarker {
                marker: self.ready_marker.clone(),
                timeout: self.startup_timeout(),
            },
        }
    }

    fn validate(&self) -> Result<()> {
        if self.program.trim().is_empty() {
            return Err(Error::Config("code.program must not be empty".to_string()));
        }
        if self.ready_marker.trim().is_empty() {
            return Err(Error::Config("code.ready_marker must not be empty".to_string()));
        }
        if self.timeout_ms == 0 || self.startup_timeout_ms == 0 {
            return Err(Error::Config(
                "code.timeout_ms and code.startup_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Complete configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Script engine channel.
    pub script: ScriptEngineConfig,
    /// Code helper channel.
    pub code: CodeHelperConfig,
}

impl Config {
    /// Load configuration from the usual places, then apply environment
    /// overrides.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_path(Path::new(&path))?,
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_path(&path)?,
                _ => Self::default(),
            },
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Default configuration file location.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("marionette").join("config.json"))
    }

    /// Read configuration from a JSON file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;
        tracing::debug!("Loaded configuration from {}", path.display());
        Self::from_json_str(&text)
    }

    /// Parse and validate configuration JSON.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| Error::Config(format!("invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply program overrides from a variable lookup.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(program) = lookup(SCRIPT_PROGRAM_ENV).filter(|p| !p.is_empty()) {
            self.script.program = program;
        }
        if let Some(program) = lookup(CODE_PROGRAM_ENV).filter(|p| !p.is_empty()) {
            self.code.program = program;
        }
    }

    /// Check field invariants.
    pub fn validate(&self) -> Result<()> {
        self.script.validate()?;
        self.code.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.script.timeout(), Duration::from_secs(10));
        assert_eq!(config.code.timeout(), Duration::from_millis(15_000));
        assert_eq!(config.script.mode, ScriptMode::Persistent);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_object_is_default() {
        let config = Config::from_json_str("{}").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_partial_override() {
        let config = Config::from_json_str(
            r#"{"script": {"program": "sh", "sentinel_template": "echo {marker}", "mode": "one_shot"},
                "code": {"timeout_ms": 500}}"#,
        )
        .unwrap();
        assert_eq!(config.script.program, "sh");
        assert_eq!(config.script.mode, ScriptMode::OneShot);
        assert_eq!(config.script.render_sentinel("X_1"), "echo X_1");
        assert_eq!(config.code.timeout(), Duration::from_millis(500));
        assert_eq!(config.code.program, "python3");
    }

    #[test]
    fn test_template_without_placeholder_is_rejected() {
        let err = Config::from_json_str(r#"{"script": {"sentinel_template": "echo done"}}"#)
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        let err = Config::from_json_str("{not json").unwrap_err();
        assert!(err.to_string().starts_with("configuration error"));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_overrides(|key| match key {
            SCRIPT_PROGRAM_ENV => Some("/usr/bin/osascript".to_string()),
            CODE_PROGRAM_ENV => Some(String::new()),
            _ => None,
        });
        assert_eq!(config.script.program, "/usr/bin/osascript");
        assert_eq!(config.code.program, "python3");
    }

    #[test]
    fn test_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"code": {"frameworks": ["Vision"]}}"#).unwrap();
        let config = Config::from_path(&path).unwrap();
        assert_eq!(config.code.frameworks, vec!["Vision".to_string()]);

        let missing = Config::from_path(&dir.path().join("missing.json")).unwrap_err();
        assert!(missing.to_string().contains("failed to read"));
    }

    #[test]
    fn test_code_helper_spec_uses_bundled_source() {
        let spec = CodeHelperConfig::default().interpreter_spec();
        assert_eq!(spec.args[0], "-u");
        assert!(spec.args[2].contains("MARIONETTE_READY_MARKER"));
        assert!(spec
            .env
            .iter()
            .any(|(k, v)| k == "MARIONETTE_FRAMEWORKS" && v == "Quartz,AppKit,ApplicationServices"));
        assert!(matches!(spec.readiness, Readiness::StderrMarker { .. }));
    }
}

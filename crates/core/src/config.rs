//! Config & Policy (C1): the immutable startup snapshot of every
//! security-relevant setting.
//!
//! Production mode reads a root-owned, non-world/group-writable TOML file.
//! Development mode reads `AEGISH_*` environment variables with the same
//! field names, lowercased. Once loaded, nothing in this crate consults
//! `std::env` again for a security-critical setting — everything goes
//! through the snapshot.

use crate::error::ConfigError;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Development,
    Production,
}

/// Startup policy governing behavior when the LLM cannot produce a
/// verdict. `Safe` forces BLOCK; `Open` forces WARN, still subject to the
/// blocklist override (spec §4.5 Failure policy).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailMode {
    Safe,
    Open,
}

/// Action to take on variable-in-command-position detection (C5 step 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VarCmdAction {
    Warn,
    Block,
}

fn default_fail_mode() -> FailMode {
    FailMode::Safe
}

fn default_role() -> String {
    "default".to_string()
}

fn default_var_cmd_action() -> VarCmdAction {
    VarCmdAction::Block
}

fn default_confidence_threshold() -> f64 {
    0.7
}

fn default_filter_sensitive_vars() -> bool {
    true
}

fn default_audit_path() -> String {
    "/var/log/aegish/audit.log".to_string()
}

fn default_max_command_length() -> usize {
    16 * 1024
}

/// A `provider/model` identifier, e.g. `openai/gpt-4o-mini`.
pub type ModelId = String;

/// The raw, deserializable TOML shape. Never used directly outside
/// `Config::load`; everything else sees `ConfigSnapshot`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    mode: Mode,
    #[serde(default = "default_fail_mode")]
    fail_mode: FailMode,
    #[serde(default = "default_role")]
    role: String,
    primary_model: ModelId,
    #[serde(default)]
    fallback_models: Vec<ModelId>,
    allowed_providers: Vec<String>,
    #[serde(default = "default_var_cmd_action")]
    var_cmd_action: VarCmdAction,
    #[serde(default = "default_confidence_threshold")]
    confidence_threshold: f64,
    #[serde(default = "default_filter_sensitive_vars")]
    filter_sensitive_vars: bool,
    #[serde(default = "default_audit_path")]
    audit_path: String,
    runner_bash_sha256: Option<String>,
    sandboxer_sha256: Option<String>,
    #[serde(default = "default_max_command_length")]
    max_command_length: usize,
}

/// The immutable record captured at startup. Every subsequent read in the
/// process returns a value equal to what was true at startup (P9); nothing
/// holds `&mut ConfigSnapshot` after `Config::load` returns it.
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    pub mode: Mode,
    pub fail_mode: FailMode,
    pub role: String,
    pub primary_model: ModelId,
    pub fallback_models: Vec<ModelId>,
    pub allowed_providers: Vec<String>,
    pub var_cmd_action: VarCmdAction,
    pub confidence_threshold: f64,
    pub filter_sensitive_vars: bool,
    pub audit_path: PathBuf,
    pub runner_bash_sha256: Option<String>,
    pub sandboxer_sha256: Option<String>,
    pub max_command_length: usize,
}

impl From<RawConfig> for ConfigSnapshot {
    fn from(raw: RawConfig) -> Self {
        ConfigSnapshot {
            mode: raw.mode,
            fail_mode: raw.fail_mode,
            role: raw.role,
            primary_model: raw.primary_model,
            fallback_models: raw.fallback_models,
            allowed_providers: raw.allowed_providers,
            var_cmd_action: raw.var_cmd_action,
            confidence_threshold: raw.confidence_threshold,
            filter_sensitive_vars: raw.filter_sensitive_vars,
            audit_path: PathBuf::from(raw.audit_path),
            runner_bash_sha256: raw.runner_bash_sha256,
            sandboxer_sha256: raw.sandboxer_sha256,
            max_command_length: raw.max_command_length,
        }
    }
}

impl ConfigSnapshot {
    /// The list of models to try in order, already filtered to providers
    /// in `allowed_providers`. Filtered-out candidates are not an error;
    /// they are dropped silently at query time per spec §4.5.
    pub fn candidate_models(&self) -> Vec<&str> {
        std::iter::once(self.primary_model.as_str())
            .chain(self.fallback_models.iter().map(String::as_str))
            .filter(|model_id| {
                let provider = model_id.split('/').next().unwrap_or_default();
                self.allowed_providers.iter().any(|p| p == provider)
            })
            .collect()
    }
}

#[cfg(unix)]
fn check_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::MetadataExt;
    let metadata = std::fs::metadata(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let mode = metadata.mode();
    if metadata.uid() != 0 || mode & 0o022 != 0 {
        return Err(ConfigError::UnsafePermissions {
            path: path.display().to_string(),
            mode: mode & 0o777,
        });
    }
    Ok(())
}

#[cfg(not(unix))]
fn check_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

/// `AEGISH_*` environment variables read by `RawConfig::from_env`, one per
/// `RawConfig` field, lowercased field name prefixed with `AEGISH_` (spec
/// §4.1: "development mode reads `AEGISH_*` environment variables with the
/// same field names, lowercased").
const ENV_FIELDS: &[&str] = &[
    "mode",
    "fail_mode",
    "role",
    "primary_model",
    "fallback_models",
    "allowed_providers",
    "var_cmd_action",
    "confidence_threshold",
    "filter_sensitive_vars",
    "audit_path",
    "runner_bash_sha256",
    "sandboxer_sha256",
    "max_command_length",
];

/// Comma-separated list fields; every other field is either a bare scalar
/// (numbers/bools) or a plain string.
fn is_list_field(field: &str) -> bool {
    matches!(field, "fallback_models" | "allowed_providers")
}

/// Bare (unquoted) scalar fields — numbers and booleans — as opposed to
/// strings, which need TOML quoting.
fn is_bare_scalar_field(field: &str) -> bool {
    matches!(
        field,
        "confidence_threshold" | "filter_sensitive_vars" | "max_command_length"
    )
}

fn toml_escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

impl RawConfig {
    /// Builds a config snapshot purely from `AEGISH_*` environment
    /// variables (spec §4.1's development-mode source), one variable per
    /// field. Assembles an equivalent TOML document and deserializes it
    /// through the same `deny_unknown_fields` path as the file source, so
    /// the env and file sources can never silently diverge on which fields
    /// are accepted or how they default.
    fn from_env() -> Result<RawConfig, ConfigError> {
        let mut doc = String::new();
        for field in ENV_FIELDS {
            let var = format!("AEGISH_{}", field.to_uppercase());
            let Ok(value) = std::env::var(&var) else {
                continue;
            };
            if is_list_field(field) {
                let items: Vec<String> = value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| format!("\"{}\"", toml_escape(s)))
                    .collect();
                doc.push_str(&format!("{field} = [{}]\n", items.join(", ")));
            } else if is_bare_scalar_field(field) {
                doc.push_str(&format!("{field} = {value}\n"));
            } else {
                doc.push_str(&format!("{field} = \"{}\"\n", toml_escape(&value)));
            }
        }
        Ok(toml::from_str(&doc)?)
    }
}

pub struct Config;

impl Config {
    /// The single entry point for loading a config snapshot. In production
    /// mode this is the only place `std::env` is read for anything other
    /// than the `--config` override path itself.
    pub fn load(path: &Path) -> Result<ConfigSnapshot, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let raw: RawConfig = toml::from_str(&text)?;
        if raw.mode == Mode::Production {
            check_permissions(path)?;
        }
        Ok(raw.into())
    }

    /// Loads a config snapshot entirely from `AEGISH_*` environment
    /// variables, with no file on disk at all — the development-mode path
    /// spec §4.1 describes. Permission checks never apply here; those are
    /// only meaningful for a file the filesystem can mis-permission.
    pub fn load_from_env() -> Result<ConfigSnapshot, ConfigError> {
        let raw = RawConfig::from_env()?;
        Ok(raw.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_toml() -> &'static str {
        r#"
        mode = "development"
        primary_model = "openai/gpt-4o-mini"
        fallback_models = ["anthropic/claude-3-haiku"]
        allowed_providers = ["openai", "anthropic"]
        "#
    }

    #[test]
    fn parses_minimal_config_with_defaults() {
        let raw: RawConfig = toml::from_str(sample_toml()).unwrap();
        let snapshot: ConfigSnapshot = raw.into();
        assert_eq!(snapshot.fail_mode, FailMode::Safe);
        assert_eq!(snapshot.role, "default");
        assert_eq!(snapshot.var_cmd_action, VarCmdAction::Block);
        assert_eq!(snapshot.confidence_threshold, 0.7);
        assert!(snapshot.filter_sensitive_vars);
        assert_eq!(snapshot.max_command_length, 16 * 1024);
    }

    #[test]
    fn candidate_models_filters_by_allowed_provider() {
        let mut raw: RawConfig = toml::from_str(sample_toml()).unwrap();
        raw.allowed_providers = vec!["openai".to_string()];
        let snapshot: ConfigSnapshot = raw.into();
        assert_eq!(snapshot.candidate_models(), vec!["openai/gpt-4o-mini"]);
    }

    #[test]
    fn unknown_field_is_hard_error() {
        let bad = format!("{}\nbogus_field = true", sample_toml());
        let result: Result<RawConfig, _> = toml::from_str(&bad);
        assert!(result.is_err());
    }

    #[test]
    fn invalid_fail_mode_is_hard_error() {
        let bad = sample_toml().replace("mode = \"development\"", "mode = \"bogus\"");
        let result: Result<RawConfig, _> = toml::from_str(&bad);
        assert!(result.is_err());
    }

    #[test]
    fn missing_file_is_not_found_error() {
        let err = Config::load(Path::new("/nonexistent/aegish.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    /// Every `AEGISH_*` var this suite sets, cleaned up on drop so a
    /// failing assertion never leaks state into another test.
    struct EnvVarGuard(Vec<&'static str>);
    impl EnvVarGuard {
        fn set(vars: &[(&'static str, &str)]) -> Self {
            let mut names = Vec::new();
            for (name, value) in vars {
                std::env::set_var(name, value);
                names.push(*name);
            }
            EnvVarGuard(names)
        }
    }
    impl Drop for EnvVarGuard {
        fn drop(&mut self) {
            for name in &self.0 {
                std::env::remove_var(name);
            }
        }
    }

    #[test]
    #[serial_test::serial(aegish_env_config)]
    fn load_from_env_parses_minimal_development_config() {
        let _guard = EnvVarGuard::set(&[
            ("AEGISH_MODE", "development"),
            ("AEGISH_PRIMARY_MODEL", "openai/gpt-4o-mini"),
            ("AEGISH_FALLBACK_MODELS", "anthropic/claude-3-haiku, openai/gpt-4o"),
            ("AEGISH_ALLOWED_PROVIDERS", "openai,anthropic"),
            ("AEGISH_CONFIDENCE_THRESHOLD", "0.5"),
            ("AEGISH_FILTER_SENSITIVE_VARS", "false"),
        ]);

        let snapshot = Config::load_from_env().unwrap();
        assert_eq!(snapshot.mode, Mode::Development);
        assert_eq!(snapshot.primary_model, "openai/gpt-4o-mini");
        assert_eq!(
            snapshot.fallback_models,
            vec!["anthropic/claude-3-haiku".to_string(), "openai/gpt-4o".to_string()]
        );
        assert_eq!(snapshot.allowed_providers, vec!["openai", "anthropic"]);
        assert_eq!(snapshot.confidence_threshold, 0.5);
        assert!(!snapshot.filter_sensitive_vars);
        // Defaults still apply to fields with no corresponding env var set.
        assert_eq!(snapshot.fail_mode, FailMode::Safe);
        assert_eq!(snapshot.role, "default");
    }

    #[test]
    #[serial_test::serial(aegish_env_config)]
    fn load_from_env_missing_required_field_is_an_error() {
        let _guard = EnvVarGuard::set(&[("AEGISH_MODE", "development")]);
        // AEGISH_PRIMARY_MODEL and AEGISH_ALLOWED_PROVIDERS are required,
        // same as the TOML source, and are deliberately left unset here.
        assert!(Config::load_from_env().is_err());
    }
}

//! CLI entry parser (spec §6's `--mode`, `--config`, `--health-check`).
//!
//! Deliberately thin: `clap` owns argument parsing only. The config
//! snapshot loaded from the resolved path is the sole source of truth for
//! `mode` afterward — a `--mode` flag that disagrees with the file is a
//! configuration mistake, not a way to bypass it.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliMode {
    Development,
    Production,
}

impl From<CliMode> for aegish_core::Mode {
    fn from(mode: CliMode) -> Self {
        match mode {
            CliMode::Development => aegish_core::Mode::Development,
            CliMode::Production => aegish_core::Mode::Production,
        }
    }
}

/// Long-form version string assembled at compile time from `build.rs`'s
/// captured git/build metadata, shown by `--version` alongside the plain
/// Cargo package version.
pub const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (commit ",
    env!("GIT_HASH"),
    ", ",
    env!("GIT_DATE"),
    ", built ",
    env!("BUILD_TIMESTAMP"),
    " for ",
    env!("BUILD_TARGET"),
    ")",
);

#[derive(Debug, Parser)]
#[command(
    name = "aegish",
    version,
    long_version = LONG_VERSION,
    about = "LLM-validating interactive shell"
)]
pub struct Args {
    /// Selects the default config path and dev-mode defaults when
    /// `--config` is not given. The loaded config file's own `mode` field
    /// remains authoritative for every security-relevant decision.
    #[arg(long, value_enum, default_value_t = CliMode::Development)]
    pub mode: CliMode,

    /// Overrides the config file path implied by `--mode`.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Validates the config snapshot, Landlock availability, and the
    /// pinned bash/sandboxer hashes, then exits without starting the REPL.
    #[arg(long)]
    pub health_check: bool,
}

/// Production reads `/etc/aegish/config.toml`; development reads a project-
/// local default unless overridden. This is only consulted when config
/// comes from a file at all — `--config` forces the file path, and plain
/// development mode reads `AEGISH_*` environment variables instead via
/// `Config::load_from_env` (see `resolve_config_source`).
pub fn resolve_config_path(args: &Args) -> PathBuf {
    if let Some(path) = &args.config {
        return path.clone();
    }
    match args.mode {
        CliMode::Production => PathBuf::from("/etc/aegish/config.toml"),
        CliMode::Development => PathBuf::from("aegish.dev.toml"),
    }
}

/// Where to load the config snapshot from.
pub enum ConfigSource {
    File(PathBuf),
    Env,
}

/// Spec §4.1: production reads a file; development reads `AEGISH_*`
/// environment variables. An explicit `--config` always selects the file
/// source, in either mode, since naming a file is an unambiguous request
/// to use it.
pub fn resolve_config_source(args: &Args) -> ConfigSource {
    if args.config.is_some() {
        return ConfigSource::File(resolve_config_path(args));
    }
    match args.mode {
        CliMode::Production => ConfigSource::File(resolve_config_path(args)),
        CliMode::Development => ConfigSource::Env,
    }
}

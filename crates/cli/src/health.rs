//! `--health-check` (spec §6, supplemented per SPEC_FULL.md §2).
//!
//! Grounded on the teacher's `run_doctor_command`: validate the
//! security-relevant preconditions and print a one-line `OK`/`FAIL`
//! summary, distinct exit codes for each class of failure so scripts can
//! branch on it.

use aegish_core::{ConfigError, ConfigSnapshot, Mode};
use aegish_executor::{BASH_PATH, DEFAULT_SANDBOXER_PATH};
use colored::Colorize;
use std::path::Path;

pub const HEALTH_OK: i32 = 0;
pub const HEALTH_LANDLOCK_UNAVAILABLE: i32 = 1;
pub const HEALTH_INTEGRITY_FAILURE: i32 = 1;

/// Spec §4.1's unconditional production-mode startup gate: missing/
/// unsupported Landlock, or a binary hash mismatch, is fatal and must stop
/// the process before the REPL ever starts. Runs the same probes as the
/// opt-in `--health-check` diagnostic below, but errors out instead of
/// printing a report.
pub fn enforce_startup_preconditions(config: &ConfigSnapshot) -> Result<(), ConfigError> {
    if config.mode != Mode::Production {
        return Ok(());
    }
    if !aegish_sandbox::is_landlock_available() {
        return Err(ConfigError::LandlockUnavailable);
    }
    verify_pinned_hash("bash", Path::new(BASH_PATH), config.runner_bash_sha256.as_deref())?;
    verify_pinned_hash(
        "sandboxer",
        Path::new(DEFAULT_SANDBOXER_PATH),
        config.sandboxer_sha256.as_deref(),
    )?;
    Ok(())
}

fn verify_pinned_hash(component: &str, path: &Path, expected: Option<&str>) -> Result<(), ConfigError> {
    let expected = expected.ok_or_else(|| ConfigError::IntegrityViolation {
        component: component.to_string(),
        expected: "<none configured>".to_string(),
        actual: "no pinned hash configured".to_string(),
    })?;
    aegish_executor::integrity::verify_hash(component, path, expected)
}

/// Runs every health-check probe and prints a summary. Returns the process
/// exit code.
pub fn run_health_check(config: &ConfigSnapshot) -> i32 {
    let mut ok = true;

    if aegish_sandbox::is_landlock_available() {
        println!("{} landlock ABI available", "OK".green());
    } else if config.mode == aegish_core::Mode::Production {
        println!("{} landlock ABI unavailable (required in production)", "FAIL".red());
        ok = false;
    } else {
        println!("{} landlock ABI unavailable (tolerated in development)", "WARN".yellow());
    }

    if config.mode == aegish_core::Mode::Production {
        ok &= check_hash("bash", Path::new(BASH_PATH), config.runner_bash_sha256.as_deref());
        ok &= check_hash(
            "sandboxer",
            Path::new(DEFAULT_SANDBOXER_PATH),
            config.sandboxer_sha256.as_deref(),
        );
    } else {
        println!("{} integrity pinning skipped (development mode)", "SKIP".yellow());
    }

    if ok {
        println!("{}", "OK".green().bold());
        HEALTH_OK
    } else {
        println!("{}", "FAIL".red().bold());
        HEALTH_INTEGRITY_FAILURE
    }
}

fn check_hash(component: &str, path: &Path, expected: Option<&str>) -> bool {
    let Some(expected) = expected else {
        println!("{} no pinned hash configured for {component}", "FAIL".red());
        return false;
    };
    match aegish_executor::integrity::verify_hash(component, path, expected) {
        Ok(()) => {
            println!("{} {component} hash matches", "OK".green());
            true
        }
        Err(e) => {
            println!("{} {component} integrity check failed: {e}", "FAIL".red());
            false
        }
    }
}

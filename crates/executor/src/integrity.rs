//! Startup SHA-256 verification of the runner shell and sandboxer library.
//!
//! Production mode pins both paths by hash so a compromised `/bin/bash` or
//! a swapped-out sandboxer `.so` is caught before anything execs.

use aegish_core::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

fn hash_file(path: &Path) -> Result<String, ConfigError> {
    let bytes = std::fs::read(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let digest = Sha256::digest(&bytes);
    Ok(format!("{digest:x}"))
}

/// Verifies `path` hashes to `expected` (case-insensitive hex). A `None`
/// expected hash is only tolerated in development mode; callers must gate
/// that decision on `ConfigSnapshot::mode` themselves.
pub fn verify_hash(component: &str, path: &Path, expected: &str) -> Result<(), ConfigError> {
    let actual = hash_file(path)?;
    if !actual.eq_ignore_ascii_case(expected) {
        return Err(ConfigError::IntegrityViolation {
            component: component.to_string(),
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}

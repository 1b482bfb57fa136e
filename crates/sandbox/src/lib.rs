//! aegish-sandbox: the Landlock ruleset builder (C8).
//!
//! Builds a Landlock v1 ruleset that allows `EXECUTE` for every regular
//! executable reachable via `PATH`, except for a closed set of shell
//! binaries. Both the non-sudo executor pre-fork path and the preloaded
//! `aegish-sandboxer` constructor call into this crate so the two can never
//! diverge on what counts as "sandboxed".

#[cfg(target_os = "linux")]
pub mod landlock;

#[cfg(target_os = "linux")]
pub use landlock::{
    apply_execute_ruleset, collect_execute_allowlist, is_landlock_available,
    resolve_denied_shells, DENIED_SHELL_NAMES,
};

#[cfg(not(target_os = "linux"))]
pub fn is_landlock_available() -> bool {
    false
}

#[cfg(not(target_os = "linux"))]
pub fn apply_execute_ruleset() -> Result<(), aegish_core::SandboxError> {
    Err(aegish_core::SandboxError::LandlockUnavailable)
}

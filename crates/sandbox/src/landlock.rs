//! EXECUTE-allowlist Landlock ruleset for Linux.
//!
//! Unlike a read-everywhere/write-restricted filesystem ruleset, this module
//! builds a ruleset that denies `EXECUTE` on everything except the binaries
//! discovered by walking `PATH`, minus a closed set of interactive shells.
//! The goal is that once this ruleset is in force, the sandboxed process can
//! run ordinary tools but can never re-exec a shell to escape the validation
//! pipeline it was just put through.

use aegish_core::SandboxError;
use landlock::{
    Access, AccessFs, CompatLevel, Compatible, PathBeneath, PathFd, Ruleset, RulesetAttr,
    RulesetCreatedAttr, RulesetStatus, ABI,
};
use std::collections::HashSet;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Shell binaries that never receive an `EXECUTE` rule, regardless of where
/// on `PATH` they're found. Matched against the *realpath*-resolved target,
/// so a symlink alias (e.g. `/bin/sh -> dash`) doesn't slip through under a
/// different name.
pub const DENIED_SHELL_NAMES: &[&str] = &[
    "bash", "sh", "dash", "zsh", "ksh", "fish", "csh", "tcsh", "ash", "busybox", "mksh", "rbash",
    "nu", "pwsh", "xonsh", "elvish",
];

/// Probes whether the running kernel supports Landlock at all.
pub fn is_landlock_available() -> bool {
    Ruleset::default()
        .set_compatibility(CompatLevel::BestEffort)
        .handle_access(AccessFs::from_read(ABI::V1))
        .is_ok()
}

fn path_dirs() -> Vec<PathBuf> {
    std::env::var_os("PATH")
        .map(|p| std::env::split_paths(&p).collect())
        .unwrap_or_default()
}

fn is_regular_executable(path: &Path) -> bool {
    match fs::metadata(path) {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

/// Resolves every `PATH` entry matching a name in [`DENIED_SHELL_NAMES`] to
/// its canonical (`realpath`) form, so aliasing via symlinks can't bypass
/// the denylist.
pub fn resolve_denied_shells() -> HashSet<PathBuf> {
    let mut denied = HashSet::new();
    for dir in path_dirs() {
        for name in DENIED_SHELL_NAMES {
            let candidate = dir.join(name);
            if is_regular_executable(&candidate) {
                if let Ok(real) = fs::canonicalize(&candidate) {
                    denied.insert(real);
                }
            }
        }
    }
    denied
}

/// Enumerates every regular, executable-bit-set file reachable via `PATH`,
/// realpath-resolved and deduplicated, excluding anything whose canonical
/// path is in `denied`. Entries that fail to open or canonicalize are
/// omitted rather than retried — fail-closed, per spec.
pub fn collect_execute_allowlist(denied: &HashSet<PathBuf>) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    let mut allowed = Vec::new();
    for dir in path_dirs() {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => continue,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !is_regular_executable(&path) {
                continue;
            }
            let real = match fs::canonicalize(&path) {
                Ok(real) => real,
                Err(_) => continue,
            };
            if denied.contains(&real) {
                continue;
            }
            if seen.insert(real.clone()) {
                allowed.push(real);
            }
        }
    }
    allowed
}

/// Builds and activates, in the calling thread, a Landlock ruleset that
/// permits `EXECUTE` only on the PATH-derived allowlist. Must be called
/// after `NO_NEW_PRIVS` is set and before the target binary is `execve`'d;
/// the restriction is inherited across exec.
pub fn apply_execute_ruleset() -> Result<(), SandboxError> {
    let denied = resolve_denied_shells();
    let allowed = collect_execute_allowlist(&denied);

    let access = AccessFs::Execute;
    let ruleset = Ruleset::default()
        .set_compatibility(CompatLevel::BestEffort)
        .handle_access(access)
        .map_err(|e| SandboxError::RulesetBuild(e.to_string()))?
        .create()
        .map_err(|e| SandboxError::RulesetBuild(e.to_string()))?;

    // Each executable is opened individually (rather than batched through
    // landlock's `path_beneath_rules` helper) so a single unopenable entry
    // is silently dropped instead of aborting the whole ruleset build.
    let rules = allowed
        .iter()
        .filter_map(|path| PathFd::new(path).ok().map(|fd| Ok(PathBeneath::new(fd, access))));

    let status = ruleset
        .add_rules(rules)
        .map_err(|e| SandboxError::RulesetBuild(e.to_string()))?
        .restrict_self()
        .map_err(|e| SandboxError::RulesetBuild(e.to_string()))?;

    if status.ruleset == RulesetStatus::NotEnforced {
        return Err(SandboxError::NotEnforced);
    }

    tracing::debug!(
        allowed = allowed.len(),
        denied = denied.len(),
        "landlock execute ruleset activated"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::os::unix::fs::PermissionsExt as _;
    use tempfile::TempDir;

    fn make_executable(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, "#!/bin/sh\necho hi\n").unwrap();
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).unwrap();
        path
    }

    #[test]
    fn denied_shell_names_cover_common_shells() {
        for shell in ["bash", "sh", "zsh", "fish"] {
            assert!(DENIED_SHELL_NAMES.contains(&shell));
        }
    }

    #[test]
    #[serial]
    fn collect_execute_allowlist_excludes_denied() {
        let dir = TempDir::new().unwrap();
        let tool = make_executable(dir.path(), "mytool");
        let fake_bash = make_executable(dir.path(), "bash");

        std::env::set_var("PATH", dir.path());
        let denied: HashSet<PathBuf> = [fs::canonicalize(&fake_bash).unwrap()]
            .into_iter()
            .collect();
        let allowed = collect_execute_allowlist(&denied);

        let tool_real = fs::canonicalize(&tool).unwrap();
        assert!(allowed.contains(&tool_real));
        assert!(!allowed.contains(&fs::canonicalize(&fake_bash).unwrap()));
    }

    #[test]
    #[serial]
    fn collect_execute_allowlist_skips_non_executables() {
        let dir = TempDir::new().unwrap();
        let data_file = dir.path().join("data.txt");
        fs::write(&data_file, "not a binary").unwrap();

        std::env::set_var("PATH", dir.path());
        let allowed = collect_execute_allowlist(&HashSet::new());
        assert!(!allowed.contains(&fs::canonicalize(&data_file).unwrap()));
    }

    #[test]
    #[serial]
    fn resolve_denied_shells_finds_shells_on_path() {
        let dir = TempDir::new().unwrap();
        make_executable(dir.path(), "zsh");

        std::env::set_var("PATH", dir.path());
        let denied = resolve_denied_shells();
        assert!(!denied.is_empty());
    }

    #[test]
    fn is_landlock_available_does_not_panic() {
        let _ = is_landlock_available();
    }
}

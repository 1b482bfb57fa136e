//! Safe environment construction for the spawned shell (spec §4.8).
//!
//! Grounded on `core/src/exec_env.rs`'s retain-based filtering mechanism,
//! but the concrete allowlist/strip-list is spec.md's own — strictly more
//! restrictive than the teacher's generic core-vars-plus-`*KEY*` model,
//! since aegish starts from nothing and opts variables back in by name
//! rather than opting sensitive-looking ones out.

use std::collections::HashMap;

/// Copied verbatim from the parent environment if present.
const SAFE_ENV_ALLOWLIST: &[&str] = &[
    "PATH",
    "HOME",
    "USER",
    "LOGNAME",
    "SHELL",
    "LANG",
    "TERM",
    "PWD",
    "OLDPWD",
    "TZ",
    "COLUMNS",
    "LINES",
    "HOSTNAME",
    "DISPLAY",
    "XDG_RUNTIME_DIR",
    "TMPDIR",
];

/// `AEGISH_`-prefixed variables that are not security-critical (those are
/// read only from the config snapshot, never the environment) and so are
/// safe to forward to the child.
const SAFE_AEGISH_PREFIXED: &[&str] = &["AEGISH_LOG_DIR", "AEGISH_SESSION_ID"];

/// Stripped even if a future allowlist widening would otherwise admit them.
/// This is a second line of defense: with an empty starting map and an
/// opt-in allowlist none of these should ever reach this list in the first
/// place, but matching spec.md's explicit "always strip" wording keeps the
/// invariant enforced even if `SAFE_ENV_ALLOWLIST` above is ever loosened.
const ALWAYS_STRIPPED: &[&str] = &[
    "BASH_ENV",
    "ENV",
    "PROMPT_COMMAND",
    "LD_PRELOAD",
    "LD_LIBRARY_PATH",
    "LD_AUDIT",
    "BASH_LOADABLES_PATH",
    "SHELLOPTS",
    "BASHOPTS",
    "IFS",
    "CDPATH",
    "GLOBIGNORE",
    "EXECIGNORE",
    "PS0",
    "PS4",
    "PYTHONSTARTUP",
    "PYTHONPATH",
    "PERL5OPT",
    "PERL5LIB",
    "RUBYLIB",
    "NODE_OPTIONS",
    "GIT_SSH",
    "GIT_SSH_COMMAND",
    "GIT_EXEC_PATH",
    "GIT_TEMPLATE_DIR",
    "GIT_CONFIG_GLOBAL",
    "LESSOPEN",
    "LESSCLOSE",
    "INPUTRC",
    "SSH_ASKPASS",
    "SSH_ASKPASS_REQUIRE",
    "BROWSER",
    "ZDOTDIR",
    "FPATH",
    "HISTFILE",
    "HISTCONTROL",
    "TERMCAP",
    "TERMINFO",
];

fn is_always_stripped(name: &str) -> bool {
    let upper = name.to_ascii_uppercase();
    ALWAYS_STRIPPED.iter().any(|s| *s == upper) || upper.starts_with("BASH_FUNC_")
}

fn is_allowed(name: &str) -> bool {
    SAFE_ENV_ALLOWLIST.contains(&name)
        || name.starts_with("LC_")
        || SAFE_AEGISH_PREFIXED.contains(&name)
}

/// Builds the sanitized environment for the spawned bash process: start
/// empty, copy only allowlisted entries, then strip the always-denied set
/// as a defensive second pass. `LD_PRELOAD` is set by the caller afterward
/// for the sudo path, never inherited here.
pub fn safe_exec_env<I>(vars: I) -> HashMap<String, String>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut env = HashMap::new();
    for (key, value) in vars {
        if is_always_stripped(&key) {
            continue;
        }
        if is_allowed(&key) {
            env.insert(key, value);
        }
    }
    env
}

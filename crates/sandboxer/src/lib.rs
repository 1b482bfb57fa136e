//! `LD_PRELOAD`-able constructor library that self-applies the aegish
//! EXECUTE-allowlist Landlock ruleset (C10).
//!
//! `sudo` may strip `LD_PRELOAD` from the *parent's* view of the child's
//! environment, but it cannot unmap a shared object the dynamic loader has
//! already resolved on the way into that child's `main`. Putting the
//! constructor here, rather than trusting the parent to have applied
//! Landlock before `execve`, means the sudo path is sandboxed even when the
//! parent's own pre-fork hook was bypassed. Reuses
//! [`aegish_sandbox::apply_execute_ruleset`] directly so this library and
//! the non-sudo executor path can never build two different rulesets.

use std::sync::atomic::{AtomicBool, Ordering};

/// Environment variable this library's constructor sets once the ruleset is
/// active. A tiny probe (run by the executor, in production, right after a
/// sudo invocation returns) checks for its presence to confirm the sudo
/// child really was sandboxed, rather than trusting that `LD_PRELOAD` was
/// honored.
pub const CANARY_ENV_VAR: &str = "AEGISH_SANDBOXER_ACTIVE";

static ACTIVE: AtomicBool = AtomicBool::new(false);

#[ctor::ctor]
fn install_sandbox() {
    // Safety: idempotent per POSIX, no pointers involved.
    let rc = unsafe { libc::prctl(libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) };
    if rc != 0 {
        abort_unsandboxed("prctl(PR_SET_NO_NEW_PRIVS) failed");
    }

    if let Err(e) = aegish_sandbox::apply_execute_ruleset() {
        abort_unsandboxed(&e.to_string());
    }

    ACTIVE.store(true, Ordering::SeqCst);
    std::env::set_var(CANARY_ENV_VAR, "1");
}

/// Whether this process's constructor successfully installed the ruleset.
pub fn is_active() -> bool {
    ACTIVE.load(Ordering::SeqCst)
}

/// The constructor never returns on failure: it aborts the process outright
/// rather than letting a child run unsandboxed under a silently-failed
/// preload.
fn abort_unsandboxed(reason: &str) -> ! {
    eprintln!("aegish-sandboxer: failed to install sandbox, aborting: {reason}");
    // Safety: terminates immediately; skips atexit handlers by design so no
    // partially-initialized state can be observed by the rest of the process.
    unsafe { libc::_exit(126) };
}

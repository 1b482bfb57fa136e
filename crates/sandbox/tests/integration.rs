//! Integration tests for the EXECUTE-allowlist Landlock ruleset.
//!
//! These spawn a real child process and apply the ruleset via `pre_exec`
//! before exec'ing a target binary, because Landlock restrictions can only
//! be observed by actually attempting the restricted operation in a process
//! that has applied them — unlike the rest of this crate's unit tests, they
//! can't be exercised against the current test-runner process.

#![cfg(target_os = "linux")]

use aegish_sandbox::{apply_execute_ruleset, is_landlock_available};
use serial_test::serial;
use std::os::unix::process::CommandExt;
use std::process::Command;

fn landlock_ready() -> bool {
    if !is_landlock_available() {
        eprintln!("landlock not available on this kernel, skipping");
        return false;
    }
    true
}

#[test]
#[serial]
fn allowed_binary_on_path_still_execs() {
    if !landlock_ready() {
        return;
    }

    // Safety: pre_exec runs in the forked child before exec, single-threaded.
    let status = unsafe {
        Command::new("true")
            .pre_exec(|| {
                apply_execute_ruleset()
                    .map_err(|e| std::io::Error::other(e.to_string()))
            })
            .status()
    };

    let status = status.expect("spawning an allowlisted binary should succeed");
    assert!(status.success(), "true should still run under the ruleset");
}

#[test]
#[serial]
fn denied_shell_is_blocked_by_absolute_path() {
    if !landlock_ready() {
        return;
    }

    // Safety: pre_exec runs in the forked child before exec, single-threaded.
    let result = unsafe {
        Command::new("/bin/sh")
            .arg("-c")
            .arg("echo should-not-run")
            .pre_exec(|| {
                apply_execute_ruleset()
                    .map_err(|e| std::io::Error::other(e.to_string()))
            })
            .output()
    };

    match result {
        Ok(output) => {
            assert!(
                !output.status.success(),
                "denied shell should fail to exec under the ruleset"
            );
        }
        Err(_) => {
            // exec() itself failing with EACCES is also an acceptable
            // manifestation of the denial.
        }
    }
}

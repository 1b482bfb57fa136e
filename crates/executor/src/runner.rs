//! Synchronous command-substitution runner for `aegish_core::resolve`.
//!
//! The resolver needs to execute a statically-validated inner command and
//! read back its stdout while expanding `$(...)`/backtick/here-string
//! substitutions (spec §4.3 step 4). Implementing `InnerRunner` here rather
//! than in `aegish-core` keeps the dependency graph a DAG: core defines the
//! interface, the executor supplies the sandboxed spawn.

use aegish_core::InnerRunner;
use std::io;
use std::os::unix::process::CommandExt as _;
use std::process::{Command, Stdio};

use crate::env::safe_exec_env;
use crate::spawn::BASH_PATH;

pub struct SandboxedInnerRunner;

impl InnerRunner for SandboxedInnerRunner {
    fn run_for_stdout(&self, command: &str) -> io::Result<Vec<u8>> {
        let env = safe_exec_env(std::env::vars());
        let mut cmd = Command::new(BASH_PATH);
        cmd.arg("--norc")
            .arg("--noprofile")
            .arg("-c")
            .arg(command)
            .env_clear()
            .envs(&env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        // Safety: pre_exec runs in the forked child only, before execve.
        unsafe {
            cmd.pre_exec(|| {
                if libc::prctl(libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) != 0 {
                    return Err(io::Error::last_os_error());
                }
                aegish_sandbox::apply_execute_ruleset()
                    .map_err(|e| io::Error::other(e.to_string()))?;
                Ok(())
            });
        }

        let output = cmd.output()?;
        Ok(output.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_simple_command_and_captures_stdout() {
        let runner = SandboxedInnerRunner;
        let out = runner.run_for_stdout("echo hello").unwrap();
        assert_eq!(String::from_utf8_lossy(&out).trim(), "hello");
    }

    #[test]
    fn captures_empty_stdout_for_silent_command() {
        let runner = SandboxedInnerRunner;
        let out = runner.run_for_stdout("true").unwrap();
        assert!(out.is_empty());
    }
}

//! Sandboxed spawn paths for the validated, resolved command (spec §4.8).

use aegish_core::{clamp_exit_code, ConfigSnapshot, ExecError, Mode, SessionState};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::env::safe_exec_env;
use crate::integrity::verify_hash;

pub const BASH_PATH: &str = "/bin/bash";
pub const DEFAULT_SANDBOXER_PATH: &str = "/usr/lib/aegish/libaegish_sandboxer.so";

/// Exit status the wrapped script uses when the sudo path's canary guard
/// fires — distinct from any code the resolved command itself could
/// produce, since the guard runs and exits before that command is reached.
pub const CANARY_MISSING_EXIT: i32 = 125;

pub struct SpawnOutcome {
    pub exit_code: u8,
    pub new_cwd: PathBuf,
    pub env_changes: HashMap<String, String>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Whether the resolved command text itself invokes `sudo`, which selects
/// the sudo spawn path (relying on the preloaded sandboxer constructor
/// rather than this process's own pre-fork hook).
pub fn is_sudo_invocation(resolved_command: &str) -> bool {
    resolved_command.trim_start().split_whitespace().next() == Some("sudo")
}

fn wrap_command(
    last_exit_code: u8,
    resolved_command: &str,
    state_file: &Path,
    require_canary: bool,
) -> String {
    let guard = if require_canary {
        format!(
            "if [ -z \"${{{}:-}}\" ]; then exit {}; fi; ",
            aegish_sandboxer::CANARY_ENV_VAR,
            CANARY_MISSING_EXIT
        )
    } else {
        String::new()
    };
    format!(
        "{guard}(exit {last_exit_code}); {resolved_command}; __aegish_status=$?; {{ pwd; env; }} > \"{}\"; exit $__aegish_status",
        state_file.display()
    )
}

fn parse_state_file(contents: &str) -> (PathBuf, HashMap<String, String>) {
    let mut lines = contents.lines();
    let cwd = lines.next().map(PathBuf::from).unwrap_or_default();
    let mut env = HashMap::new();
    for line in lines {
        if let Some((key, value)) = line.split_once('=') {
            env.insert(key.to_string(), value.to_string());
        }
    }
    (cwd, env)
}

/// Spawns the resolved command under sandbox, returning its outcome and the
/// post-execution `SessionState` deltas. Does not mutate `state` itself;
/// the caller applies the returned outcome via `SessionState::apply_update`.
pub async fn spawn(
    resolved_command: &str,
    state: &SessionState,
    config: &ConfigSnapshot,
    sandboxer_path: &Path,
) -> Result<SpawnOutcome, ExecError> {
    if config.mode == Mode::Production {
        if let Some(expected) = &config.runner_bash_sha256 {
            verify_hash("bash", Path::new(BASH_PATH), expected)?;
        }
        if let Some(expected) = &config.sandboxer_sha256 {
            verify_hash("sandboxer", sandboxer_path, expected)?;
        }
    }

    let state_file = NamedTempFile::new().map_err(ExecError::Spawn)?;
    let use_sudo = is_sudo_invocation(resolved_command);
    let wrapped = wrap_command(
        state.last_exit_code,
        resolved_command,
        state_file.path(),
        use_sudo,
    );

    let mut env = safe_exec_env(std::env::vars());
    if config.mode == Mode::Production {
        env.insert(
            "LD_PRELOAD".to_string(),
            sandboxer_path.display().to_string(),
        );
    }

    let output = if use_sudo {
        spawn_sudo(&wrapped, state, &env, sandboxer_path).await?
    } else {
        spawn_direct(&wrapped, state, &env).await?
    };

    let captured = std::fs::read_to_string(state_file.path()).unwrap_or_default();
    let (new_cwd, env_changes) = parse_state_file(&captured);
    let env_changes = safe_exec_env(env_changes);

    Ok(SpawnOutcome {
        exit_code: clamp_exit_code(output.status.code().unwrap_or(-1)),
        new_cwd,
        env_changes,
        stdout: output.stdout,
        stderr: output.stderr,
    })
}

async fn spawn_direct(
    wrapped: &str,
    state: &SessionState,
    env: &HashMap<String, String>,
) -> Result<std::process::Output, ExecError> {
    let mut cmd = tokio::process::Command::new(BASH_PATH);
    cmd.arg("--norc")
        .arg("--noprofile")
        .arg("-c")
        .arg(wrapped)
        .current_dir(&state.cwd)
        .env_clear()
        .envs(env);

    // Safety: pre_exec runs after fork, before execve, in the child only;
    // it must not allocate or touch anything shared with the parent.
    unsafe {
        cmd.pre_exec(|| {
            if libc::prctl(libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            aegish_sandbox::apply_execute_ruleset()
                .map_err(|e| std::io::Error::other(e.to_string()))?;
            Ok(())
        });
    }

    cmd.output().await.map_err(ExecError::Spawn)
}

async fn spawn_sudo(
    wrapped: &str,
    state: &SessionState,
    env: &HashMap<String, String>,
    sandboxer_path: &Path,
) -> Result<std::process::Output, ExecError> {
    let mut cmd = tokio::process::Command::new("sudo");
    cmd.arg("env")
        .arg(format!("LD_PRELOAD={}", sandboxer_path.display()))
        .arg(BASH_PATH)
        .arg("--norc")
        .arg("--noprofile")
        .arg("-c")
        .arg(wrapped)
        .current_dir(&state.cwd)
        .env_clear()
        .envs(env);

    let output = cmd.output().await.map_err(ExecError::Spawn)?;

    if output.status.code() == Some(CANARY_MISSING_EXIT) {
        return Err(ExecError::CanaryMissing);
    }

    Ok(output)
}

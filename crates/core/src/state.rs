//! Mutable per-session state, owned exclusively by the REPL (C11).
//!
//! All fields here are written only by C11 after C9 returns; every other
//! component borrows `SessionState` read-only. There is exactly one
//! `SessionState` per shell session.

use std::collections::HashMap;
use std::fs::File;
use std::path::PathBuf;

/// Clamps an exit code to the POSIX-valid range `[0, 255]`.
pub fn clamp_exit_code(code: i32) -> u8 {
    code.clamp(0, 255) as u8
}

pub struct SessionState {
    pub cwd: PathBuf,
    pub previous_cwd: PathBuf,
    pub last_exit_code: u8,
    pub env: HashMap<String, String>,
    pub audit_fd: Option<File>,
}

impl SessionState {
    pub fn new(cwd: PathBuf, env: HashMap<String, String>, audit_fd: Option<File>) -> Self {
        let previous_cwd = cwd.clone();
        SessionState {
            cwd,
            previous_cwd,
            last_exit_code: 0,
            env,
            audit_fd,
        }
    }

    /// Applies a post-execution update (C9's capture) to this state.
    pub fn apply_update(&mut self, new_cwd: PathBuf, exit_code: i32, env_changes: HashMap<String, String>) {
        if new_cwd != self.cwd {
            self.previous_cwd = self.cwd.clone();
            self.cwd = new_cwd;
        }
        self.last_exit_code = clamp_exit_code(exit_code);
        self.env.extend(env_changes);
    }

    /// Implements the bare-`cd` fast path's directory swap directly,
    /// bypassing C9 entirely (spec: `cd` with a single clean path token).
    pub fn change_dir(&mut self, target: PathBuf) {
        self.previous_cwd = self.cwd.clone();
        self.cwd = target;
    }
}

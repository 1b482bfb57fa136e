//! Audit Log (C7): append-only structured record of validation decisions
//! and user overrides.
//!
//! Write failures escalate per spec §4.6 / §7: a debug log first, a
//! visible warning after `N` consecutive failures, then BLOCK all command
//! execution until the log recovers. This module only tracks the failure
//! count and exposes whether the caller should now refuse execution; the
//! REPL (C11) is responsible for actually enforcing the refusal.

use crate::action::{Action, Source};
use crate::error::AuditError;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

const CONSECUTIVE_FAILURE_LIMIT: u32 = 3;

#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub ts: String,
    pub cwd: String,
    pub canonical: String,
    pub resolved: String,
    pub action: Action,
    pub reason: String,
    pub source: String,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r#override: Option<OverrideRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OverrideRecord {
    pub accepted: bool,
}

pub struct AuditLog {
    file: File,
    consecutive_failures: u32,
}

impl AuditLog {
    /// Opens (creating if necessary) the append-only, 0600 audit file.
    /// Initialization failure in production is fatal (spec §4.6); the
    /// caller decides whether to treat this as fatal based on mode.
    pub fn open(path: &Path) -> Result<Self, AuditError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .mode(0o600)
            .open(path)
            .map_err(|source| AuditError::Open {
                path: path.display().to_string(),
                source,
            })?;
        Ok(AuditLog {
            file,
            consecutive_failures: 0,
        })
    }

    /// Writes one record as a single JSON line. On failure, increments
    /// the consecutive-failure counter and returns the error; the caller
    /// should consult `should_block_execution` afterward.
    pub fn write(&mut self, record: &AuditRecord) -> Result<(), AuditError> {
        let line = serde_json::to_string(record)?;
        match writeln!(self.file, "{line}") {
            Ok(()) => {
                self.consecutive_failures = 0;
                Ok(())
            }
            Err(e) => {
                self.consecutive_failures += 1;
                Err(AuditError::Write(e))
            }
        }
    }

    /// True once `N` consecutive write failures have occurred; the shell
    /// must block all further command execution until a write succeeds
    /// again.
    pub fn should_block_execution(&self) -> bool {
        self.consecutive_failures >= CONSECUTIVE_FAILURE_LIMIT
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}

pub fn source_label(source: &Source) -> String {
    source.to_string()
}

//! The REPL state machine (C11, spec §4.10).
//!
//! `READ → CANONICALIZE → RESOLVE → STATIC → [LLM] → EXECUTE`, with the
//! bare-`cd` fast path bypassing the pipeline entirely and every branch
//! ending in an audit write. Single-threaded cooperative per spec §5: one
//! foreground pipeline at a time, subprocess execution blocks the loop.

use aegish_core::{
    canonicalize, resolve, validate_static, Action, AuditLog, AuditRecord, ConfigSnapshot,
    ExecError, OverrideRecord, SessionState, Source, ValidationResult,
};
use aegish_executor::SandboxedInnerRunner;
use aegish_llm::{validate_via_llm, Completion, RetryConfig};
use colored::Colorize;
use regex::Regex;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Exit codes per spec §6.
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_SANDBOX_INIT_FAILURE: i32 = 126;
pub const EXIT_COMMAND_NOT_FOUND: i32 = 127;
pub const EXIT_INTERRUPTED: i32 = 130;
/// Dedicated sentinel for validator-blocked commands (spec §6 picks 2).
pub const EXIT_BLOCKED: i32 = 2;

/// Everything `process_line` needs that doesn't change per-command.
pub struct Pipeline {
    pub config: ConfigSnapshot,
    pub completion: Box<dyn Completion>,
    pub retry: RetryConfig,
    pub sandboxer_path: PathBuf,
}

fn cd_fast_path_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^\s*cd(?:\s+([^\s;&|<>()$`"'\\\n]+))?\s*$"#)
            .expect("cd fast-path pattern must compile")
    })
}

/// Matches spec §4.10's strict `cd [whitespace] [single path token]
/// [whitespace]` form with no metacharacters. `cd` alone (go home) and
/// `cd -` (go to previous dir) both qualify; anything with quoting,
/// substitution, or multiple tokens falls through to the full pipeline.
fn bare_cd_target(line: &str) -> Option<Option<String>> {
    cd_fast_path_re()
        .captures(line)
        .map(|c| c.get(1).map(|m| m.as_str().to_string()))
}

pub async fn process_line(
    line: &str,
    state: &mut SessionState,
    audit: &mut AuditLog,
    pipeline: &Pipeline,
) -> i32 {
    if audit.should_block_execution() {
        eprintln!(
            "{}",
            "audit log has failed repeatedly; blocking all commands until it recovers".red()
        );
        return EXIT_BLOCKED;
    }

    if let Some(target) = bare_cd_target(line) {
        return handle_bare_cd(target.as_deref(), line, state, audit);
    }

    let canonical = canonicalize(line);
    let runner = SandboxedInnerRunner;

    let resolved = match resolve(&canonical, &pipeline.config, &runner) {
        Ok(r) => r,
        Err(e) => {
            print_block(&e.to_string());
            write_audit(
                audit,
                state,
                &canonical,
                &canonical,
                Action::Block,
                &e.to_string(),
                &Source::FailMode,
                1.0,
                None,
            );
            return EXIT_BLOCKED;
        }
    };

    let static_result = validate_static(&resolved.resolved_command, &pipeline.config);
    if static_result.action.settle() == Action::Block {
        print_block(&static_result.reason);
        write_audit_from(audit, state, &canonical, &static_result, None);
        return EXIT_BLOCKED;
    }

    let llm_result = validate_via_llm(
        &canonical,
        &resolved.resolved_command,
        &resolved.prompt_annotations,
        &pipeline.config,
        pipeline.completion.as_ref(),
        &pipeline.retry,
    )
    .await;

    match llm_result.action.settle() {
        Action::Allow => {
            write_audit_from(audit, state, &canonical, &llm_result, None);
            execute(&llm_result.resolved_command, state, pipeline).await
        }
        Action::Warn => {
            let accepted = confirm(&llm_result.reason);
            write_audit_from(
                audit,
                state,
                &canonical,
                &llm_result,
                Some(OverrideRecord { accepted }),
            );
            if accepted {
                execute(&llm_result.resolved_command, state, pipeline).await
            } else {
                println!("{}", "declined".yellow());
                EXIT_BLOCKED
            }
        }
        Action::Block | Action::Unknown => {
            print_block(&llm_result.reason);
            write_audit_from(audit, state, &canonical, &llm_result, None);
            EXIT_BLOCKED
        }
    }
}

async fn execute(resolved_command: &str, state: &mut SessionState, pipeline: &Pipeline) -> i32 {
    match aegish_executor::spawn(
        resolved_command,
        state,
        &pipeline.config,
        &pipeline.sandboxer_path,
    )
    .await
    {
        Ok(outcome) => {
            io::stdout().write_all(&outcome.stdout).ok();
            io::stderr().write_all(&outcome.stderr).ok();
            let exit_code = outcome.exit_code;
            state.apply_update(outcome.new_cwd, exit_code as i32, outcome.env_changes);
            exit_code as i32
        }
        Err(ExecError::CanaryMissing) => {
            eprintln!(
                "{}",
                "sudo sandbox canary was not observed; refusing to execute unsandboxed".red()
            );
            EXIT_SANDBOX_INIT_FAILURE
        }
        Err(ExecError::SandboxInit(e)) => {
            eprintln!("{} {e}", "sandbox initialization failed:".red());
            EXIT_SANDBOX_INIT_FAILURE
        }
        Err(ExecError::Integrity(e)) => {
            eprintln!("{} {e}", "integrity check failed:".red());
            EXIT_SANDBOX_INIT_FAILURE
        }
        Err(e) => {
            eprintln!("{} {e}", "execution failed:".red());
            EXIT_COMMAND_NOT_FOUND
        }
    }
}

fn confirm(reason: &str) -> bool {
    print!("{} {reason} — execute? [y/N] ", "WARN".yellow().bold());
    io::stdout().flush().ok();
    let mut answer = String::new();
    if io::stdin().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim(), "y" | "Y" | "yes" | "Yes")
}

fn print_block(reason: &str) {
    println!("{} {reason}", "BLOCK".red().bold());
}

fn handle_bare_cd(
    target: Option<&str>,
    raw_line: &str,
    state: &mut SessionState,
    audit: &mut AuditLog,
) -> i32 {
    let new_path = resolve_cd_target(target, state);
    match std::fs::metadata(&new_path) {
        Ok(meta) if meta.is_dir() => {
            state.change_dir(new_path.clone());
            write_audit(
                audit,
                state,
                raw_line,
                &new_path.display().to_string(),
                Action::Allow,
                String::new(),
                &Source::FastPath,
                1.0,
                None,
            );
            EXIT_SUCCESS
        }
        _ => {
            eprintln!("cd: no such directory: {}", new_path.display());
            EXIT_COMMAND_NOT_FOUND
        }
    }
}

fn resolve_cd_target(target: Option<&str>, state: &SessionState) -> PathBuf {
    match target {
        None => home_dir(),
        Some("-") => state.previous_cwd.clone(),
        Some("~") => home_dir(),
        Some(t) => {
            let p = Path::new(t);
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                state.cwd.join(p)
            }
        }
    }
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/"))
}

#[allow(clippy::too_many_arguments)]
fn write_audit(
    audit: &mut AuditLog,
    state: &SessionState,
    canonical: &str,
    resolved: &str,
    action: Action,
    reason: impl Into<String>,
    source: &Source,
    confidence: f64,
    override_record: Option<OverrideRecord>,
) {
    let record = AuditRecord {
        ts: chrono::Utc::now().to_rfc3339(),
        cwd: state.cwd.display().to_string(),
        canonical: canonical.to_string(),
        resolved: resolved.to_string(),
        action,
        reason: reason.into(),
        source: source.to_string(),
        confidence,
        r#override: override_record,
    };
    if let Err(e) = audit.write(&record) {
        tracing::warn!(error = %e, "audit write failed");
        if audit.should_block_execution() {
            eprintln!(
                "{}",
                "audit log has failed repeatedly; blocking further commands".red()
            );
        }
    }
}

fn write_audit_from(
    audit: &mut AuditLog,
    state: &SessionState,
    canonical: &str,
    result: &ValidationResult,
    override_record: Option<OverrideRecord>,
) {
    write_audit(
        audit,
        state,
        canonical,
        &result.resolved_command,
        result.action.settle(),
        result.reason.clone(),
        &result.source,
        result.confidence,
        override_record,
    );
}

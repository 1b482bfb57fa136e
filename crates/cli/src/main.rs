//! aegish: interactive LLM-validating shell (C11 entry point).

use aegish_cli::{resolve_config_source, Args, ConfigSource, HttpCompletion, Pipeline};
use aegish_core::{AuditLog, Config, SessionState};
use aegish_llm::RetryConfig;
use clap::Parser;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match std::env::var_os("AEGISH_LOG_DIR") {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "aegish.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            // Leaked deliberately: the guard must outlive the process, and
            // this only runs once at startup.
            Box::leak(Box::new(guard));
            builder.with_writer(non_blocking).with_ansi(false).init();
        }
        None => builder.init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = match resolve_config_source(&args) {
        ConfigSource::File(path) => Config::load(&path)?,
        ConfigSource::Env => Config::load_from_env()?,
    };

    if args.health_check {
        std::process::exit(aegish_cli::health::run_health_check(&config));
    }

    aegish_cli::health::enforce_startup_preconditions(&config)?;

    init_tracing();

    let audit = AuditLog::open(&config.audit_path)?;
    let cwd = std::env::current_dir()?;
    let env: HashMap<String, String> = std::env::vars().collect();
    let state = SessionState::new(cwd, env, None);

    let pipeline = Pipeline {
        config,
        completion: Box::new(HttpCompletion::new()),
        retry: RetryConfig::default(),
        sandboxer_path: PathBuf::from(aegish_executor::DEFAULT_SANDBOXER_PATH),
    };

    let exit_code = run_repl(state, audit, pipeline).await;
    std::process::exit(exit_code);
}

async fn run_repl(
    mut state: SessionState,
    mut audit: AuditLog,
    pipeline: Pipeline,
) -> i32 {
    let mut editor = rustyline::DefaultEditor::new().expect("failed to initialize line editor");
    let mut last_code = 0;

    loop {
        let prompt = format!("{} $ ", state.cwd.display());
        match editor.readline(&prompt) {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                if trimmed == "exit" || trimmed == "quit" {
                    break last_code;
                }
                let _ = editor.add_history_entry(trimmed);
                last_code = aegish_cli::repl::process_line(trimmed, &mut state, &mut audit, &pipeline).await;
            }
            // SIGINT during READ cancels only the in-progress line; it must
            // never be interpreted as permission to run anything (spec §5).
            Err(rustyline::error::ReadlineError::Interrupted) => continue,
            Err(rustyline::error::ReadlineError::Eof) => break last_code,
            Err(_) => break aegish_cli::repl::EXIT_INTERRUPTED,
        }
    }
}

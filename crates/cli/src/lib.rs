//! aegish-cli: the REPL binary's supporting modules (C11).

pub mod args;
pub mod health;
pub mod llm_client;
pub mod repl;

pub use args::{resolve_config_path, resolve_config_source, Args, CliMode, ConfigSource};
pub use llm_client::HttpCompletion;
pub use repl::Pipeline;

//! aegish-executor: safe environment construction, Landlock pre-fork,
//! sudo fallback, and post-execution session-state capture (C9).

pub mod env;
pub mod integrity;
pub mod runner;
pub mod spawn;

pub use env::safe_exec_env;
pub use runner::SandboxedInnerRunner;
pub use spawn::{is_sudo_invocation, spawn, SpawnOutcome, BASH_PATH, DEFAULT_SANDBOXER_PATH};

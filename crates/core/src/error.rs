//! Typed error taxonomy for the aegish core pipeline.
//!
//! Every fallible operation in this crate returns one of the enums below
//! rather than a boxed or stringly-typed error, so that callers can match
//! on the exact failure kind when deciding how a decision defaults.

use thiserror::Error;

/// Errors that can occur while loading or validating the configuration
/// snapshot (C1). All are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found at {0}")]
    NotFound(String),

    #[error("config file {path} has unsafe permissions: {mode:o}")]
    UnsafePermissions { path: String, mode: u32 },

    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid value for security-critical setting `{field}`: {value}")]
    InvalidEnum { field: String, value: String },

    #[error("landlock ABI unavailable in production mode")]
    LandlockUnavailable,

    #[error("integrity check failed for {component}: expected {expected}, got {actual}")]
    IntegrityViolation {
        component: String,
        expected: String,
        actual: String,
    },
}

/// Errors from the resolver (C4).
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("substitution nesting exceeds max depth {max_depth}")]
    DepthExceeded { max_depth: u32 },

    #[error("substitution output exceeds byte budget of {budget} bytes")]
    ByteBudgetExceeded { budget: usize },

    #[error("inner command was blocked: {reason}")]
    InnerBlocked { reason: String },

    #[error("failed to execute inner command for substitution: {0}")]
    ExecFailed(String),
}

/// Errors from the static validator (C5). Distinct from a BLOCK verdict:
/// this enum is for validator-internal faults, not classification outcomes.
#[derive(Debug, Error)]
pub enum ValidateError {
    #[error("shell parser produced an unreliable tree")]
    ParseUnreliable,
}

/// Errors from the LLM client (C6).
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("request to {model} timed out after {timeout_ms}ms")]
    Timeout { model: String, timeout_ms: u64 },

    #[error("request to {model} failed: {message}")]
    RequestFailed { model: String, message: String },

    #[error("response from {model} was not valid JSON: {message}")]
    UnparseableResponse { model: String, message: String },

    #[error("all candidate models exhausted")]
    PolicyFailure,
}

/// Errors from the audit log (C7).
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("failed to open audit log at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write audit record: {0}")]
    Write(#[source] std::io::Error),

    #[error("failed to serialize audit record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors from the sandbox ruleset builder (C8) and executor (C9).
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("landlock ABI unavailable")]
    LandlockUnavailable,

    #[error("failed to build landlock ruleset: {0}")]
    RulesetBuild(String),

    #[error("ruleset was not fully enforced by the kernel")]
    NotEnforced,
}

/// Errors from command execution (C9).
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to spawn child process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("sandbox initialization failed before exec")]
    SandboxInit(#[from] SandboxError),

    #[error("integrity check failed before exec: {0}")]
    Integrity(#[from] ConfigError),

    #[error("sudo sandbox canary was not observed; refusing to execute unsandboxed")]
    CanaryMissing,

    #[error("failed to wait on child process: {0}")]
    Wait(#[source] std::io::Error),
}

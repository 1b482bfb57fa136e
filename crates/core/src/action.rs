//! The central decision sum type and the result carried by C5 and C6.
//!
//! Every internal comparison between decision outcomes MUST go through
//! `Action`, never a string. `UNKNOWN` exists only as a landing spot for
//! malformed parses and must never reach an execution decision directly.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// The three execution outcomes, plus an internal-only `Unknown` state.
///
/// Ordered by severity: `Allow < Warn < Block`. `Unknown` is deliberately
/// left out of the `Ord` impl's normal domain — every call site that might
/// observe it is required to map it to `Block` before comparing severities,
/// which is why `Action::settle` exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Allow,
    Warn,
    Block,
    /// Never a legal terminal state; always settled to `Block` before use.
    #[serde(skip)]
    Unknown,
}

impl Action {
    fn rank(self) -> u8 {
        match self {
            Action::Allow => 0,
            Action::Warn => 1,
            Action::Block => 2,
            Action::Unknown => 3,
        }
    }

    /// Maps `Unknown` to `Block`; every other variant passes through.
    /// Call this at the boundary between a parse/classification result and
    /// any code that makes an execution decision.
    pub fn settle(self) -> Action {
        match self {
            Action::Unknown => Action::Block,
            other => other,
        }
    }

    /// The most severe of two actions, after settling both.
    pub fn max(self, other: Action) -> Action {
        let (a, b) = (self.settle(), other.settle());
        if a.rank() >= b.rank() {
            a
        } else {
            b
        }
    }

    pub fn is_block(self) -> bool {
        matches!(self.settle(), Action::Block)
    }
}

impl Default for Action {
    /// Missing/unrecognized severity defaults to BLOCK.
    fn default() -> Self {
        Action::Block
    }
}

impl PartialOrd for Action {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.rank().cmp(&other.rank()))
    }
}

impl Ord for Action {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::Allow => "ALLOW",
            Action::Warn => "WARN",
            Action::Block => "BLOCK",
            Action::Unknown => "UNKNOWN",
        };
        write!(f, "{s}")
    }
}

/// Where a `ValidationResult` originated, for audit and debugging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Source {
    Blocklist,
    VarInCmd,
    Llm(String),
    FailMode,
    ParseFailure,
    /// Bare `cd` fast path (spec §4.10): bypasses C4/C5/C6 entirely, so the
    /// audit record needs a source distinct from any pipeline stage.
    FastPath,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Blocklist => write!(f, "Blocklist"),
            Source::VarInCmd => write!(f, "VarInCmd"),
            Source::Llm(model) => write!(f, "LLM:{model}"),
            Source::FailMode => write!(f, "FailMode"),
            Source::ParseFailure => write!(f, "ParseFailure"),
            Source::FastPath => write!(f, "FastPath"),
        }
    }
}

/// Returned by both the static validator (C5) and the LLM client (C6).
///
/// Invariant: `resolved_command` is the exact text that will be executed
/// if this result's action permits it. No component may mutate it between
/// classification and execution (P1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub action: Action,
    pub reason: String,
    pub confidence: f64,
    pub resolved_command: String,
    pub source: Source,
    pub parse_unreliable: bool,
}

impl ValidationResult {
    pub fn allow(resolved_command: impl Into<String>, source: Source) -> Self {
        ValidationResult {
            action: Action::Allow,
            reason: String::new(),
            confidence: 1.0,
            resolved_command: resolved_command.into(),
            source,
            parse_unreliable: false,
        }
    }

    pub fn block(
        resolved_command: impl Into<String>,
        reason: impl Into<String>,
        source: Source,
    ) -> Self {
        ValidationResult {
            action: Action::Block,
            reason: reason.into(),
            confidence: 1.0,
            resolved_command: resolved_command.into(),
            source,
            parse_unreliable: false,
        }
    }

    pub fn warn(
        resolved_command: impl Into<String>,
        reason: impl Into<String>,
        source: Source,
    ) -> Self {
        ValidationResult {
            action: Action::Warn,
            reason: reason.into(),
            confidence: 1.0,
            resolved_command: resolved_command.into(),
            source,
            parse_unreliable: false,
        }
    }

    /// Combines this result with another segment's result under the
    /// severity ordering (P3): the composite action is the max of the two,
    /// reasons are joined, and `parse_unreliable` is sticky.
    pub fn combine(mut self, other: ValidationResult) -> ValidationResult {
        let composite_action = self.action.max(other.action);
        if !self.reason.is_empty() && !other.reason.is_empty() {
            self.reason = format!("{}; {}", self.reason, other.reason);
        } else if self.reason.is_empty() {
            self.reason = other.reason;
        }
        self.action = composite_action;
        self.parse_unreliable = self.parse_unreliable || other.parse_unreliable;
        self.confidence = self.confidence.min(other.confidence);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_ordering() {
        assert!(Action::Allow < Action::Warn);
        assert!(Action::Warn < Action::Block);
    }

    #[test]
    fn unknown_settles_to_block() {
        assert_eq!(Action::Unknown.settle(), Action::Block);
        assert!(Action::Unknown.is_block());
    }

    #[test]
    fn max_picks_most_severe() {
        assert_eq!(Action::Allow.max(Action::Warn), Action::Warn);
        assert_eq!(Action::Warn.max(Action::Block), Action::Block);
        assert_eq!(Action::Unknown.max(Action::Allow), Action::Block);
    }

    #[test]
    fn default_is_block() {
        assert_eq!(Action::default(), Action::Block);
    }

    #[test]
    fn combine_picks_composite_and_joins_reasons() {
        let a = ValidationResult::allow("echo hi", Source::Blocklist);
        let b = ValidationResult::warn("rm file", "risky delete", Source::VarInCmd);
        let combined = a.combine(b);
        assert_eq!(combined.action, Action::Warn);
        assert_eq!(combined.reason, "risky delete");
    }

    #[test]
    fn display_matches_spec_names() {
        assert_eq!(Action::Allow.to_string(), "ALLOW");
        assert_eq!(Action::Warn.to_string(), "WARN");
        assert_eq!(Action::Block.to_string(), "BLOCK");
    }
}

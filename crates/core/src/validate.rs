//! Static Validator (C5): blocklist, AST-based variable-in-command-position
//! detection, and compound decomposition. No network I/O; this is the
//! layer that must be cheap and deterministic enough to run before every
//! LLM call (and again, on resolver output, after it).

use crate::action::{Action, Source, ValidationResult};
use crate::bash::{self, node_text};
use crate::config::{ConfigSnapshot, VarCmdAction};
use regex::Regex;
use std::sync::OnceLock;

/// High-confidence patterns that are blocked regardless of LLM verdict or
/// fail-mode (P4). Matched case-sensitively against the canonical text,
/// after flag-order normalization has already merged `-r -f` into `-rf`.
fn blocklist_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let sources = [
            r">\s*/dev/tcp/",
            r"<\s*/dev/tcp/",
            r"\bnc\b[^\n]*-e\b",
            r"\bn(c|cat)\b[^\n]*--exec\b",
            r"\bncat\b[^\n]*--sh-exec\b",
            r"\brm\b[^\n]*-[a-z]*r[a-z]*f[a-z]*\s+/\s*($|\s)",
            r"\brm\b[^\n]*-[a-z]*f[a-z]*r[a-z]*\s+/\s*($|\s)",
            r"\brm\b[^\n]*--recursive\b[^\n]*--force\b[^\n]*\s+/\s*($|\s)",
            r"\brm\b[^\n]*--force\b[^\n]*--recursive\b[^\n]*\s+/\s*($|\s)",
            r"\bmkfs\b",
            r"\bmkfs\.\w+\b",
            r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:",
            r"\bdd\b[^\n]*of=/dev/(sd|nvme|hd)\w*",
        ];
        sources
            .iter()
            .map(|s| Regex::new(s).expect("static blocklist pattern must compile"))
            .collect()
    })
}

/// Re-runs just the blocklist (step 2), used by the resolver (step 6) and
/// by the fail-mode override (spec §4.5: "even in open mode, re-run the
/// static blocklist").
pub fn matches_blocklist(text: &str) -> bool {
    blocklist_patterns().iter().any(|re| re.is_match(text))
}

/// `validate_static(text) -> ValidationResult`. Operations run in order
/// and short-circuit on the first BLOCK.
pub fn validate_static(text: &str, config: &ConfigSnapshot) -> ValidationResult {
    // 1. Length gate.
    if text.len() > config.max_command_length {
        return ValidationResult::block(text, "oversized", Source::Blocklist);
    }

    // 2. Pattern blocklist.
    if matches_blocklist(text) {
        return ValidationResult::block(text, "matched blocklist pattern", Source::Blocklist);
    }

    // 3 & 4: AST-based checks. A parse failure on text containing
    // shell-evaluation-relevant bytes defaults to BLOCK with
    // parse_unreliable=true (spec §4.4 step 3).
    let tree = match bash::parse(text) {
        Ok(tree) => tree,
        Err(_) => {
            if looks_shell_evaluable(text) {
                let mut result =
                    ValidationResult::block(text, "unreliable parse of evaluable text", Source::ParseFailure);
                result.parse_unreliable = true;
                return result;
            }
            // Not evaluable-looking; fall through to an ALLOW from static,
            // leaving the decision to the LLM.
            return ValidationResult::allow(text, Source::Blocklist);
        }
    };

    if let Some(reason) = find_var_in_command_position(&tree, text) {
        let action = match config.var_cmd_action {
            VarCmdAction::Warn => Action::Warn,
            VarCmdAction::Block => Action::Block,
        };
        return ValidationResult {
            action,
            reason,
            confidence: 1.0,
            resolved_command: text.to_string(),
            source: Source::VarInCmd,
            parse_unreliable: false,
        };
    }

    if let Some(reason) = find_unresolved_cmdsub_in_exec_position(&tree, text) {
        return ValidationResult::block(text, reason, Source::VarInCmd);
    }

    // 5. Compound decomposition: split into top-level simple commands and
    // recombine under the severity ordering (P3).
    let segments = bash::top_level_simple_commands(&tree, text);
    if segments.len() <= 1 {
        return ValidationResult::allow(text, Source::Blocklist);
    }

    let mut composite: Option<ValidationResult> = None;
    for segment in segments {
        let segment_result = validate_static(segment, config);
        composite = Some(match composite {
            None => segment_result,
            Some(acc) => acc.combine(segment_result),
        });
    }
    composite
        .map(|mut r| {
            r.resolved_command = text.to_string();
            r
        })
        .unwrap_or_else(|| ValidationResult::allow(text, Source::Blocklist))
}

fn looks_shell_evaluable(text: &str) -> bool {
    text.contains('$') || text.contains('`') || text.contains("eval") || text.contains("exec")
}

/// Walks the tree looking for a `command` node whose first word is a
/// parameter expansion (`$cmd ...`) or whose executable is clearly
/// assembled from variables at runtime.
fn find_var_in_command_position(tree: &tree_sitter::Tree, source: &str) -> Option<String> {
    let mut found = None;
    bash::walk_commands(tree, source, |node, src| {
        if found.is_some() {
            return;
        }
        let mut cursor = node.walk();
        if let Some(name_node) = node.children(&mut cursor).find(|c| c.kind() == "command_name") {
            let mut inner = name_node.walk();
            let has_expansion = name_node
                .children(&mut inner)
                .any(|c| matches!(c.kind(), "simple_expansion" | "expansion"));
            if has_expansion {
                let text = node_text(name_node, src);
                found = Some(format!("variable in command position: {text}"));
            }
        }
    });
    found
}

/// If a `$(...)` / backtick substitution sits where the shell will use its
/// result as the command name, and it has not already been resolved (the
/// resolver replaces these with literal text before re-validating), this
/// is a BLOCK per spec §4.4 step 4.
fn find_unresolved_cmdsub_in_exec_position(tree: &tree_sitter::Tree, source: &str) -> Option<String> {
    let mut found = None;
    bash::walk_commands(tree, source, |node, src| {
        if found.is_some() {
            return;
        }
        let mut cursor = node.walk();
        if let Some(name_node) = node.children(&mut cursor).find(|c| c.kind() == "command_name") {
            let mut inner = name_node.walk();
            let has_cmdsub = name_node
                .children(&mut inner)
                .any(|c| matches!(c.kind(), "command_substitution"));
            if has_cmdsub {
                found = Some(format!(
                    "command substitution in executable position: {}",
                    node_text(name_node, src)
                ));
            }
        }
    });
    found
}

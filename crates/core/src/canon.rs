//! Canonicalizer (C2): deterministic, pure textual normalization.
//!
//! No I/O. `canonicalize` is idempotent (P7): running it twice produces
//! the same output as running it once.

/// Bytes whose presence anywhere in the command text inhibits the
/// quote-stripping pass globally, preserving source fidelity for the LLM.
/// `pub` so a future widening is a one-line, documented change rather than
/// a silent behavior drift (spec §9 Open Questions).
pub const INHIBIT_QUOTE_STRIP: &[char] = &['$', '`', '\\', ';', '&', '|', '(', ')', '<', '>', '\n'];

/// Runs the canonicalization pipeline in the order spec.md §4.2 specifies.
pub fn canonicalize(input: &str) -> String {
    let trimmed = input.trim();
    let collapsed = collapse_whitespace_outside_quotes(trimmed);
    let merged = merge_split_short_flags(&collapsed);
    if contains_inhibiting_byte(&merged) {
        merged
    } else {
        strip_pure_literal_quotes(&merged)
    }
}

fn contains_inhibiting_byte(text: &str) -> bool {
    text.chars().any(|c| INHIBIT_QUOTE_STRIP.contains(&c))
}

/// Collapses runs of ASCII spaces/tabs to a single space, except inside
/// single or double quoted regions, which are passed through verbatim.
fn collapse_whitespace_outside_quotes(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_single = false;
    let mut in_double = false;
    let mut chars = text.chars().peekable();
    let mut pending_space = false;

    while let Some(c) = chars.next() {
        if in_single {
            out.push(c);
            if c == '\'' {
                in_single = false;
            }
            continue;
        }
        if in_double {
            out.push(c);
            if c == '"' {
                in_double = false;
            }
            continue;
        }
        match c {
            '\'' => {
                flush_pending_space(&mut out, &mut pending_space);
                in_single = true;
                out.push(c);
            }
            '"' => {
                flush_pending_space(&mut out, &mut pending_space);
                in_double = true;
                out.push(c);
            }
            ' ' | '\t' => {
                pending_space = true;
            }
            _ => {
                flush_pending_space(&mut out, &mut pending_space);
                out.push(c);
            }
        }
    }
    out
}

fn flush_pending_space(out: &mut String, pending_space: &mut bool) {
    if *pending_space && !out.is_empty() {
        out.push(' ');
    }
    *pending_space = false;
}

/// Merges split short flags (`-r -f` -> `-rf`) only when every adjacent
/// token is a pure single-dash, all-alphabetic flag with no `=` and no
/// digits — never across quote or metacharacter boundaries.
fn merge_split_short_flags(text: &str) -> String {
    let tokens: Vec<&str> = text.split(' ').collect();
    let mut out: Vec<String> = Vec::with_capacity(tokens.len());

    for token in tokens {
        if let (Some(prev), true) = (out.last_mut(), is_mergeable_short_flag(token)) {
            if is_mergeable_short_flag(prev) {
                prev.push_str(&token[1..]);
                continue;
            }
        }
        out.push(token.to_string());
    }
    out.join(" ")
}

fn is_mergeable_short_flag(token: &str) -> bool {
    let bytes = token.as_bytes();
    bytes.len() > 1
        && bytes[0] == b'-'
        && bytes[1] != b'-'
        && !token.contains('=')
        && token[1..].chars().all(|c| c.is_ascii_alphabetic())
}

/// Removes quotes from tokens that are pure literals (contain no bytes
/// that would change meaning if unquoted). Only called when no inhibiting
/// byte is present anywhere in the text.
fn strip_pure_literal_quotes(text: &str) -> String {
    text.split(' ')
        .map(strip_token_quotes_if_pure)
        .collect::<Vec<_>>()
        .join(" ")
}

fn strip_token_quotes_if_pure(token: &str) -> String {
    let strip = |quote: char| -> Option<String> {
        let stripped = token.strip_prefix(quote)?.strip_suffix(quote)?;
        if stripped.is_empty() || stripped.contains(quote) {
            return None;
        }
        if stripped.chars().any(|c| INHIBIT_QUOTE_STRIP.contains(&c)) {
            return None;
        }
        Some(stripped.to_string())
    };
    strip('\'').or_else(|| strip('"')).unwrap_or_else(|| token.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_and_collapses_whitespace() {
        assert_eq!(canonicalize("  echo   hello  "), "echo hello");
    }

    #[test]
    fn merges_split_short_flags() {
        assert_eq!(canonicalize("rm -r -f /tmp/x"), "rm -rf /tmp/x");
    }

    #[test]
    fn does_not_merge_long_options() {
        assert_eq!(canonicalize("rm --recursive --force /tmp/x"), "rm --recursive --force /tmp/x");
    }

    #[test]
    fn does_not_merge_flag_with_equals_or_digits() {
        assert_eq!(canonicalize("cmd -n=1 -x2"), "cmd -n=1 -x2");
    }

    #[test]
    fn strips_pure_literal_quotes() {
        assert_eq!(canonicalize("echo 'hello'"), "echo hello");
    }

    #[test]
    fn inhibits_quote_stripping_with_dollar() {
        let input = "echo '$HOME'";
        assert_eq!(canonicalize(input), input.trim());
    }

    #[test]
    fn inhibits_quote_stripping_with_semicolon() {
        let input = "echo 'a'; echo 'b'";
        assert_eq!(canonicalize(input), input);
    }

    #[test]
    fn idempotent_p7() {
        let inputs = [
            "  echo   hello  ",
            "rm -r -f /tmp/x",
            "echo 'a'; echo 'b'",
            "echo '$HOME'",
        ];
        for input in inputs {
            let once = canonicalize(input);
            let twice = canonicalize(&once);
            assert_eq!(once, twice, "not idempotent for {input:?}");
        }
    }

    #[test]
    fn preserves_whitespace_inside_quotes() {
        assert_eq!(canonicalize("echo 'a   b'"), "echo 'a   b'");
    }
}

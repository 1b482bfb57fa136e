//! Thin wrapper around `tree-sitter-bash` (C3, consumed).
//!
//! Nothing here implements shell semantics; this module only walks the
//! structural tree tree-sitter-bash already builds, generalized per
//! spec §4.4 step 3: any node kind this walker does not special-case
//! recurses via a generic children walk rather than being silently
//! skipped.

use tree_sitter::{Node, Parser, Tree};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseUnreliable;

pub fn parse(text: &str) -> Result<Tree, ParseUnreliable> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_bash::LANGUAGE.into())
        .map_err(|_| ParseUnreliable)?;
    let tree = parser.parse(text, None).ok_or(ParseUnreliable)?;
    if tree.root_node().has_error() {
        return Err(ParseUnreliable);
    }
    Ok(tree)
}

/// Visits every `command` node in the tree, recursing generically through
/// any node kind — named compound kind or not — that isn't itself a
/// `command`. `visitor` is called with the command node and its source
/// span.
pub fn walk_commands<'a>(tree: &'a Tree, source: &'a str, mut visitor: impl FnMut(Node<'a>, &'a str)) {
    walk_node(tree.root_node(), source, &mut visitor);
}

fn walk_node<'a>(node: Node<'a>, source: &'a str, visitor: &mut impl FnMut(Node<'a>, &'a str)) {
    if node.kind() == "command" {
        visitor(node, source);
    }
    // Generic children recursion: covers every named compound kind above
    // plus anything tree-sitter-bash's grammar adds in the future.
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        walk_node(child, source, visitor);
    }
}

/// Returns the source text for a node.
pub fn node_text<'a>(node: Node<'a>, source: &'a str) -> &'a str {
    node.utf8_text(source.as_bytes()).unwrap_or("")
}

/// Byte range and inner command text of a `$(...)`/backtick command
/// substitution within the text it was found in.
pub struct Substitution {
    pub start: usize,
    pub end: usize,
    pub inner: String,
}

/// Locates the first (leftmost, outermost) `$(...)`/backtick command
/// substitution in `text` via the parsed AST, per spec §4.3 step 1: "extract
/// the inner command via the shell AST". Returns `None` on a parse failure
/// or when the text has no such substitution, in which case the resolver
/// falls back to a byte-level balanced-parenthesis scan.
pub fn first_command_substitution(text: &str) -> Option<Substitution> {
    let tree = parse(text).ok()?;
    find_command_substitution(tree.root_node(), text)
}

fn find_command_substitution(node: Node, source: &str) -> Option<Substitution> {
    if node.kind() == "command_substitution" {
        let start = node.start_byte();
        let end = node.end_byte();
        let inner = strip_substitution_delimiters(&source[start..end]).to_string();
        return Some(Substitution { start, end, inner });
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if let Some(found) = find_command_substitution(child, source) {
            return Some(found);
        }
    }
    None
}

fn strip_substitution_delimiters(text: &str) -> &str {
    if let Some(stripped) = text.strip_prefix("$(").and_then(|s| s.strip_suffix(')')) {
        return stripped;
    }
    if let Some(stripped) = text.strip_prefix('`').and_then(|s| s.strip_suffix('`')) {
        return stripped;
    }
    text
}

/// Splits the AST into the top-level simple commands, for C5 step 5's
/// compound decomposition. "Top-level" means direct descent through
/// list/pipeline/compound wrapper nodes without descending into a nested
/// subshell or function body, which are each kept as a single segment.
pub fn top_level_simple_commands<'a>(tree: &'a Tree, source: &'a str) -> Vec<&'a str> {
    let mut segments = Vec::new();
    collect_segments(tree.root_node(), source, &mut segments);
    segments
}

fn collect_segments<'a>(node: Node<'a>, source: &'a str, out: &mut Vec<&'a str>) {
    match node.kind() {
        "program" | "list" | "pipeline" | "redirected_statement" | "negated_command" => {
            let mut cursor = node.walk();
            for child in node.children(&mut cursor) {
                collect_segments(child, source, out);
            }
        }
        "command" | "subshell" | "function_definition" | "if_statement" | "for_statement"
        | "c_style_for_statement" | "while_statement" | "until_statement" | "case_statement"
        | "select_statement" | "compound_statement" => {
            out.push(node_text(node, source));
        }
        _ => {
            // Punctuation / operator nodes (`;`, `&&`, `||`, comments) carry
            // no command content and are skipped without recursing, since
            // recursing into them would just produce empty segments.
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_command() {
        let tree = parse("echo hello").unwrap();
        assert!(!tree.root_node().has_error());
    }

    #[test]
    fn reports_unreliable_on_malformed_input() {
        let result = parse("if [ 1 -eq 1");
        assert!(result.is_err());
    }

    #[test]
    fn walk_commands_finds_every_simple_command_in_a_pipeline() {
        let source = "cat file.txt | grep foo | wc -l";
        let tree = parse(source).unwrap();
        let mut count = 0;
        walk_commands(&tree, source, |_node, _src| count += 1);
        assert_eq!(count, 3);
    }

    #[test]
    fn walk_commands_recurses_into_compound_constructs() {
        let source = "if true; then echo yes; else echo no; fi";
        let tree = parse(source).unwrap();
        let mut count = 0;
        walk_commands(&tree, source, |_node, _src| count += 1);
        assert!(count >= 3);
    }

    #[test]
    fn top_level_simple_commands_splits_list() {
        let source = "echo a; echo b; echo c";
        let tree = parse(source).unwrap();
        let segments = top_level_simple_commands(&tree, source);
        assert_eq!(segments.len(), 3);
    }

    #[test]
    fn first_command_substitution_extracts_dollar_paren() {
        let sub = first_command_substitution("echo $(whoami)").unwrap();
        assert_eq!(sub.inner, "whoami");
        assert_eq!(&"echo $(whoami)"[sub.start..sub.end], "$(whoami)");
    }

    #[test]
    fn first_command_substitution_extracts_backtick() {
        let sub = first_command_substitution("echo `id`").unwrap();
        assert_eq!(sub.inner, "id");
    }

    #[test]
    fn first_command_substitution_finds_leftmost() {
        let text = "echo $(first) $(second)";
        let sub = first_command_substitution(text).unwrap();
        assert_eq!(sub.inner, "first");
    }

    #[test]
    fn first_command_substitution_none_when_absent() {
        assert!(first_command_substitution("echo hello").is_none());
    }
}

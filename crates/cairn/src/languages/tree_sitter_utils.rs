//! Shared tree-sitter utilities for the language extractors.
//!
//! Provides common functions for extracting text, positions, and syntax-error
//! locations from tree-sitter nodes.

// Tree-sitter returns usize for positions, but we store u32 for compactness.
// This is safe for practical source files (no file has 4 billion lines).
#![allow(clippy::cast_possible_truncation)]

use tree_sitter::Node;

/// Get text content of a tree-sitter node.
///
/// The source is already validated UTF-8, so slicing only fails if the node's
/// range falls outside it; that yields an empty string.
pub fn node_text<'a>(node: &Node<'_>, source: &'a str) -> &'a str {
    source.get(node.byte_range()).unwrap_or_else(|| {
        tracing::trace!(
            byte_range = ?node.byte_range(),
            node_kind = %node.kind(),
            "Node range outside source"
        );
        ""
    })
}

/// 1-indexed first line of a node.
pub fn start_line(node: &Node<'_>) -> u32 {
    node.start_position().row as u32 + 1
}

/// 1-indexed last line of a node.
pub fn end_line(node: &Node<'_>) -> u32 {
    node.end_position().row as u32 + 1
}

/// Number of lines a node spans.
pub fn line_count(node: &Node<'_>) -> u32 {
    end_line(node) - start_line(node) + 1
}

/// Declaration text up to (not including) the body node, whitespace collapsed.
pub fn signature_before(node: &Node<'_>, body: Option<Node<'_>>, source: &str) -> String {
    let end = body.map_or(node.end_byte(), |b| b.start_byte());
    let text = source.get(node.start_byte()..end).unwrap_or_default();
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches([';', ':', '{'])
        .trim_end()
        .to_string()
}

/// Visit every descendant of `node` in document order.
///
/// The callback returns `false` to skip a node's children.
pub fn walk_descendants<'t>(node: Node<'t>, mut visit: impl FnMut(Node<'t>) -> bool) {
    let mut cursor = node.walk();
    if !cursor.goto_first_child() {
        return;
    }
    loop {
        let descend = visit(cursor.node());
        if descend && cursor.goto_first_child() {
            continue;
        }
        loop {
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() || cursor.node() == node {
                return;
            }
        }
    }
}

/// Count descendants whose kind is in `kinds`.
pub fn count_kinds(node: Node<'_>, kinds: &[&str]) -> u32 {
    let mut count = 0;
    walk_descendants(node, |n| {
        if kinds.contains(&n.kind()) {
            count += 1;
        }
        true
    });
    count
}

/// Cyclomatic complexity estimate: one plus the number of decision points.
pub fn cyclomatic(body: Option<Node<'_>>, decision_kinds: &[&str]) -> u32 {
    1 + body.map_or(0, |b| count_kinds(b, decision_kinds))
}

/// Position (1-indexed line, column) of the first syntax error in a tree.
pub fn first_error(root: Node<'_>) -> Option<(u32, u32)> {
    if !root.has_error() {
        return None;
    }
    let mut found = None;
    walk_descendants(root, |n| {
        if found.is_some() {
            return false;
        }
        if n.is_error() || n.is_missing() {
            let pos = n.start_position();
            found = Some((pos.row as u32 + 1, pos.column as u32 + 1));
            return false;
        }
        n.has_error()
    });
    Some(found.unwrap_or_else(|| {
        let pos = root.start_position();
        (pos.row as u32 + 1, pos.column as u32 + 1)
    }))
}

/// Named children of a node, collected for indexing.
pub fn named_children<'t>(node: &Node<'t>) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor).collect()
}

/// Returns `true` if the node has an anonymous child token with this text.
pub fn has_token(node: &Node<'_>, token: &str) -> bool {
    let mut cursor = node.walk();
    node.children(&mut cursor).any(|c| !c.is_named() && c.kind() == token)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_rust(code: &str) -> tree_sitter::Tree {
        let mut parser = tree_sitter::Parser::new();
        parser
            .set_language(&tree_sitter_rust::LANGUAGE.into())
            .expect("tree-sitter-rust language should be valid");
        parser.parse(code, None).expect("parsing test code should succeed")
    }

    #[test]
    fn clean_tree_has_no_error() {
        let tree = parse_rust("fn main() {}\n");
        assert_eq!(first_error(tree.root_node()), None);
    }

    #[test]
    fn broken_tree_reports_error_line() {
        let tree = parse_rust("fn ok() {}\n\nfn broken( {\n");
        let (line, _) = first_error(tree.root_node()).expect("should find error");
        assert_eq!(line, 3);
    }

    #[test]
    fn signature_stops_at_body() {
        let code = "pub fn add(a: i32,\n    b: i32) -> i32 { a + b }";
        let tree = parse_rust(code);
        let func = tree.root_node().named_child(0).expect("function");
        let body = func.child_by_field_name("body");

        assert_eq!(
            signature_before(&func, body, code),
            "pub fn add(a: i32, b: i32) -> i32"
        );
    }

    #[test]
    fn walk_visits_all_descendants_once() {
        let tree = parse_rust("fn a() { if x { y(); } }");
        let ifs = count_kinds(tree.root_node(), &["if_expression"]);
        let calls = count_kinds(tree.root_node(), &["call_expression"]);
        assert_eq!(ifs, 1);
        assert_eq!(calls, 1);
    }
}

//! Tree and text helpers shared by the analyzers.
//!
//! Languages without a full syntax check locate calls and declarations with
//! regexes; the text helpers recover the argument text that follows a match.

use tree_sitter::Node;

/// Visit `root` and its descendants in document order without recursion.
///
/// `visit` returns false to stop the walk.
pub fn preorder<'t>(root: Node<'t>, mut visit: impl FnMut(Node<'t>) -> bool) {
    let mut cursor = root.walk();
    loop {
        if !visit(cursor.node()) {
            return;
        }
        if cursor.goto_first_child() {
            continue;
        }
        loop {
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() {
                return;
            }
        }
    }
}

/// 1-indexed line of a node's first byte.
pub fn node_line(node: Node) -> usize {
    node.start_position().row + 1
}

/// 1-indexed line containing `offset`.
pub fn line_of(source: &str, offset: usize) -> usize {
    let end = offset.min(source.len());
    source.as_bytes()[..end].iter().filter(|&&b| b == b'\n').count() + 1
}

/// A delimited argument list found in source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delimited<'s> {
    /// Top-level arguments, trimmed. Empty for `()`.
    pub args: Vec<&'s str>,
    /// Byte offset just past the closing delimiter.
    pub end: usize,
}

/// Split the comma-separated arguments of the call whose `(` is at `open`.
///
/// Nested parentheses, brackets, braces and quoted strings are skipped.
/// Returns None when the list is never closed.
pub fn call_arguments(source: &str, open: usize) -> Option<Delimited<'_>> {
    delimited(source, open, b'(', b')')
}

/// Like [`call_arguments`] for a `[...]` list.
pub fn bracket_arguments(source: &str, open: usize) -> Option<Delimited<'_>> {
    delimited(source, open, b'[', b']')
}

fn delimited(source: &str, open: usize, opener: u8, closer: u8) -> Option<Delimited<'_>> {
    let bytes = source.as_bytes();
    if bytes.get(open) != Some(&opener) {
        return None;
    }

    let mut args = Vec::new();
    let mut depth = 0usize;
    let mut start = open + 1;
    let mut i = open + 1;

    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'"' | b'\'' | b'`') => {
                i = skip_quoted(bytes, i, quote)?;
                continue;
            }
            b'(' | b'[' | b'{' => depth += 1,
            c if c == closer && depth == 0 => {
                let last = source[start..i].trim();
                if !last.is_empty() || !args.is_empty() {
                    args.push(last);
                }
                return Some(Delimited { args, end: i + 1 });
            }
            b')' | b']' | b'}' => depth = depth.checked_sub(1)?,
            b',' if depth == 0 => {
                args.push(source[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }

    None
}

/// Skip a quoted literal starting at `start`, returning the offset after it.
fn skip_quoted(bytes: &[u8], start: usize, quote: u8) -> Option<usize> {
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            c if c == quote => return Some(i + 1),
            b'\n' if quote != b'`' => return None,
            _ => i += 1,
        }
    }
    None
}

/// Strip one layer of matching quotes or backticks.
pub fn strip_quotes(text: &str) -> &str {
    let text = text.trim();
    for quote in ['"', '\'', '`'] {
        if let Some(inner) = text
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner;
        }
    }
    text
}

/// Offset of the first non-whitespace byte at or after `from`.
pub fn skip_whitespace(source: &str, from: usize) -> usize {
    let bytes = source.as_bytes();
    let mut i = from;
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_of() {
        let source = "one\ntwo\nthree";
        assert_eq!(line_of(source, 0), 1);
        assert_eq!(line_of(source, 4), 2);
        assert_eq!(line_of(source, 9), 3);
        assert_eq!(line_of(source, 1000), 3);
    }

    #[test]
    fn test_call_arguments_nested() {
        let source = "calloc(n * (m + 1), sizeof(int)) + 1";
        let call = call_arguments(source, 6).unwrap();
        assert_eq!(call.args, vec!["n * (m + 1)", "sizeof(int)"]);
        assert_eq!(&source[call.end..], " + 1");
    }

    #[test]
    fn test_call_arguments_empty_and_strings() {
        assert_eq!(call_arguments("f()", 1).unwrap().args, Vec::<&str>::new());

        let source = r#"printf("a, (b", x)"#;
        let call = call_arguments(source, 6).unwrap();
        assert_eq!(call.args, vec![r#""a, (b""#, "x"]);
    }

    #[test]
    fn test_call_arguments_unbalanced() {
        assert!(call_arguments("malloc(1 << 30", 6).is_none());
        assert!(call_arguments("malloc)", 6).is_none());
        assert!(call_arguments("f(a])", 1).is_none());
    }

    #[test]
    fn test_bracket_arguments() {
        let source = "new int[1000][2]";
        let dims = bracket_arguments(source, 7).unwrap();
        assert_eq!(dims.args, vec!["1000"]);
        assert_eq!(dims.end, 13);
        assert_eq!(bracket_arguments(source, dims.end).unwrap().args, vec!["2"]);
    }

    #[test]
    fn test_strip_quotes() {
        assert_eq!(strip_quotes("\"fs\""), "fs");
        assert_eq!(strip_quotes("'child_process'"), "child_process");
        assert_eq!(strip_quotes("`os`"), "os");
        assert_eq!(strip_quotes("bare"), "bare");
    }
}

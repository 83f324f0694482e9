//! JavaScript language analyzer using tree-sitter.

use lazy_static::lazy_static;
use regex::Regex;
use tree_sitter::{Language as Grammar, Node};

use crate::analysis::scan::{call_arguments, line_of, node_line, preorder, strip_quotes};
use crate::analysis::{AnalysisContext, ImportSet, Language, LanguageAnalyzer, ParsedSource};
use crate::eval::FoldedSize;
use crate::verdict::{Violation, ViolationKind};

lazy_static! {
    /// `import x from "m"` and `import "m"` on a single line.
    static ref IMPORT_RE: Regex =
        Regex::new(r#"(?m)^\s*import\s+(?:.+\s+from\s+)?['"]([^'"]+)['"]"#).unwrap();
    /// `require("m")` with a literal specifier.
    static ref REQUIRE_RE: Regex =
        Regex::new(r#"require\s*\(\s*['"]([^'"]+)['"]\s*\)"#).unwrap();
    /// Constructors that allocate a buffer sized by their first argument.
    static ref ALLOCATION_RE: Regex = Regex::new(concat!(
        r"Buffer\.alloc(?:Unsafe(?:Slow)?)?\s*\(",
        r"|\bnew\s+Array\s*\(",
        r"|\bArray\s*\(",
        r"|\b(?:Uint8|Uint8Clamped|Int8|Uint16|Int16|Uint32|Int32|Float32|Float64|BigInt64|BigUint64)Array\s*\(",
        r"|\b(?:Shared)?ArrayBuffer\s*\(",
    ))
    .unwrap();
}

/// JavaScript language analyzer.
pub struct JavaScriptAnalyzer {
    language: Grammar,
}

impl JavaScriptAnalyzer {
    pub fn new() -> Self {
        Self {
            language: tree_sitter_javascript::LANGUAGE.into(),
        }
    }

    /// Collect module specifiers from the tree and the text, and report
    /// loader calls whose specifier is not a literal.
    fn collect_imports(&self, parsed: &ParsedSource, ctx: &mut AnalysisContext) -> ImportSet {
        let mut found = Vec::new();
        let mut dynamic = Vec::new();

        preorder(parsed.tree.root_node(), |node| {
            match node.kind() {
                "import_statement" | "export_statement" => {
                    if let Some(source) = node.child_by_field_name("source") {
                        found.push((
                            source.start_byte(),
                            strip_quotes(parsed.node_text(source)).to_string(),
                        ));
                    }
                }
                "call_expression" if is_loader_call(node, parsed) => {
                    match literal_specifier(node, parsed) {
                        Some((offset, specifier)) => found.push((offset, specifier)),
                        None => dynamic.push(node),
                    }
                }
                _ => {}
            }
            true
        });

        for re in [&*IMPORT_RE, &*REQUIRE_RE] {
            for caps in re.captures_iter(parsed.source) {
                if let Some(m) = caps.get(1) {
                    found.push((m.start(), m.as_str().to_string()));
                }
            }
        }

        for node in dynamic {
            ctx.report(
                Violation::new(
                    ViolationKind::PolicyViolation,
                    "JS dynamic import/require is not allowed.",
                )
                .at_line(node_line(node)),
            );
        }

        ImportSet::from_occurrences(parsed.source, found)
    }
}

impl Default for JavaScriptAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageAnalyzer for JavaScriptAnalyzer {
    fn language(&self) -> Language {
        Language::JavaScript
    }

    fn parse<'s>(&self, source: &'s str) -> anyhow::Result<ParsedSource<'s>> {
        ParsedSource::parse(&self.language, source)
    }

    fn scan_imports(&self, parsed: &ParsedSource, ctx: &mut AnalysisContext) -> anyhow::Result<()> {
        let imports = self.collect_imports(parsed, ctx);
        if ctx.is_done() {
            return Ok(());
        }

        let mut external = ImportSet::new();
        for import in imports.iter().filter(|i| !is_relative(&i.path)) {
            external.insert(import.path.clone(), import.line);
        }
        ctx.check_import_budget(&external, "non-local JS imports");

        let rules = ctx.rules();
        for import in external.iter() {
            if ctx.is_done() {
                break;
            }
            let target = import.path.as_str();
            if rules.is_allowed(target) {
                continue;
            }
            let message = if rules.is_denied(target) {
                format!("JS import/require disallowed target '{}'.", target)
            } else {
                format!("JS import/require target '{}' not allowed.", target)
            };
            ctx.report(Violation::new(ViolationKind::PolicyViolation, message).at_line(import.line));
        }
        Ok(())
    }

    fn scan_patterns(&self, parsed: &ParsedSource, ctx: &mut AnalysisContext) -> anyhow::Result<()> {
        let rules = ctx.rules();
        ctx.scan_textual(parsed.source, rules.textual_patterns(), "Blocked JS pattern");
        Ok(())
    }

    fn scan_allocations(
        &self,
        parsed: &ParsedSource,
        ctx: &mut AnalysisContext,
    ) -> anyhow::Result<()> {
        let source = parsed.source;
        for m in ALLOCATION_RE.find_iter(source) {
            if ctx.is_done() {
                break;
            }
            let label = m
                .as_str()
                .trim_end_matches('(')
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ");
            let open = m.end() - 1;
            let (size, expr) = match call_arguments(source, open) {
                Some(call) => match call.args.first() {
                    None => (FoldedSize::Known(0), String::new()),
                    Some(first) if first_argument_is_literal(parsed, open) => {
                        (FoldedSize::Known(0), first.to_string())
                    }
                    Some(first) => (FoldedSize::of(first), first.to_string()),
                },
                None => (FoldedSize::Unknown, String::new()),
            };
            if !size.is_below(ctx.byte_threshold()) {
                ctx.report(
                    Violation::new(
                        ViolationKind::AllocationTooLarge,
                        format!("Large JS allocation detected: {}({})", label, expr),
                    )
                    .at_line(line_of(source, m.start())),
                );
            }
        }
        Ok(())
    }
}

fn is_relative(specifier: &str) -> bool {
    specifier.starts_with('.') || specifier.starts_with('/')
}

/// `require(...)` or `import(...)`.
fn is_loader_call(node: Node, parsed: &ParsedSource) -> bool {
    match node.child_by_field_name("function") {
        Some(f) if f.kind() == "import" => true,
        Some(f) if f.kind() == "identifier" => parsed.node_text(f) == "require",
        _ => false,
    }
}

/// The literal specifier passed to a loader call, with its offset.
fn literal_specifier(call: Node, parsed: &ParsedSource) -> Option<(usize, String)> {
    let args = call.child_by_field_name("arguments")?;
    let mut cursor = args.walk();
    let first = args
        .named_children(&mut cursor)
        .find(|n| n.kind() != "comment")?;

    match first.kind() {
        "string" => Some((
            first.start_byte(),
            strip_quotes(parsed.node_text(first)).to_string(),
        )),
        "template_string" if !is_interpolated(first) => Some((
            first.start_byte(),
            strip_quotes(parsed.node_text(first)).to_string(),
        )),
        _ => None,
    }
}

fn is_interpolated(template: Node) -> bool {
    let mut cursor = template.walk();
    let interpolated = template
        .named_children(&mut cursor)
        .any(|n| n.kind() == "template_substitution");
    interpolated
}

/// Whether the call whose `(` sits at `open` takes a single array or string
/// literal as its first argument. Such contents are bounded by the submission.
fn first_argument_is_literal(parsed: &ParsedSource, open: usize) -> bool {
    let Some(paren) = parsed
        .tree
        .root_node()
        .descendant_for_byte_range(open, open + 1)
    else {
        return false;
    };
    let Some(args) = paren.parent().filter(|p| p.kind() == "arguments") else {
        return false;
    };
    let mut cursor = args.walk();
    let first = args
        .named_children(&mut cursor)
        .find(|n| n.kind() != "comment");
    match first {
        Some(node) if matches!(node.kind(), "array" | "string") => true,
        Some(node) if node.kind() == "template_string" => !is_interpolated(node),
        _ => false,
    }
}

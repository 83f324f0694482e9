//! Go language analyzer using tree-sitter.

use lazy_static::lazy_static;
use regex::Regex;
use streaming_iterator::StreamingIterator;
use tree_sitter::{Language as Grammar, Query, QueryCursor};

use crate::analysis::scan::{call_arguments, line_of, strip_quotes};
use crate::analysis::{AnalysisContext, ImportSet, Language, LanguageAnalyzer, ParsedSource};
use crate::eval::FoldedSize;
use crate::verdict::{Violation, ViolationKind};

/// Tree-sitter query for extracting imports.
///
/// Matches single, aliased, blank, dot and grouped imports alike since
/// every form ends in an `import_spec`.
const IMPORT_QUERY: &str = r#"
(import_spec
  path: (_) @path
) @import
"#;

lazy_static! {
    /// `import "fmt"` and `import f "fmt"` on a single line.
    static ref SINGLE_IMPORT_RE: Regex =
        Regex::new(r#"(?m)^\s*import\s+(?:[\w.]+\s+)?["`]([^"`]+)["`]"#).unwrap();
    /// `import ( ... )` blocks.
    static ref BLOCK_IMPORT_RE: Regex = Regex::new(r"import\s*\(([^)]*)\)").unwrap();
    static ref QUOTED_RE: Regex = Regex::new(r#"["`]([^"`]+)["`]"#).unwrap();
    static ref MAKE_RE: Regex = Regex::new(r"\bmake\s*\(").unwrap();
    /// Fixed-size array types such as `[1 << 20]byte` or `[100][100]int`.
    static ref ARRAY_TYPE_RE: Regex =
        Regex::new(r"((?:\[[^\[\]\n]+\][ \t]*)+)(?:[A-Za-z_*]|\[\])").unwrap();
    static ref DIMENSION_RE: Regex = Regex::new(r"\[([^\]]*)\]").unwrap();
}

/// Go language analyzer.
pub struct GoAnalyzer {
    language: Grammar,
}

impl GoAnalyzer {
    pub fn new() -> Self {
        Self {
            language: tree_sitter_go::LANGUAGE.into(),
        }
    }

    fn extract_imports(&self, parsed: &ParsedSource) -> anyhow::Result<ImportSet> {
        let query = Query::new(&self.language, IMPORT_QUERY)?;
        let mut cursor = QueryCursor::new();
        let mut matches = cursor.matches(&query, parsed.tree.root_node(), parsed.source.as_bytes());

        let mut found = Vec::new();
        while let Some(m) = matches.next() {
            for capture in m.captures {
                if query.capture_names()[capture.index as usize] == "path" {
                    let path = strip_quotes(parsed.node_text(capture.node));
                    found.push((capture.node.start_byte(), path.to_string()));
                }
            }
        }

        for caps in SINGLE_IMPORT_RE.captures_iter(parsed.source) {
            if let Some(m) = caps.get(1) {
                found.push((m.start(), m.as_str().to_string()));
            }
        }
        for caps in BLOCK_IMPORT_RE.captures_iter(parsed.source) {
            let Some(block) = caps.get(1) else {
                continue;
            };
            for inner in QUOTED_RE.captures_iter(block.as_str()) {
                if let Some(m) = inner.get(1) {
                    found.push((block.start() + m.start(), m.as_str().to_string()));
                }
            }
        }

        Ok(ImportSet::from_occurrences(parsed.source, found))
    }

    fn check_make(&self, source: &str, ctx: &mut AnalysisContext) {
        for m in MAKE_RE.find_iter(source) {
            if ctx.is_done() {
                return;
            }
            let Some(call) = call_arguments(source, m.end() - 1) else {
                continue;
            };
            for expr in call.args.iter().skip(1).take(2) {
                if ctx.too_large(FoldedSize::of(expr)) {
                    ctx.report(
                        Violation::new(
                            ViolationKind::AllocationTooLarge,
                            format!("Large Go allocation detected: make(..., {})", expr),
                        )
                        .at_line(line_of(source, m.start())),
                    );
                    break;
                }
            }
        }
    }

    fn check_array_types(&self, source: &str, ctx: &mut AnalysisContext) {
        for caps in ARRAY_TYPE_RE.captures_iter(source) {
            if ctx.is_done() {
                return;
            }
            let Some(dims) = caps.get(1) else {
                continue;
            };
            let total = DIMENSION_RE
                .captures_iter(dims.as_str())
                .map(|d| {
                    d.get(1)
                        .map(|e| FoldedSize::of(e.as_str()))
                        .unwrap_or(FoldedSize::Unknown)
                })
                .fold(FoldedSize::Known(1), FoldedSize::times);

            if ctx.too_large(total) {
                ctx.report(
                    Violation::new(
                        ViolationKind::AllocationTooLarge,
                        format!("Large Go array type: {}", dims.as_str().trim()),
                    )
                    .at_line(line_of(source, dims.start())),
                );
            }
        }
    }
}

impl Default for GoAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageAnalyzer for GoAnalyzer {
    fn language(&self) -> Language {
        Language::Go
    }

    fn parse<'s>(&self, source: &'s str) -> anyhow::Result<ParsedSource<'s>> {
        ParsedSource::parse(&self.language, source)
    }

    fn scan_imports(&self, parsed: &ParsedSource, ctx: &mut AnalysisContext) -> anyhow::Result<()> {
        let imports = self.extract_imports(parsed)?;
        ctx.check_import_budget(&imports, "Go imports");

        let rules = ctx.rules();
        for import in imports.iter() {
            if ctx.is_done() {
                break;
            }
            let path = import.path.as_str();
            let short = path.rsplit('/').next().unwrap_or(path);
            let message = if rules.is_denied(short) {
                format!("Go '{}' package is disallowed.", short)
            } else if !rules.is_allowed(short) {
                format!("Go import not allowed: {}", path)
            } else {
                continue;
            };
            ctx.report(Violation::new(ViolationKind::PolicyViolation, message).at_line(import.line));
        }
        Ok(())
    }

    fn scan_patterns(&self, parsed: &ParsedSource, ctx: &mut AnalysisContext) -> anyhow::Result<()> {
        let rules = ctx.rules();
        ctx.scan_textual(parsed.source, rules.textual_patterns(), "Suspicious pattern in Go");
        Ok(())
    }

    fn scan_allocations(
        &self,
        parsed: &ParsedSource,
        ctx: &mut AnalysisContext,
    ) -> anyhow::Result<()> {
        self.check_make(parsed.source, ctx);
        if !ctx.is_done() {
            self.check_array_types(parsed.source, ctx);
        }
        Ok(())
    }
}

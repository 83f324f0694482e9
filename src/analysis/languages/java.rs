//! Java language analyzer using tree-sitter.

use lazy_static::lazy_static;
use regex::Regex;
use streaming_iterator::StreamingIterator;
use tree_sitter::{Language as Grammar, Query, QueryCursor};

use crate::analysis::scan::{bracket_arguments, call_arguments, line_of, skip_whitespace};
use crate::analysis::{AnalysisContext, ImportSet, Language, LanguageAnalyzer, ParsedSource};
use crate::eval::FoldedSize;
use crate::verdict::{Violation, ViolationKind};

/// Tree-sitter query for extracting imports.
const IMPORT_QUERY: &str = r#"
; import com.package.Class;  import static com.package.Class.method;
(import_declaration
  (scoped_identifier) @import_path
) @import

; import Class;
(import_declaration
  (identifier) @import_path
) @import_simple
"#;

lazy_static! {
    static ref IMPORT_RE: Regex =
        Regex::new(r"(?m)^\s*import\s+(?:static\s+)?([\w.]+?)(?:\s*\.\s*\*)?\s*;").unwrap();
    static ref NEW_ARRAY_RE: Regex =
        Regex::new(r"\bnew\s+(byte|short|int|long|float|double|char|boolean)\s*\[").unwrap();
    static ref BYTE_BUFFER_RE: Regex =
        Regex::new(r"\bByteBuffer\s*\.\s*allocate(?:Direct)?\s*\(").unwrap();
}

/// Java language analyzer.
pub struct JavaAnalyzer {
    language: Grammar,
}

impl JavaAnalyzer {
    pub fn new() -> Self {
        Self {
            language: tree_sitter_java::LANGUAGE.into(),
        }
    }

    fn extract_imports(&self, parsed: &ParsedSource) -> anyhow::Result<ImportSet> {
        let query = Query::new(&self.language, IMPORT_QUERY)?;
        let mut cursor = QueryCursor::new();
        let mut matches = cursor.matches(&query, parsed.tree.root_node(), parsed.source.as_bytes());

        let mut found = Vec::new();
        while let Some(m) = matches.next() {
            for capture in m.captures {
                if query.capture_names()[capture.index as usize] == "import_path" {
                    let path: String = parsed
                        .node_text(capture.node)
                        .chars()
                        .filter(|c| !c.is_whitespace())
                        .collect();
                    found.push((capture.node.start_byte(), path));
                }
            }
        }

        for caps in IMPORT_RE.captures_iter(parsed.source) {
            if let Some(m) = caps.get(1) {
                found.push((m.start(), m.as_str().to_string()));
            }
        }

        Ok(ImportSet::from_occurrences(parsed.source, found))
    }

    /// `new byte[N]`, including multi-dimensional `new int[N][M]`.
    fn check_primitive_arrays(&self, source: &str, ctx: &mut AnalysisContext) {
        for caps in NEW_ARRAY_RE.captures_iter(source) {
            if ctx.is_done() {
                return;
            }
            let (Some(whole), Some(ty)) = (caps.get(0), caps.get(1)) else {
                continue;
            };

            let open = whole.end() - 1;
            let mut end = open;
            let mut total = FoldedSize::Known(1);
            let mut dims = 0;
            while let Some(dim) = bracket_arguments(source, skip_whitespace(source, end)) {
                match dim.args.as_slice() {
                    [expr] => total = total.times(FoldedSize::of(expr)),
                    _ => break,
                }
                end = dim.end;
                dims += 1;
            }
            if dims == 0 || !ctx.too_large(total) {
                continue;
            }

            ctx.report(
                Violation::new(
                    ViolationKind::AllocationTooLarge,
                    format!(
                        "Large Java {}[] allocation: new {}{}",
                        ty.as_str(),
                        ty.as_str(),
                        &source[open..end]
                    ),
                )
                .at_line(line_of(source, whole.start())),
            );
        }
    }

    fn check_byte_buffers(&self, source: &str, ctx: &mut AnalysisContext) {
        for m in BYTE_BUFFER_RE.find_iter(source) {
            if ctx.is_done() {
                return;
            }
            let Some(call) = call_arguments(source, m.end() - 1) else {
                continue;
            };
            let Some(expr) = call.args.first() else {
                continue;
            };
            if ctx.too_large(FoldedSize::of(expr)) {
                ctx.report(
                    Violation::new(
                        ViolationKind::AllocationTooLarge,
                        format!(
                            "Large ByteBuffer allocation: {}",
                            &source[m.start()..call.end]
                        ),
                    )
                    .at_line(line_of(source, m.start())),
                );
            }
        }
    }
}

impl Default for JavaAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageAnalyzer for JavaAnalyzer {
    fn language(&self) -> Language {
        Language::Java
    }

    fn parse<'s>(&self, source: &'s str) -> anyhow::Result<ParsedSource<'s>> {
        ParsedSource::parse(&self.language, source)
    }

    fn scan_imports(&self, parsed: &ParsedSource, ctx: &mut AnalysisContext) -> anyhow::Result<()> {
        let imports = self.extract_imports(parsed)?;
        ctx.check_import_budget(&imports, "Java imports");

        let rules = ctx.rules();
        for import in imports.iter() {
            if ctx.is_done() {
                break;
            }
            let path = import.path.as_str();
            if rules.allowed_prefix(path) {
                continue;
            }
            let message = if rules.denied_prefix(path) {
                format!("Java import for filesystem/network not allowed: {}", path)
            } else {
                format!("Java import not allowed: {}", path)
            };
            ctx.report(Violation::new(ViolationKind::PolicyViolation, message).at_line(import.line));
        }
        Ok(())
    }

    fn scan_patterns(&self, parsed: &ParsedSource, ctx: &mut AnalysisContext) -> anyhow::Result<()> {
        let rules = ctx.rules();
        ctx.scan_textual(parsed.source, rules.textual_patterns(), "Blocked Java pattern");
        Ok(())
    }

    fn scan_allocations(
        &self,
        parsed: &ParsedSource,
        ctx: &mut AnalysisContext,
    ) -> anyhow::Result<()> {
        self.check_primitive_arrays(parsed.source, ctx);
        if !ctx.is_done() {
            self.check_byte_buffers(parsed.source, ctx);
        }
        Ok(())
    }
}

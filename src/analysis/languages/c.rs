//! C language analyzer using tree-sitter.
//!
//! Includes come from both the tree and a textual scan so that headers
//! hidden from the grammar (for example behind a broken declaration) are
//! still seen. Allocation sizes are folded after `sizeof(<primitive>)` is
//! replaced by the size of the type on a 64-bit target.

use std::borrow::Cow;

use lazy_static::lazy_static;
use phf::phf_map;
use regex::{Captures, Regex};
use streaming_iterator::StreamingIterator;
use tree_sitter::{Language as Grammar, Query, QueryCursor};

use crate::analysis::scan::{call_arguments, line_of, strip_quotes};
use crate::analysis::{AnalysisContext, ImportSet, Language, LanguageAnalyzer, ParsedSource};
use crate::eval::FoldedSize;
use crate::verdict::{Violation, ViolationKind};

/// Tree-sitter query for extracting includes.
const IMPORT_QUERY: &str = r#"
; #include <header.h>
(preproc_include
  path: (system_lib_string) @system_include
) @include_system

; #include "header.h"
(preproc_include
  path: (string_literal) @local_include
) @include_local

; #include HEADER_MACRO
(preproc_include
  path: (identifier) @macro_include
) @include_macro
"#;

/// Sizes of primitive types on LP64 targets.
static PRIMITIVE_SIZES: phf::Map<&'static str, i128> = phf_map! {
    "char" => 1,
    "signed char" => 1,
    "unsigned char" => 1,
    "bool" => 1,
    "_Bool" => 1,
    "short" => 2,
    "short int" => 2,
    "unsigned short" => 2,
    "int" => 4,
    "unsigned" => 4,
    "unsigned int" => 4,
    "float" => 4,
    "long" => 8,
    "long int" => 8,
    "unsigned long" => 8,
    "long long" => 8,
    "unsigned long long" => 8,
    "double" => 8,
    "long double" => 16,
    "size_t" => 8,
    "ssize_t" => 8,
    "int8_t" => 1,
    "uint8_t" => 1,
    "int16_t" => 2,
    "uint16_t" => 2,
    "int32_t" => 4,
    "uint32_t" => 4,
    "int64_t" => 8,
    "uint64_t" => 8,
};

/// Pointer size on 64-bit targets.
const POINTER_SIZE: i128 = 8;

lazy_static! {
    static ref INCLUDE_RE: Regex = Regex::new(r#"#\s*include\s*[<"]([^>"]+)[>"]"#).unwrap();
    static ref MACRO_INCLUDE_RE: Regex = Regex::new(r"#\s*include\s+([A-Za-z_]\w*)").unwrap();
    static ref ALLOC_RE: Regex = Regex::new(r"\b(malloc|calloc|realloc|alloca)\s*\(").unwrap();
    static ref ARRAY_RE: Regex =
        Regex::new(r"\b[A-Za-z_]\w*\s+\**\s*[A-Za-z_]\w*\s*((?:\[[^\]]*\]\s*)+)[;=,]").unwrap();
    static ref DIMENSION_RE: Regex = Regex::new(r"\[([^\]]*)\]").unwrap();
    static ref SIZEOF_RE: Regex =
        Regex::new(r"\bsizeof\s*\(\s*([A-Za-z_][A-Za-z0-9_ \t]*?)\s*(\*+)?\s*\)").unwrap();
}

/// C language analyzer.
pub struct CAnalyzer {
    language: Grammar,
}

impl CAnalyzer {
    pub fn new() -> Self {
        Self {
            language: tree_sitter_c::LANGUAGE.into(),
        }
    }

    fn extract_includes(&self, parsed: &ParsedSource) -> anyhow::Result<ImportSet> {
        let query = Query::new(&self.language, IMPORT_QUERY)?;
        let mut cursor = QueryCursor::new();
        let mut matches = cursor.matches(&query, parsed.tree.root_node(), parsed.source.as_bytes());

        let mut found = Vec::new();
        while let Some(m) = matches.next() {
            for capture in m.captures {
                let capture_name = query.capture_names()[capture.index as usize];
                let text = parsed.node_text(capture.node);
                let header = match capture_name {
                    "system_include" => text.trim_start_matches('<').trim_end_matches('>'),
                    "local_include" => strip_quotes(text),
                    "macro_include" => text,
                    _ => continue,
                };
                found.push((capture.node.start_byte(), header.trim().to_string()));
            }
        }

        for re in [&*INCLUDE_RE, &*MACRO_INCLUDE_RE] {
            for caps in re.captures_iter(parsed.source) {
                if let Some(m) = caps.get(1) {
                    found.push((m.start(), m.as_str().trim().to_string()));
                }
            }
        }

        Ok(ImportSet::from_occurrences(parsed.source, found))
    }

    fn check_heap_allocations(&self, source: &str, ctx: &mut AnalysisContext) {
        for caps in ALLOC_RE.captures_iter(source) {
            if ctx.is_done() {
                return;
            }
            let (Some(whole), Some(function)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let Some(call) = call_arguments(source, whole.end() - 1) else {
                continue;
            };

            let sizes: Vec<FoldedSize> = call.args.iter().map(|a| c_size(a)).collect();
            let too_large = match (function.as_str(), sizes.as_slice()) {
                ("malloc" | "alloca", [n]) => ctx.too_large(*n),
                ("calloc", [count, each]) => {
                    ctx.too_large(*count) || ctx.too_large(*each) || ctx.too_large(count.times(*each))
                }
                ("realloc", [_, n]) => ctx.too_large(*n),
                _ => false,
            };
            if too_large {
                ctx.report(
                    Violation::new(
                        ViolationKind::AllocationTooLarge,
                        format!("C allocation too large: {}", &source[whole.start()..call.end]),
                    )
                    .at_line(line_of(source, whole.start())),
                );
            }
        }
    }

    fn check_static_arrays(&self, source: &str, ctx: &mut AnalysisContext) {
        for caps in ARRAY_RE.captures_iter(source) {
            if ctx.is_done() {
                return;
            }
            let Some(dims) = caps.get(1) else {
                continue;
            };

            let mut total = FoldedSize::Known(1);
            for dim in DIMENSION_RE.captures_iter(dims.as_str()) {
                let expr = dim.get(1).map(|m| m.as_str().trim()).unwrap_or("");
                if expr.is_empty() {
                    total = FoldedSize::Unknown;
                    break;
                }
                total = total.times(c_size(expr));
            }

            if ctx.too_large(total) {
                ctx.report(
                    Violation::new(
                        ViolationKind::AllocationTooLarge,
                        format!("Static array allocation too large: {}", dims.as_str().trim()),
                    )
                    .at_line(line_of(source, dims.start())),
                );
            }
        }
    }
}

impl Default for CAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageAnalyzer for CAnalyzer {
    fn language(&self) -> Language {
        Language::C
    }

    fn parse<'s>(&self, source: &'s str) -> anyhow::Result<ParsedSource<'s>> {
        ParsedSource::parse(&self.language, source)
    }

    fn scan_imports(&self, parsed: &ParsedSource, ctx: &mut AnalysisContext) -> anyhow::Result<()> {
        let includes = self.extract_includes(parsed)?;
        ctx.check_import_budget(&includes, "C includes");

        let rules = ctx.rules();
        for include in includes.iter() {
            if ctx.is_done() {
                break;
            }
            let header = include.path.as_str();
            if rules.is_denied(header) || !rules.is_allowed(header) {
                ctx.report(
                    Violation::new(
                        ViolationKind::PolicyViolation,
                        format!("C header not allowed: {}", header),
                    )
                    .at_line(include.line),
                );
            }
        }
        Ok(())
    }

    fn scan_patterns(&self, parsed: &ParsedSource, ctx: &mut AnalysisContext) -> anyhow::Result<()> {
        let rules = ctx.rules();
        ctx.scan_textual(
            parsed.source,
            rules.textual_patterns(),
            "Blocked function/pattern in C",
        );
        Ok(())
    }

    fn scan_allocations(
        &self,
        parsed: &ParsedSource,
        ctx: &mut AnalysisContext,
    ) -> anyhow::Result<()> {
        self.check_heap_allocations(parsed.source, ctx);
        if !ctx.is_done() {
            self.check_static_arrays(parsed.source, ctx);
        }
        Ok(())
    }
}

/// Fold a C size expression after substituting known `sizeof` terms.
fn c_size(expr: &str) -> FoldedSize {
    FoldedSize::of(&substitute_sizeof(expr))
}

fn substitute_sizeof(expr: &str) -> Cow<'_, str> {
    SIZEOF_RE.replace_all(expr, |caps: &Captures| {
        let whole = caps.get(0).map(|m| m.as_str()).unwrap_or("");
        if caps.get(2).is_some() {
            return POINTER_SIZE.to_string();
        }
        let ty = caps
            .get(1)
            .map(|m| m.as_str().split_whitespace().collect::<Vec<_>>().join(" "))
            .unwrap_or_default();
        match PRIMITIVE_SIZES.get(ty.as_str()) {
            Some(size) => size.to_string(),
            None => whole.to_string(),
        }
    })
}

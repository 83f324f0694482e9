//! Core traits and shared types for language analysis.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::AnalysisContext;

/// A supported submission language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    JavaScript,
    C,
    Go,
    Java,
}

impl Language {
    pub const ALL: [Language; 5] = [
        Language::Python,
        Language::JavaScript,
        Language::C,
        Language::Go,
        Language::Java,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::C => "c",
            Language::Go => "go",
            Language::Java => "java",
        }
    }

    /// Resolve a language tag, case-insensitively and with aliases.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match normalize_tag(tag).as_str() {
            "python" | "py" | "python3" => Some(Language::Python),
            "javascript" | "js" | "node" | "nodejs" => Some(Language::JavaScript),
            "c" => Some(Language::C),
            "go" | "golang" => Some(Language::Go),
            "java" => Some(Language::Java),
            _ => None,
        }
    }

    /// Resolve a file extension (without the dot).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "py" => Some(Language::Python),
            "js" | "mjs" | "cjs" => Some(Language::JavaScript),
            "c" | "h" => Some(Language::C),
            "go" => Some(Language::Go),
            "java" => Some(Language::Java),
            _ => None,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Language::from_tag(s).ok_or_else(|| format!("unsupported language: {}", normalize_tag(s)))
    }
}

/// Lowercase and trim a language tag.
pub fn normalize_tag(tag: &str) -> String {
    tag.trim().to_lowercase()
}

/// A submission prepared for analysis.
///
/// The tree is kept alongside the text so several scans can share one parse.
pub struct ParsedSource<'s> {
    /// The submitted source text.
    pub source: &'s str,
    /// The tree-sitter tree, possibly containing ERROR nodes.
    pub tree: tree_sitter::Tree,
}

impl<'s> ParsedSource<'s> {
    /// Parse `source` with the given grammar.
    pub fn parse(language: &tree_sitter::Language, source: &'s str) -> anyhow::Result<Self> {
        let mut parser = tree_sitter::Parser::new();
        parser.set_language(language)?;
        let tree = parser
            .parse(source, None)
            .ok_or_else(|| anyhow::anyhow!("failed to parse source"))?;
        Ok(Self { source, tree })
    }

    /// Get text for a tree-sitter node.
    pub fn node_text(&self, node: tree_sitter::Node) -> &'s str {
        self.source.get(node.byte_range()).unwrap_or("")
    }
}

/// An import, include or require target found in a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    pub path: String,
    /// 1-indexed line of the first occurrence.
    pub line: usize,
}

/// Distinct import targets in order of first appearance.
#[derive(Debug, Clone, Default)]
pub struct ImportSet {
    imports: Vec<Import>,
    seen: HashSet<String>,
}

impl ImportSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from `(byte offset, path)` occurrences found by any
    /// number of extractors.
    pub fn from_occurrences(source: &str, mut occurrences: Vec<(usize, String)>) -> Self {
        occurrences.sort_by_key(|(offset, _)| *offset);
        let mut set = Self::new();
        for (offset, path) in occurrences {
            set.insert(path, super::scan::line_of(source, offset));
        }
        set
    }

    /// Insert a target. Returns false if it was already present.
    pub fn insert(&mut self, path: impl Into<String>, line: usize) -> bool {
        let path = path.into();
        if path.is_empty() || !self.seen.insert(path.clone()) {
            return false;
        }
        self.imports.push(Import { path, line });
        true
    }

    pub fn contains(&self, path: &str) -> bool {
        self.seen.contains(path)
    }

    pub fn len(&self) -> usize {
        self.imports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.imports.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Import> {
        self.imports.iter()
    }
}

/// Language-specific analyzer trait.
///
/// Each language implements the same three scans against the policy rules
/// held by the [`AnalysisContext`]. Scans report violations into the context
/// and return an error only for internal failures (grammar or query errors),
/// which the caller turns into a rejection.
///
/// # Thread Safety
///
/// Analyzers are shared statics. tree_sitter::Parser is not Sync, so a
/// parser is created per call.
pub trait LanguageAnalyzer: Send + Sync {
    /// The language this analyzer handles.
    fn language(&self) -> Language;

    /// Parse a submission.
    fn parse<'s>(&self, source: &'s str) -> anyhow::Result<ParsedSource<'s>>;

    /// Reject submissions that are not syntactically valid. Returns false
    /// when the remaining scans should be skipped. Most languages are only
    /// partially parsed and accept anything here.
    fn check_syntax(&self, _parsed: &ParsedSource, _ctx: &mut AnalysisContext) -> bool {
        true
    }

    /// Check imports/includes against the allow and deny lists and the
    /// import budget.
    fn scan_imports(&self, parsed: &ParsedSource, ctx: &mut AnalysisContext) -> anyhow::Result<()>;

    /// Check for dangerous calls and API references.
    fn scan_patterns(&self, parsed: &ParsedSource, ctx: &mut AnalysisContext) -> anyhow::Result<()>;

    /// Fold allocation sizes and reject those at or above the threshold.
    fn scan_allocations(&self, parsed: &ParsedSource, ctx: &mut AnalysisContext)
        -> anyhow::Result<()>;

    /// Run every scan in order, stopping early once the context is done.
    fn analyze(&self, parsed: &ParsedSource, ctx: &mut AnalysisContext) -> anyhow::Result<()> {
        if !self.check_syntax(parsed, ctx) || ctx.is_done() {
            return Ok(());
        }
        self.scan_imports(parsed, ctx)?;
        if ctx.is_done() {
            return Ok(());
        }
        self.scan_patterns(parsed, ctx)?;
        if ctx.is_done() {
            return Ok(());
        }
        self.scan_allocations(parsed, ctx)
    }
}

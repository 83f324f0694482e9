//! Per-language safety analysis.
//!
//! Each supported language has an analyzer that parses a submission with
//! tree-sitter and runs three scans against the policy rules: imports,
//! dangerous patterns, and constant allocation sizes.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌──────────────┐     ┌────────────────┐
//! │ Submission      │────▶│ Analyzer     │────▶│ AnalysisContext│
//! │ (code, lang)    │     │ (parse+scan) │     │ (violations)   │
//! └─────────────────┘     └──────────────┘     └────────────────┘
//!                                │                     │
//!                                ▼                     ▼
//!                         ┌──────────────┐     ┌───────────────┐
//!                         │ eval (sizes) │     │ Verdict       │
//!                         └──────────────┘     └───────────────┘
//! ```
//!
//! # Adding a New Language
//!
//! 1. Create a new module in `src/analysis/languages/` (e.g., `ruby.rs`)
//! 2. Implement `LanguageAnalyzer` trait
//! 3. Add a `Language` variant and default rules in `policy::defaults`
//! 4. Register the analyzer in `languages/mod.rs`
//!
//! See `languages/c.rs` for a reference implementation.

mod context;
mod languages;
pub mod scan;
mod traits;

pub use context::AnalysisContext;
pub use languages::{
    get_analyzer, register_analyzers, CAnalyzer, GoAnalyzer, JavaAnalyzer, JavaScriptAnalyzer,
    PythonAnalyzer,
};
pub use traits::{normalize_tag, Import, ImportSet, Language, LanguageAnalyzer, ParsedSource};

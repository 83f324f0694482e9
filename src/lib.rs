//! Codegate - static safety gate for untrusted code submissions.
//!
//! Codegate inspects short programs submitted to an online judge or code
//! runner before they are executed. A submission is rejected when it imports
//! a disallowed module, calls a dangerous process or filesystem primitive,
//! or requests an allocation above the configured byte threshold. Analysis
//! is static and fail-closed: anything the analyzers cannot prove small or
//! harmless is rejected.
//!
//! # Architecture
//!
//! - `verifier`: entry point; resolves the language and returns a `Verdict`
//! - `analysis`: tree-sitter based analyzers for Python, JavaScript, C, Go, Java
//! - `eval`: constant-expression folding for allocation sizes
//! - `policy`: YAML policy schema, built-in rule tables, compiled rules
//! - `pipeline`: job screening, topic routing, reconnect supervision
//! - `report`: output formatting (pretty, JSON)
//!
//! # Example
//!
//! ```no_run
//! use codegate::Verifier;
//!
//! let verifier = Verifier::default();
//! let verdict = verifier.check("import os\nos.system('ls')\n", "python");
//! assert!(!verdict.is_safe());
//! println!("{}", verdict.reason());
//! ```

pub mod analysis;
pub mod cli;
pub mod eval;
pub mod pipeline;
pub mod policy;
pub mod report;
pub mod verdict;
pub mod verifier;

pub use analysis::{register_analyzers, Language, LanguageAnalyzer};
pub use eval::{fold, FoldedSize};
pub use pipeline::{Dispatch, Job, Screener};
pub use policy::{CompiledPolicy, DeniedPattern, LanguageRules, Policy, PolicyError};
pub use verdict::{Verdict, Violation, ViolationKind, SAFE_REASON};
pub use verifier::Verifier;

/// Initialize all subsystems.
///
/// Call this once at startup. Analyzers are otherwise created on first use.
pub fn init() {
    register_analyzers();
}

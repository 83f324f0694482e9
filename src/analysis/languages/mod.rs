//! Language-specific analyzer implementations.

mod c;
mod go;
mod java;
mod javascript;
mod python;

pub use c::CAnalyzer;
pub use go::GoAnalyzer;
pub use java::JavaAnalyzer;
pub use javascript::JavaScriptAnalyzer;
pub use python::PythonAnalyzer;

use super::{Language, LanguageAnalyzer};
use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicBool, Ordering};

/// Static storage for C analyzer.
static C_ANALYZER: OnceCell<CAnalyzer> = OnceCell::new();

/// Static storage for Go analyzer.
static GO_ANALYZER: OnceCell<GoAnalyzer> = OnceCell::new();

/// Static storage for Java analyzer.
static JAVA_ANALYZER: OnceCell<JavaAnalyzer> = OnceCell::new();

/// Static storage for JavaScript analyzer.
static JAVASCRIPT_ANALYZER: OnceCell<JavaScriptAnalyzer> = OnceCell::new();

/// Static storage for Python analyzer.
static PYTHON_ANALYZER: OnceCell<PythonAnalyzer> = OnceCell::new();

/// Whether analyzers have been registered.
static REGISTERED: AtomicBool = AtomicBool::new(false);

/// Register all available language analyzers.
///
/// This is idempotent - calling it multiple times is safe.
pub fn register_analyzers() {
    if REGISTERED.swap(true, Ordering::SeqCst) {
        return; // Already registered
    }

    C_ANALYZER.get_or_init(CAnalyzer::new);
    GO_ANALYZER.get_or_init(GoAnalyzer::new);
    JAVA_ANALYZER.get_or_init(JavaAnalyzer::new);
    JAVASCRIPT_ANALYZER.get_or_init(JavaScriptAnalyzer::new);
    PYTHON_ANALYZER.get_or_init(PythonAnalyzer::new);
}

/// Get the analyzer for a language.
pub fn get_analyzer(language: Language) -> &'static dyn LanguageAnalyzer {
    match language {
        Language::C => C_ANALYZER.get_or_init(CAnalyzer::new) as &'static dyn LanguageAnalyzer,
        Language::Go => GO_ANALYZER.get_or_init(GoAnalyzer::new) as &'static dyn LanguageAnalyzer,
        Language::Java => JAVA_ANALYZER.get_or_init(JavaAnalyzer::new) as &'static dyn LanguageAnalyzer,
        Language::JavaScript => {
            JAVASCRIPT_ANALYZER.get_or_init(JavaScriptAnalyzer::new) as &'static dyn LanguageAnalyzer
        }
        Language::Python => PYTHON_ANALYZER.get_or_init(PythonAnalyzer::new) as &'static dyn LanguageAnalyzer,
    }
}

//! Submission verifier.
//!
//! The verifier resolves the language tag, bounds the input size, and hands
//! the source to the matching analyzer. Every outcome, including analyzer
//! failures, is reported as a [`Verdict`]; nothing escapes as an error.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use lazy_static::lazy_static;
use tracing::{debug, warn};

use crate::analysis::{get_analyzer, normalize_tag, AnalysisContext, Language};
use crate::policy::{CompiledPolicy, Policy, PolicyError};
use crate::verdict::{Verdict, Violation, ViolationKind};

lazy_static! {
    static ref DEFAULT_POLICY: Arc<CompiledPolicy> =
        Arc::new(CompiledPolicy::compile(&Policy::default()).unwrap());
}

/// Checks submissions against a compiled policy.
///
/// A verifier holds no per-check state and can be shared across threads.
#[derive(Debug, Clone)]
pub struct Verifier {
    policy: Arc<CompiledPolicy>,
}

impl Verifier {
    /// Compile `policy` and build a verifier for it.
    pub fn new(policy: &Policy) -> Result<Self, PolicyError> {
        Ok(Self::from_compiled(Arc::new(CompiledPolicy::compile(policy)?)))
    }

    pub fn from_compiled(policy: Arc<CompiledPolicy>) -> Self {
        Self { policy }
    }

    /// Default rules with a custom allocation threshold and import budget.
    pub fn with_limits(byte_threshold: u64, max_imports: usize) -> Result<Self, PolicyError> {
        Self::new(&Policy {
            byte_threshold: Some(byte_threshold),
            max_imports: Some(max_imports),
            ..Default::default()
        })
    }

    pub fn policy(&self) -> &CompiledPolicy {
        &self.policy
    }

    /// Check `code` written in the language named by `language`.
    pub fn check(&self, code: &str, language: &str) -> Verdict {
        match Language::from_tag(language) {
            Some(lang) => self.check_language(code, lang),
            None => {
                let tag = normalize_tag(language);
                debug!(language = %tag, "unsupported language");
                Verdict::new(
                    None,
                    vec![Violation::new(
                        ViolationKind::UnsupportedLanguage,
                        format!("Unsupported language: {}", tag),
                    )],
                )
            }
        }
    }

    /// Check `code` as `language`.
    pub fn check_language(&self, code: &str, language: Language) -> Verdict {
        let max = self.policy.max_source_bytes;
        if code.len() > max {
            debug!(language = %language, bytes = code.len(), "submission too large");
            return Verdict::new(
                Some(language),
                vec![Violation::new(
                    ViolationKind::SourceTooLarge,
                    format!("Submission exceeds maximum size ({} > {} bytes).", code.len(), max),
                )],
            );
        }

        let violations = match panic::catch_unwind(AssertUnwindSafe(|| self.analyze(code, language))) {
            Ok(Ok(violations)) => violations,
            Ok(Err(e)) => {
                warn!(language = %language, error = %e, "analyzer failed");
                vec![internal_error(&e.to_string())]
            }
            Err(_) => {
                warn!(language = %language, "analyzer panicked");
                vec![internal_error("analyzer panicked")]
            }
        };

        let verdict = Verdict::new(Some(language), violations);
        debug!(
            language = %language,
            safe = verdict.is_safe(),
            violations = verdict.violations.len(),
            "checked submission"
        );
        verdict
    }

    fn analyze(&self, code: &str, language: Language) -> anyhow::Result<Vec<Violation>> {
        let analyzer = get_analyzer(language);
        let parsed = analyzer.parse(code)?;
        let mut ctx = AnalysisContext::new(&self.policy, language);
        analyzer.analyze(&parsed, &mut ctx)?;
        Ok(ctx.into_violations())
    }
}

impl Default for Verifier {
    fn default() -> Self {
        Self::from_compiled(Arc::clone(&DEFAULT_POLICY))
    }
}

fn internal_error(detail: &str) -> Violation {
    Violation::new(
        ViolationKind::InternalError,
        format!("Internal analyzer error: {}", detail),
    )
}

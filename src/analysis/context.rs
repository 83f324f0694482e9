//! Per-check analysis context.
//!
//! The AnalysisContext carries the rule tables and limits for one language
//! and collects violations as scans run. It decides when analysis may stop:
//! in fail-fast mode (the default) that is after the first violation.

use crate::eval::FoldedSize;
use crate::policy::{CompiledPattern, CompiledPolicy, CompiledRules};
use crate::verdict::{Violation, ViolationKind};

use super::scan::line_of;
use super::{ImportSet, Language};

/// Analysis state for a single submission.
pub struct AnalysisContext<'p> {
    language: Language,
    rules: &'p CompiledRules,
    byte_threshold: i128,
    max_imports: usize,
    report_all: bool,
    violations: Vec<Violation>,
}

impl<'p> AnalysisContext<'p> {
    /// Create a context for checking `language` under `policy`.
    pub fn new(policy: &'p CompiledPolicy, language: Language) -> Self {
        Self {
            language,
            rules: policy.rules(language),
            byte_threshold: policy.byte_threshold,
            max_imports: policy.max_imports,
            report_all: policy.report_all,
            violations: Vec::new(),
        }
    }

    pub fn language(&self) -> Language {
        self.language
    }

    /// Rule tables for the language being checked.
    pub fn rules(&self) -> &'p CompiledRules {
        self.rules
    }

    pub fn byte_threshold(&self) -> i128 {
        self.byte_threshold
    }

    pub fn max_imports(&self) -> usize {
        self.max_imports
    }

    /// Record a violation. Ignored once the context is done.
    pub fn report(&mut self, violation: Violation) {
        if self.is_done() {
            return;
        }
        self.violations.push(violation);
    }

    /// Whether further scanning can change the outcome.
    pub fn is_done(&self) -> bool {
        !self.report_all && !self.violations.is_empty()
    }

    pub fn has_violations(&self) -> bool {
        !self.violations.is_empty()
    }

    /// Whether a folded allocation size must be rejected.
    pub fn too_large(&self, size: FoldedSize) -> bool {
        size.exceeds(self.byte_threshold)
    }

    /// Reject the submission if it has more distinct imports than allowed.
    pub fn check_import_budget(&mut self, imports: &ImportSet, noun: &str) {
        if imports.len() > self.max_imports {
            self.report(Violation::new(
                ViolationKind::ImportBudgetExceeded,
                format!(
                    "Too many {} ({} > {}).",
                    noun,
                    imports.len(),
                    self.max_imports
                ),
            ));
        }
    }

    /// Scan `source` for each pattern and report the first match of each.
    pub fn scan_textual<'a, I>(&mut self, source: &str, patterns: I, label: &str)
    where
        I: IntoIterator<Item = &'a CompiledPattern>,
    {
        for pattern in patterns {
            if self.is_done() {
                return;
            }
            if let Some(m) = pattern.regex.find(source) {
                let message = match &pattern.description {
                    Some(desc) => format!("{}: {} ({})", label, pattern.as_str(), desc),
                    None => format!("{}: {}", label, pattern.as_str()),
                };
                self.report(
                    Violation::new(ViolationKind::DangerousPattern, message)
                        .at_line(line_of(source, m.start())),
                );
            }
        }
    }

    /// Consume the context and return the collected violations.
    pub fn into_violations(self) -> Vec<Violation> {
        self.violations
    }
}

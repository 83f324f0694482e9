//! Core types for verification results.

use serde::{Deserialize, Serialize};

use crate::analysis::Language;

/// Reason text returned when no rule fired.
pub const SAFE_REASON: &str = "Safe to execute.";

/// Categories of rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ViolationKind {
    #[serde(rename = "syntax_error")]
    SyntaxError,
    #[serde(rename = "policy_violation")]
    PolicyViolation,
    #[serde(rename = "dangerous_pattern")]
    DangerousPattern,
    #[serde(rename = "allocation_too_large")]
    AllocationTooLarge,
    #[serde(rename = "import_budget_exceeded")]
    ImportBudgetExceeded,
    #[serde(rename = "unsupported_language")]
    UnsupportedLanguage,
    #[serde(rename = "source_too_large")]
    SourceTooLarge,
    #[serde(rename = "internal_error")]
    InternalError,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationKind::SyntaxError => "syntax_error",
            ViolationKind::PolicyViolation => "policy_violation",
            ViolationKind::DangerousPattern => "dangerous_pattern",
            ViolationKind::AllocationTooLarge => "allocation_too_large",
            ViolationKind::ImportBudgetExceeded => "import_budget_exceeded",
            ViolationKind::UnsupportedLanguage => "unsupported_language",
            ViolationKind::SourceTooLarge => "source_too_large",
            ViolationKind::InternalError => "internal_error",
        }
    }
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single reason for rejecting a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub message: String,
    /// 1-indexed line of the offending construct, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
}

impl Violation {
    pub fn new(kind: ViolationKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            line: None,
        }
    }

    /// Attach a source line.
    pub fn at_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }
}

/// The result of verifying one submission.
///
/// A verdict is safe exactly when it carries no violations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    /// The language the submission was checked as, if the tag was recognised.
    pub language: Option<Language>,
    pub violations: Vec<Violation>,
}

impl Verdict {
    pub fn new(language: Option<Language>, violations: Vec<Violation>) -> Self {
        Self {
            language,
            violations,
        }
    }

    /// Whether the submission may be executed.
    pub fn is_safe(&self) -> bool {
        self.violations.is_empty()
    }

    /// Violation messages joined with `"; "`, or [`SAFE_REASON`].
    pub fn reason(&self) -> String {
        if self.violations.is_empty() {
            return SAFE_REASON.to_string();
        }
        self.violations
            .iter()
            .map(|v| v.message.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Check if any violation is of the given kind.
    pub fn has_kind(&self, kind: ViolationKind) -> bool {
        self.violations.iter().any(|v| v.kind == kind)
    }
}

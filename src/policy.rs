//! Policy schema and compiled rule tables.
//!
//! A policy defines what a submission may import, which calls and API
//! references are forbidden, and how large a constant allocation may be.
//! Every field is optional in the YAML file; anything left out falls back
//! to the built-in defaults below. A language section that sets a list
//! replaces the built-in list for that language.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::analysis::Language;

/// Default allocation threshold: 128 MiB.
pub const DEFAULT_BYTE_THRESHOLD: u64 = 128 * 1024 * 1024;

/// Default maximum number of distinct imports per submission.
pub const DEFAULT_MAX_IMPORTS: usize = 4;

/// Default maximum submission size.
pub const DEFAULT_MAX_SOURCE_BYTES: usize = 256 * 1024;

/// Default topic for accepted jobs.
pub const DEFAULT_ACCEPTED_TOPIC: &str = "programiz_execution";

/// Default topic for rejected jobs.
pub const DEFAULT_REJECTED_TOPIC: &str = "blocked_exec";

/// Errors raised while loading or compiling a policy.
#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("reading policy {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing policy: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid {language} pattern {pattern:?}: {source}")]
    Pattern {
        language: &'static str,
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("invalid policy: {0}")]
    Invalid(String),
}

/// Top-level policy definition.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Policy {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Allocations whose folded size reaches this many bytes are rejected.
    #[serde(default)]
    pub byte_threshold: Option<u64>,
    /// Maximum number of distinct imports/includes.
    #[serde(default)]
    pub max_imports: Option<usize>,
    /// Submissions longer than this are rejected without parsing.
    #[serde(default)]
    pub max_source_bytes: Option<usize>,
    /// Report every violation instead of stopping at the first one.
    #[serde(default)]
    pub report_all: Option<bool>,
    #[serde(default)]
    pub python: Option<LanguageRules>,
    #[serde(default)]
    pub javascript: Option<LanguageRules>,
    #[serde(default)]
    pub c: Option<LanguageRules>,
    #[serde(default)]
    pub go: Option<LanguageRules>,
    #[serde(default)]
    pub java: Option<LanguageRules>,
    #[serde(default)]
    pub pipeline: Option<PipelineConfig>,
}

impl Policy {
    /// Parse a policy from a YAML file.
    pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<Self, PolicyError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| PolicyError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse_str(&content)
    }

    /// Parse a policy from YAML text.
    pub fn parse_str(content: &str) -> Result<Self, PolicyError> {
        if content.trim().is_empty() {
            return Ok(Policy::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn byte_threshold(&self) -> u64 {
        self.byte_threshold.unwrap_or(DEFAULT_BYTE_THRESHOLD)
    }

    pub fn max_imports(&self) -> usize {
        self.max_imports.unwrap_or(DEFAULT_MAX_IMPORTS)
    }

    pub fn max_source_bytes(&self) -> usize {
        self.max_source_bytes.unwrap_or(DEFAULT_MAX_SOURCE_BYTES)
    }

    /// Returns whether to collect every violation (defaults to false).
    pub fn report_all(&self) -> bool {
        self.report_all.unwrap_or(false)
    }

    /// The configured overrides for a language, if any.
    pub fn overrides(&self, language: Language) -> Option<&LanguageRules> {
        match language {
            Language::Python => self.python.as_ref(),
            Language::JavaScript => self.javascript.as_ref(),
            Language::C => self.c.as_ref(),
            Language::Go => self.go.as_ref(),
            Language::Java => self.java.as_ref(),
        }
    }

    /// Rules for a language with built-in defaults filled in.
    pub fn rules_for(&self, language: Language) -> LanguageRules {
        let defaults = defaults::rules(language);
        match self.overrides(language) {
            None => defaults,
            Some(o) => LanguageRules {
                allowed_modules: o.allowed_modules.clone().or(defaults.allowed_modules),
                denied_modules: o.denied_modules.clone().or(defaults.denied_modules),
                denied_calls: o.denied_calls.clone().or(defaults.denied_calls),
                denied_patterns: o.denied_patterns.clone().or(defaults.denied_patterns),
            },
        }
    }

    /// Topic names for the screening pipeline.
    pub fn pipeline(&self) -> PipelineConfig {
        self.pipeline.clone().unwrap_or_default()
    }
}

/// Per-language allow/deny tables.
///
/// Module names are interpreted per language: Python root modules, exact
/// JavaScript specifiers, C header names, the last segment of a Go import
/// path, and Java package prefixes.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct LanguageRules {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_modules: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denied_modules: Option<Vec<String>>,
    /// Function names that must never be called.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denied_calls: Option<Vec<String>>,
    /// Regex patterns that must not appear anywhere in the source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denied_patterns: Option<Vec<DeniedPattern>>,
}

/// A regex pattern that must not appear in a submission.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct DeniedPattern {
    pub pattern: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl DeniedPattern {
    pub fn new(pattern: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            description: None,
        }
    }
}

/// Topic names used by the screening worker.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct PipelineConfig {
    #[serde(default)]
    pub accepted_topic: Option<String>,
    #[serde(default)]
    pub rejected_topic: Option<String>,
}

impl PipelineConfig {
    pub fn accepted_topic(&self) -> &str {
        self.accepted_topic.as_deref().unwrap_or(DEFAULT_ACCEPTED_TOPIC)
    }

    pub fn rejected_topic(&self) -> &str {
        self.rejected_topic.as_deref().unwrap_or(DEFAULT_REJECTED_TOPIC)
    }
}

/// Validate a policy.
pub fn validate(policy: &Policy) -> Result<(), PolicyError> {
    if policy.max_source_bytes() == 0 {
        return Err(PolicyError::Invalid(
            "max_source_bytes must be greater than zero".to_string(),
        ));
    }
    for language in Language::ALL {
        let rules = policy.rules_for(language);
        compile_patterns(language, &rules)?;
        compile_call_patterns(language, &rules)?;
    }

    if let Some(pipeline) = &policy.pipeline {
        if pipeline.accepted_topic() == pipeline.rejected_topic() {
            return Err(PolicyError::Invalid(
                "accepted and rejected topics must differ".to_string(),
            ));
        }
    }

    Ok(())
}

/// A denied pattern compiled for matching.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    pub regex: Regex,
    pub description: Option<String>,
}

impl CompiledPattern {
    /// The pattern text as written in the policy.
    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }
}

/// Rule tables for one language, ready for lookups.
#[derive(Debug, Clone)]
pub struct CompiledRules {
    pub allowed: HashSet<String>,
    pub denied: HashSet<String>,
    pub denied_calls: HashSet<String>,
    /// Denied patterns in declaration order.
    pub patterns: Vec<CompiledPattern>,
    /// One `name(` pattern per denied call, for analyzers without a syntax tree.
    pub call_patterns: Vec<CompiledPattern>,
}

impl CompiledRules {
    /// Denied patterns followed by denied-call patterns.
    pub fn textual_patterns(&self) -> impl Iterator<Item = &CompiledPattern> {
        self.patterns.iter().chain(self.call_patterns.iter())
    }

    pub fn is_allowed(&self, module: &str) -> bool {
        self.allowed.contains(module)
    }

    pub fn is_denied(&self, module: &str) -> bool {
        self.denied.contains(module)
    }

    /// Java-style lookup: `name` equals a listed prefix or sits below it.
    pub fn allowed_prefix(&self, name: &str) -> bool {
        self.allowed.iter().any(|p| under_prefix(name, p))
    }

    /// Java-style lookup against the denied list.
    pub fn denied_prefix(&self, name: &str) -> bool {
        self.denied.iter().any(|p| under_prefix(name, p))
    }
}

fn under_prefix(name: &str, prefix: &str) -> bool {
    name == prefix
        || name
            .strip_prefix(prefix)
            .map(|rest| rest.starts_with('.'))
            .unwrap_or(false)
}

/// An immutable, compiled policy shared by every check.
#[derive(Debug, Clone)]
pub struct CompiledPolicy {
    pub byte_threshold: i128,
    pub max_imports: usize,
    pub max_source_bytes: usize,
    pub report_all: bool,
    python: CompiledRules,
    javascript: CompiledRules,
    c: CompiledRules,
    go: CompiledRules,
    java: CompiledRules,
}

impl CompiledPolicy {
    /// Validate and compile a policy.
    pub fn compile(policy: &Policy) -> Result<Self, PolicyError> {
        validate(policy)?;

        let build = |language: Language| -> Result<CompiledRules, PolicyError> {
            let rules = policy.rules_for(language);
            Ok(CompiledRules {
                allowed: to_set(rules.allowed_modules.as_deref()),
                denied: to_set(rules.denied_modules.as_deref()),
                denied_calls: to_set(rules.denied_calls.as_deref()),
                patterns: compile_patterns(language, &rules)?,
                call_patterns: compile_call_patterns(language, &rules)?,
            })
        };

        Ok(Self {
            byte_threshold: policy.byte_threshold() as i128,
            max_imports: policy.max_imports(),
            max_source_bytes: policy.max_source_bytes(),
            report_all: policy.report_all(),
            python: build(Language::Python)?,
            javascript: build(Language::JavaScript)?,
            c: build(Language::C)?,
            go: build(Language::Go)?,
            java: build(Language::Java)?,
        })
    }

    pub fn rules(&self, language: Language) -> &CompiledRules {
        match language {
            Language::Python => &self.python,
            Language::JavaScript => &self.javascript,
            Language::C => &self.c,
            Language::Go => &self.go,
            Language::Java => &self.java,
        }
    }
}

fn to_set(items: Option<&[String]>) -> HashSet<String> {
    items
        .unwrap_or_default()
        .iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn compile_patterns(
    language: Language,
    rules: &LanguageRules,
) -> Result<Vec<CompiledPattern>, PolicyError> {
    let mut compiled = Vec::new();

    for p in rules.denied_patterns.as_deref().unwrap_or_default() {
        let regex = Regex::new(&p.pattern).map_err(|source| PolicyError::Pattern {
            language: language.as_str(),
            pattern: p.pattern.clone(),
            source,
        })?;
        compiled.push(CompiledPattern {
            regex,
            description: p.description.clone(),
        });
    }

    Ok(compiled)
}

fn compile_call_patterns(
    language: Language,
    rules: &LanguageRules,
) -> Result<Vec<CompiledPattern>, PolicyError> {
    let mut compiled = Vec::new();

    for name in rules.denied_calls.as_deref().unwrap_or_default() {
        let pattern = format!(r"\b{}\s*\(", regex::escape(name.trim()));
        let regex = Regex::new(&pattern).map_err(|source| PolicyError::Pattern {
            language: language.as_str(),
            pattern: pattern.clone(),
            source,
        })?;
        compiled.push(CompiledPattern {
            regex,
            description: Some(format!("call to {}", name.trim())),
        });
    }

    Ok(compiled)
}

/// Built-in rule tables.
pub mod defaults {
    use super::{DeniedPattern, LanguageRules};
    use crate::analysis::Language;

    const PYTHON_ALLOWED: &[&str] = &[
        "math",
        "random",
        "re",
        "functools",
        "itertools",
        "collections",
        "heapq",
        "bisect",
        "statistics",
        "typing",
        "dataclasses",
    ];

    const PYTHON_DENIED: &[&str] = &[
        "os",
        "pathlib",
        "shutil",
        "subprocess",
        "socket",
        "ctypes",
        "multiprocessing",
        "threading",
        "posix",
        "importlib",
        "sys",
        "builtins",
        "__builtins__",
    ];

    const PYTHON_DENIED_CALLS: &[&str] = &["open", "exec", "eval", "__import__", "compile", "input"];

    const JS_ALLOWED: &[&str] = &["assert"];

    const JS_DENIED: &[&str] = &["fs", "child_process", "process", "worker_threads", "cluster"];

    const JS_DENIED_CALLS: &[&str] = &["eval", "Function"];

    const JS_PATTERNS: &[&str] = &[r"\bprocess\b", r"\bfs\b", r"\bchild_process\b", r"\bexecSync\b"];

    const C_ALLOWED: &[&str] = &[
        "stdio.h",
        "stdlib.h",
        "string.h",
        "math.h",
        "limits.h",
        "stdbool.h",
        "stdint.h",
        "stddef.h",
    ];

    const C_PATTERNS: &[&str] = &[
        r"\bsystem\s*\(",
        r"\bv?fork\s*\(",
        r"\bexec(?:l|lp|le|v|vp|ve|vpe)?\b",
        r"\bpopen\s*\(",
        r"\bunlink\s*\(",
        r"\bchmod\s*\(",
        r"\bfopen\s*\(",
        r"\bopen\s*\(",
    ];

    const GO_ALLOWED: &[&str] = &["fmt", "math", "strings", "strconv", "time", "bytes", "unicode"];

    const GO_DENIED: &[&str] = &["os"];

    const GO_PATTERNS: &[&str] = &[
        r"\bos\b",
        r"\bexec\.Command\b",
        r"\bsyscall\b",
        r"\bnet\b",
        r"\bruntime\b",
        r"\bplugin\b",
        r"\bunsafe\b",
    ];

    const JAVA_ALLOWED: &[&str] = &["java.lang", "java.util", "java.math"];

    const JAVA_DENIED: &[&str] = &["java.io", "java.net", "java.nio"];

    const JAVA_PATTERNS: &[&str] = &[
        r"Runtime\.getRuntime",
        r"ProcessBuilder",
        r"System\.exit\s*\(",
        r"java\.io",
        r"java\.net",
        r"java\.nio",
        r"Files\.",
        r"Paths\.",
        r"FileInputStream",
        r"FileOutputStream",
    ];

    fn strings(items: &[&str]) -> Option<Vec<String>> {
        Some(items.iter().map(|s| s.to_string()).collect())
    }

    fn patterns(items: &[&str]) -> Option<Vec<DeniedPattern>> {
        Some(items.iter().map(|p| DeniedPattern::new(p)).collect())
    }

    /// The built-in rules for a language, with every list populated.
    pub fn rules(language: Language) -> LanguageRules {
        match language {
            Language::Python => LanguageRules {
                allowed_modules: strings(PYTHON_ALLOWED),
                denied_modules: strings(PYTHON_DENIED),
                denied_calls: strings(PYTHON_DENIED_CALLS),
                denied_patterns: patterns(&[]),
            },
            Language::JavaScript => LanguageRules {
                allowed_modules: strings(JS_ALLOWED),
                denied_modules: strings(JS_DENIED),
                denied_calls: strings(JS_DENIED_CALLS),
                denied_patterns: patterns(JS_PATTERNS),
            },
            Language::C => LanguageRules {
                allowed_modules: strings(C_ALLOWED),
                denied_modules: strings(&[]),
                denied_calls: strings(&[]),
                denied_patterns: patterns(C_PATTERNS),
            },
            Language::Go => LanguageRules {
                allowed_modules: strings(GO_ALLOWED),
                denied_modules: strings(GO_DENIED),
                denied_calls: strings(&[]),
                denied_patterns: patterns(GO_PATTERNS),
            },
            Language::Java => LanguageRules {
                allowed_modules: strings(JAVA_ALLOWED),
                denied_modules: strings(JAVA_DENIED),
                denied_calls: strings(&[]),
                denied_patterns: patterns(JAVA_PATTERNS),
            },
        }
    }
}

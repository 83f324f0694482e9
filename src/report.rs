//! Output formatting for check results.
//!
//! Supports two output formats:
//! - Pretty: colored terminal output for human readability
//! - JSON: structured output for programmatic consumption

use colored::*;
use serde::{Deserialize, Serialize};

use crate::verdict::{Verdict, Violation};

/// The verdict for one checked file.
#[derive(Debug, Clone)]
pub struct FileVerdict {
    pub path: String,
    pub verdict: Verdict,
}

impl FileVerdict {
    pub fn new(path: impl Into<String>, verdict: Verdict) -> Self {
        Self {
            path: path.into(),
            verdict,
        }
    }
}

/// Whether every file in the batch is safe.
pub fn all_safe(results: &[FileVerdict]) -> bool {
    results.iter().all(|r| r.verdict.is_safe())
}

// =============================================================================
// JSON Format
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct JsonReport {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,
    pub files_checked: usize,
    pub unsafe_files: usize,
    pub passed: bool,
    pub results: Vec<JsonFileResult>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JsonFileResult {
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub safe: bool,
    pub reason: String,
    pub violations: Vec<Violation>,
}

/// Build the JSON report for a batch.
pub fn json_report(policy: Option<&str>, results: &[FileVerdict]) -> JsonReport {
    let results: Vec<JsonFileResult> = results
        .iter()
        .map(|r| JsonFileResult {
            file: r.path.clone(),
            language: r.verdict.language.map(|l| l.as_str().to_string()),
            safe: r.verdict.is_safe(),
            reason: r.verdict.reason(),
            violations: r.verdict.violations.clone(),
        })
        .collect();
    let unsafe_files = results.iter().filter(|r| !r.safe).count();

    JsonReport {
        version: env!("CARGO_PKG_VERSION").to_string(),
        policy: policy.map(str::to_string),
        files_checked: results.len(),
        unsafe_files,
        passed: unsafe_files == 0,
        results,
    }
}

/// Write results in JSON format.
pub fn write_json(policy: Option<&str>, results: &[FileVerdict]) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(&json_report(policy, results))?;
    println!("{}", json);
    Ok(())
}

// =============================================================================
// Pretty Format
// =============================================================================

/// Write results in pretty (human-readable) format.
pub fn write_pretty(policy: Option<&str>, results: &[FileVerdict]) {
    println!();
    print!("  ");
    print!("{}", "codegate".cyan().bold());
    println!(" v{}", env!("CARGO_PKG_VERSION"));
    println!();

    print!("  {}", "Policy: ".dimmed());
    println!("{}", policy.unwrap_or("built-in defaults"));
    println!();

    for result in results {
        write_file_result(result);
    }
    println!();

    write_final_status(results);
    println!();
}

fn write_file_result(result: &FileVerdict) {
    let language = result
        .verdict
        .language
        .map(|l| l.as_str())
        .unwrap_or("unknown");

    if result.verdict.is_safe() {
        print!("  {} ", "✓ SAFE  ".green());
    } else {
        print!("  {} ", "✗ UNSAFE".red());
    }
    print!("{}", result.path.blue());
    println!(" {}", format!("({})", language).dimmed());

    for v in &result.verdict.violations {
        print!("      {:<24}", v.kind.as_str().dimmed());
        if let Some(line) = v.line {
            print!("{} ", format!("line {}:", line).dimmed());
        }
        println!("{}", v.message);
    }
}

fn write_final_status(results: &[FileVerdict]) {
    let unsafe_files = results.iter().filter(|r| !r.verdict.is_safe()).count();
    print!(
        "  {}",
        format!("Checked: {}  Unsafe: {}", results.len(), unsafe_files).dimmed()
    );
    print!("  ");
    if unsafe_files == 0 {
        print!("{}", "PASSED".green());
    } else {
        print!("{}", "FAILED".red());
    }
    println!();
}

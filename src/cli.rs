//! Command-line interface for codegate.

use clap::{Parser, Subcommand};
use globset::{Glob, GlobSet, GlobSetBuilder};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::analysis::Language;
use crate::pipeline::{Backoff, JsonLinesSink, LinesConnector, Screener, Supervisor, Worker};
use crate::policy::{self, Policy};
use crate::report::{self, FileVerdict};
use crate::verifier::Verifier;

/// Exit codes.
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILED: i32 = 1;
pub const EXIT_ERROR: i32 = 2;

/// Default policy file names to search for.
const DEFAULT_POLICY_NAMES: &[&str] = &["codegate.yaml", ".codegate.yaml"];

/// Directories never descended into when walking a tree.
const SKIPPED_DIRS: &[&str] = &["node_modules", "vendor", "target", "__pycache__"];

/// Connection attempts before `screen` gives up on an input file.
const SCREEN_CONNECT_ATTEMPTS: u32 = 3;

/// Static safety gate for untrusted code submissions.
///
/// Codegate rejects Python, JavaScript, C, Go and Java submissions that
/// import disallowed modules, call dangerous OS or process primitives, or
/// request oversized memory allocations, before they reach an executor.
#[derive(Parser)]
#[command(name = "codegate")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check source files against a policy
    #[command(visible_alias = "verify")]
    Check(CheckArgs),
    /// Screen JSON-lines jobs and route them to the execution or rejection topic
    Screen(ScreenArgs),
    /// Create a new codegate policy from a template
    Init(InitArgs),
}

/// Arguments for the check command.
#[derive(Parser)]
pub struct CheckArgs {
    /// Files or directories to check
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Check every file as this language instead of inferring it from the extension
    #[arg(short, long)]
    pub language: Option<String>,

    /// Path to policy YAML file (default: auto-discover)
    #[arg(short, long)]
    pub policy: Option<PathBuf>,

    /// Output format: pretty or json
    #[arg(short, long, default_value = "pretty")]
    pub format: String,

    /// Glob patterns of paths to skip
    #[arg(long)]
    pub exclude: Vec<String>,

    /// Override the allocation threshold in bytes
    #[arg(long)]
    pub threshold: Option<u64>,

    /// Override the maximum number of imports
    #[arg(long)]
    pub max_imports: Option<usize>,

    /// Report every violation instead of stopping at the first
    #[arg(long)]
    pub report_all: bool,
}

/// Arguments for the screen command.
#[derive(Parser)]
pub struct ScreenArgs {
    /// JSON-lines job file (default: stdin)
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Path to policy YAML file (default: auto-discover)
    #[arg(short, long)]
    pub policy: Option<PathBuf>,
}

/// Arguments for the init command.
#[derive(Parser)]
pub struct InitArgs {
    /// Output file path
    #[arg(short, long, default_value = "codegate.yaml")]
    pub output: PathBuf,

    /// Template to use
    #[arg(short, long, default_value = "default")]
    pub template: String,

    /// List available templates
    #[arg(short, long)]
    pub list: bool,
}

/// Available policy templates.
struct Template {
    name: &'static str,
    description: &'static str,
    content: &'static str,
}

static TEMPLATES: &[Template] = &[
    Template {
        name: "default",
        description: "Built-in rules written out for editing",
        content: include_str!("templates/default.yaml"),
    },
    Template {
        name: "strict",
        description: "Smaller limits and narrower whitelists, reports every violation",
        content: include_str!("templates/strict.yaml"),
    },
];

/// Discover a policy file in the current directory.
fn discover_policy() -> Option<PathBuf> {
    DEFAULT_POLICY_NAMES
        .iter()
        .map(PathBuf::from)
        .find(|path| path.exists())
}

/// Load and validate the policy, falling back to the built-in defaults.
fn load_policy(explicit: Option<&Path>) -> anyhow::Result<(Policy, Option<PathBuf>)> {
    let path = explicit.map(Path::to_path_buf).or_else(discover_policy);
    let policy = match &path {
        Some(p) => {
            debug!(policy = %p.display(), "loading policy");
            Policy::parse_file(p)?
        }
        None => {
            debug!("no policy file found, using built-in defaults");
            Policy::default()
        }
    };
    policy::validate(&policy)?;
    Ok((policy, path))
}

fn build_excludes(patterns: &[String]) -> anyhow::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

fn is_excluded(excludes: &GlobSet, root: &Path, path: &Path) -> bool {
    if excludes.is_match(path) {
        return true;
    }
    path.strip_prefix(root)
        .map(|rel| excludes.is_match(rel))
        .unwrap_or(false)
}

/// Collect files to check under `root`.
///
/// Files named directly on the command line are always checked. Inside
/// directories only files with a recognised extension are picked up.
fn collect_files(root: &Path, excludes: &GlobSet, forced: bool) -> anyhow::Result<Vec<PathBuf>> {
    if root.is_file() {
        return Ok(vec![root.to_path_buf()]);
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_entry(|e| {
            if e.depth() == 0 || !e.file_type().is_dir() {
                return true;
            }
            let name = e.file_name().to_string_lossy();
            !name.starts_with('.') && !SKIPPED_DIRS.contains(&name.as_ref())
        })
    {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if is_excluded(excludes, root, path) {
            continue;
        }
        let recognised = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(Language::from_extension)
            .is_some();
        if recognised || forced {
            files.push(path.to_path_buf());
        }
    }
    Ok(files)
}

/// Verify one file.
///
/// A file whose language cannot be determined is checked under its
/// extension as the tag and comes back unsafe.
fn check_file(verifier: &Verifier, path: &Path, language: Option<Language>) -> anyhow::Result<FileVerdict> {
    let bytes = std::fs::read(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {}", path.display(), e))?;
    let code = String::from_utf8_lossy(&bytes);

    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let verdict = match language.or_else(|| Language::from_extension(extension)) {
        Some(lang) => verifier.check_language(&code, lang),
        None => verifier.check(&code, extension),
    };
    Ok(FileVerdict::new(path.display().to_string(), verdict))
}

/// Run the check command.
pub fn run_check(args: &CheckArgs) -> anyhow::Result<i32> {
    if args.format != "pretty" && args.format != "json" {
        eprintln!(
            "Error: invalid format {:?}, must be 'pretty' or 'json'",
            args.format
        );
        return Ok(EXIT_ERROR);
    }

    let language = match args.language.as_deref() {
        Some(tag) => match Language::from_tag(tag) {
            Some(lang) => Some(lang),
            None => {
                eprintln!("Error: unsupported language {:?}", tag);
                eprintln!(
                    "Supported: {}",
                    Language::ALL.iter().map(|l| l.as_str()).collect::<Vec<_>>().join(", ")
                );
                return Ok(EXIT_ERROR);
            }
        },
        None => None,
    };

    let (mut policy, policy_path) = match load_policy(args.policy.as_deref()) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Error loading policy: {}", e);
            return Ok(EXIT_ERROR);
        }
    };
    if args.threshold.is_some() {
        policy.byte_threshold = args.threshold;
    }
    if args.max_imports.is_some() {
        policy.max_imports = args.max_imports;
    }
    if args.report_all {
        policy.report_all = Some(true);
    }
    let verifier = Verifier::new(&policy)?;

    let excludes = match build_excludes(&args.exclude) {
        Ok(set) => set,
        Err(e) => {
            eprintln!("Error: invalid --exclude pattern: {}", e);
            return Ok(EXIT_ERROR);
        }
    };

    let mut files = Vec::new();
    for path in &args.paths {
        if !path.exists() {
            eprintln!("Error: cannot access path {:?}", path);
            return Ok(EXIT_ERROR);
        }
        files.extend(collect_files(path, &excludes, language.is_some())?);
    }

    if files.is_empty() {
        eprintln!("Warning: no files to check");
        return Ok(EXIT_SUCCESS);
    }
    info!(files = files.len(), "checking files");

    let results = files
        .par_iter()
        .map(|path| check_file(&verifier, path, language))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let policy_str = policy_path.map(|p| p.to_string_lossy().to_string());
    match args.format.as_str() {
        "json" => report::write_json(policy_str.as_deref(), &results)?,
        _ => report::write_pretty(policy_str.as_deref(), &results),
    }

    if report::all_safe(&results) {
        Ok(EXIT_SUCCESS)
    } else {
        Ok(EXIT_FAILED)
    }
}

/// Run the screen command.
pub fn run_screen(args: &ScreenArgs) -> anyhow::Result<i32> {
    let (policy, _) = match load_policy(args.policy.as_deref()) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Error loading policy: {}", e);
            return Ok(EXIT_ERROR);
        }
    };
    let screener = Screener::from_policy(&policy)?;

    let mut supervisor = Supervisor::new(LinesConnector::new(args.input.clone()), Backoff::default());
    if args.input.is_some() {
        supervisor = supervisor.with_max_attempts(SCREEN_CONNECT_ATTEMPTS);
    }
    let mut worker = Worker::new(screener, supervisor);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let stats = runtime.block_on(async {
        let mut sink = JsonLinesSink::new(tokio::io::stdout());
        worker.run(&mut sink).await
    })?;

    info!(
        received = stats.received,
        accepted = stats.accepted,
        rejected = stats.rejected,
        skipped = stats.skipped,
        "screening finished"
    );
    if stats.publish_failures > 0 {
        return Ok(EXIT_ERROR);
    }
    Ok(EXIT_SUCCESS)
}

/// Run the init command.
pub fn run_init(args: &InitArgs) -> anyhow::Result<i32> {
    if args.list {
        return list_templates();
    }

    let template = match TEMPLATES.iter().find(|t| t.name == args.template) {
        Some(t) => t,
        None => {
            eprintln!("Error: unknown template {:?}", args.template);
            eprintln!("Run 'codegate init --list' to see available templates");
            return Ok(EXIT_ERROR);
        }
    };

    if args.output.exists() {
        eprintln!("Error: file already exists: {}", args.output.display());
        eprintln!("Remove it or use --output to specify a different path");
        return Ok(EXIT_ERROR);
    }

    if let Some(parent) = args.output.parent() {
        if !parent.as_os_str().is_empty() && parent != Path::new(".") {
            if let Err(e) = std::fs::create_dir_all(parent) {
                eprintln!("Error: failed to create directory: {}", e);
                return Ok(EXIT_ERROR);
            }
        }
    }

    if let Err(e) = std::fs::write(&args.output, template.content) {
        eprintln!("Error: failed to write policy: {}", e);
        return Ok(EXIT_ERROR);
    }

    println!("Created {} from template '{}'", args.output.display(), template.name);
    println!();
    println!("Next steps:");
    println!("  1. Edit {} to fit your execution backend", args.output.display());
    println!("  2. Run: codegate check <files> --policy {}", args.output.display());

    Ok(EXIT_SUCCESS)
}

fn list_templates() -> anyhow::Result<i32> {
    println!("Available templates:");
    println!();

    for template in TEMPLATES {
        let name = if template.name == "default" {
            format!("{} (default)", template.name)
        } else {
            template.name.to_string()
        };
        println!("  {:<20} {}", name, template.description);
    }

    println!();
    println!("Usage:");
    println!("  codegate init --template <name>");

    Ok(EXIT_SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_templates_are_valid_policies() {
        for template in TEMPLATES {
            let policy = Policy::parse_str(template.content)
                .unwrap_or_else(|e| panic!("{}: {}", template.name, e));
            policy::validate(&policy).unwrap_or_else(|e| panic!("{}: {}", template.name, e));
            Verifier::new(&policy).unwrap();
        }
    }

    #[test]
    fn test_default_template_matches_builtin_defaults() {
        let policy = Policy::parse_str(TEMPLATES[0].content).unwrap();
        let builtin = Policy::default();
        assert_eq!(policy.byte_threshold(), builtin.byte_threshold());
        assert_eq!(policy.max_imports(), builtin.max_imports());
        assert_eq!(policy.max_source_bytes(), builtin.max_source_bytes());
        for language in Language::ALL {
            assert_eq!(
                policy.rules_for(language).allowed_modules,
                builtin.rules_for(language).allowed_modules,
                "{}",
                language
            );
        }
    }

    #[test]
    fn test_collect_files_filters_and_excludes() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::write(root.join("a.py"), "print(1)\n").unwrap();
        std::fs::write(root.join("b.go"), "package main\n").unwrap();
        std::fs::write(root.join("notes.txt"), "hello\n").unwrap();
        std::fs::create_dir_all(root.join("node_modules")).unwrap();
        std::fs::write(root.join("node_modules/x.js"), "1\n").unwrap();
        std::fs::create_dir_all(root.join("gen")).unwrap();
        std::fs::write(root.join("gen/c.c"), "int main(){}\n").unwrap();

        let excludes = build_excludes(&["gen/**".to_string()]).unwrap();
        let mut files = collect_files(root, &excludes, false).unwrap();
        files.sort();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.strip_prefix(root).unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.py", "b.go"]);

        let forced = collect_files(root, &GlobSet::empty(), true).unwrap();
        assert_eq!(forced.len(), 4);
    }

    #[test]
    fn test_check_file_unknown_extension_is_unsafe() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("script.rb");
        std::fs::write(&path, "puts 1\n").unwrap();

        let result = check_file(&Verifier::default(), &path, None).unwrap();
        assert!(!result.verdict.is_safe());
        assert_eq!(result.verdict.reason(), "Unsupported language: rb");

        let forced = check_file(&Verifier::default(), &path, Some(Language::Python)).unwrap();
        assert_eq!(forced.verdict.language, Some(Language::Python));
    }
}

//! Python language analyzer using tree-sitter.
//!
//! Python is the only language that gets a full syntax check: any ERROR or
//! MISSING node rejects the submission before the rule walk runs. The walk
//! itself is a single preorder pass that checks imports, module attribute
//! access, builtin calls, and allocation-shaped expressions.

use tree_sitter::{Language as Grammar, Node};

use crate::analysis::scan::{node_line, preorder};
use crate::analysis::{AnalysisContext, ImportSet, Language, LanguageAnalyzer, ParsedSource};
use crate::eval::FoldedSize;
use crate::verdict::{Violation, ViolationKind};

/// Builtins whose integer argument is an allocation size.
const SIZED_BUILTINS: &[&str] = &["bytearray", "bytes"];

/// Builtins that materialise an iterable.
const COLLECTORS: &[&str] = &["list", "tuple", "set"];

/// Node kinds that evaluate to a sequence literal.
const SEQUENCE_KINDS: &[&str] = &[
    "list",
    "tuple",
    "string",
    "concatenated_string",
    "list_comprehension",
];

/// Which rule families a walk checks.
#[derive(Debug, Clone, Copy)]
struct Families {
    imports: bool,
    patterns: bool,
    allocations: bool,
}

impl Families {
    const ALL: Families = Families {
        imports: true,
        patterns: true,
        allocations: true,
    };
    const IMPORTS: Families = Families {
        imports: true,
        patterns: false,
        allocations: false,
    };
    const PATTERNS: Families = Families {
        imports: false,
        patterns: true,
        allocations: false,
    };
    const ALLOCATIONS: Families = Families {
        imports: false,
        patterns: false,
        allocations: true,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImportForm {
    Import,
    From,
}

/// Python language analyzer.
pub struct PythonAnalyzer {
    language: Grammar,
}

impl PythonAnalyzer {
    pub fn new() -> Self {
        Self {
            language: tree_sitter_python::LANGUAGE.into(),
        }
    }

    /// Walk the tree once, checking the selected families. Returns the
    /// distinct import roots seen before the walk stopped.
    fn walk(&self, parsed: &ParsedSource, ctx: &mut AnalysisContext, families: Families) -> ImportSet {
        let mut imports = ImportSet::new();
        preorder(parsed.tree.root_node(), |node| {
            self.visit(node, parsed, ctx, families, &mut imports);
            !ctx.is_done()
        });
        imports
    }

    fn visit(
        &self,
        node: Node,
        parsed: &ParsedSource,
        ctx: &mut AnalysisContext,
        families: Families,
        imports: &mut ImportSet,
    ) {
        match node.kind() {
            "import_statement" if families.imports => {
                let mut cursor = node.walk();
                let names: Vec<Node> = node.children_by_field_name("name", &mut cursor).collect();
                for name in names {
                    let module = if name.kind() == "aliased_import" {
                        name.child_by_field_name("name").unwrap_or(name)
                    } else {
                        name
                    };
                    let module = dotted(parsed.node_text(module));
                    self.check_module(&module, ImportForm::Import, node_line(node), ctx, imports);
                }
            }
            "import_from_statement" if families.imports => {
                match node.child_by_field_name("module_name") {
                    Some(module) if module.kind() != "relative_import" => {
                        let module = dotted(parsed.node_text(module));
                        self.check_module(&module, ImportForm::From, node_line(node), ctx, imports);
                    }
                    _ => ctx.report(
                        Violation::new(
                            ViolationKind::PolicyViolation,
                            "Relative imports are not allowed.",
                        )
                        .at_line(node_line(node)),
                    ),
                }
            }
            "future_import_statement" if families.imports => {
                self.check_module("__future__", ImportForm::From, node_line(node), ctx, imports);
            }
            "attribute" if families.imports => {
                if let Some(object) = node.child_by_field_name("object") {
                    let name = parsed.node_text(object);
                    if object.kind() == "identifier" && ctx.rules().is_denied(name) {
                        ctx.report(
                            Violation::new(
                                ViolationKind::PolicyViolation,
                                format!("Access to module '{}' is not allowed.", name),
                            )
                            .at_line(node_line(node)),
                        );
                    }
                }
            }
            "call" => {
                let Some(function) = node.child_by_field_name("function") else {
                    return;
                };
                if function.kind() != "identifier" {
                    return;
                }
                let name = parsed.node_text(function);
                if families.patterns && ctx.rules().denied_calls.contains(name) {
                    ctx.report(
                        Violation::new(
                            ViolationKind::DangerousPattern,
                            format!("Use of builtin '{}' not allowed.", name),
                        )
                        .at_line(node_line(node)),
                    );
                    return;
                }
                if families.allocations {
                    self.check_call_allocation(name, node, parsed, ctx);
                }
            }
            "binary_operator" if families.allocations && is_multiplication(node) => {
                self.check_multiplication(node, parsed, ctx);
            }
            _ => {}
        }
    }

    fn check_module(
        &self,
        module: &str,
        form: ImportForm,
        line: usize,
        ctx: &mut AnalysisContext,
        imports: &mut ImportSet,
    ) {
        let root = module.split('.').next().unwrap_or(module);
        imports.insert(root, line);

        let rules = ctx.rules();
        let message = if rules.is_denied(root) {
            match form {
                ImportForm::Import => format!("Import of disallowed module '{}'.", module),
                ImportForm::From => format!("Import from disallowed module '{}'.", module),
            }
        } else if !rules.is_allowed(root) {
            match form {
                ImportForm::Import => {
                    format!("Import of module '{}' not allowed by whitelist.", module)
                }
                ImportForm::From => {
                    format!("Import from module '{}' not allowed by whitelist.", module)
                }
            }
        } else {
            return;
        };

        ctx.report(Violation::new(ViolationKind::PolicyViolation, message).at_line(line));
    }

    /// `bytearray(N)`, `bytes(N)` and `list(range(...))`-style calls.
    fn check_call_allocation(
        &self,
        name: &str,
        call: Node,
        parsed: &ParsedSource,
        ctx: &mut AnalysisContext,
    ) {
        let Some(first) = positional_arguments(call).into_iter().next() else {
            return;
        };

        if SIZED_BUILTINS.contains(&name) {
            let text = parsed.node_text(first);
            let size = FoldedSize::of(text);
            if !ctx.too_large(size) {
                return;
            }
            let message = match (first.kind(), size) {
                ("integer", FoldedSize::Known(v)) => {
                    format!("Large allocation request: {}({}) >= threshold", name, v)
                }
                _ => format!("Large allocation expression in Python: {}", text),
            };
            ctx.report(
                Violation::new(ViolationKind::AllocationTooLarge, message)
                    .at_line(node_line(call)),
            );
            return;
        }

        if COLLECTORS.contains(&name) && first.kind() == "call" {
            let is_range = first
                .child_by_field_name("function")
                .map(|f| f.kind() == "identifier" && parsed.node_text(f) == "range")
                .unwrap_or(false);
            if !is_range {
                return;
            }
            let size = range_length(first, parsed);
            if ctx.too_large(size) {
                let args = first
                    .child_by_field_name("arguments")
                    .map(|a| parsed.node_text(a))
                    .unwrap_or("");
                let args = args
                    .strip_prefix('(')
                    .and_then(|a| a.strip_suffix(')'))
                    .unwrap_or(args)
                    .trim();
                ctx.report(
                    Violation::new(
                        ViolationKind::AllocationTooLarge,
                        format!("Large {}(range(...)) requested: {}", name, args),
                    )
                    .at_line(node_line(call)),
                );
            }
        }
    }

    /// Integer-literal multipliers and sequence repetition.
    fn check_multiplication(&self, node: Node, parsed: &ParsedSource, ctx: &mut AnalysisContext) {
        for operand in [node.child_by_field_name("left"), node.child_by_field_name("right")]
            .into_iter()
            .flatten()
        {
            if operand.kind() != "integer" {
                continue;
            }
            let size = FoldedSize::of(parsed.node_text(operand));
            if ctx.too_large(size) {
                let multiplier = match size {
                    FoldedSize::Known(v) => v.to_string(),
                    _ => parsed.node_text(operand).to_string(),
                };
                ctx.report(
                    Violation::new(
                        ViolationKind::AllocationTooLarge,
                        format!(
                            "Large list multiplication in Python: multiplier {} >= threshold",
                            multiplier
                        ),
                    )
                    .at_line(node_line(node)),
                );
                return;
            }
        }

        // Chained repetitions are judged once, at the outermost product.
        if node.parent().map(is_multiplication).unwrap_or(false) {
            return;
        }
        if let Some(count) = repetition_count(node, parsed) {
            if ctx.too_large(count) {
                ctx.report(
                    Violation::new(
                        ViolationKind::AllocationTooLarge,
                        format!(
                            "Large list multiplication expression: {}",
                            parsed.node_text(node)
                        ),
                    )
                    .at_line(node_line(node)),
                );
            }
        }
    }
}

impl Default for PythonAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageAnalyzer for PythonAnalyzer {
    fn language(&self) -> Language {
        Language::Python
    }

    fn parse<'s>(&self, source: &'s str) -> anyhow::Result<ParsedSource<'s>> {
        ParsedSource::parse(&self.language, source)
    }

    fn check_syntax(&self, parsed: &ParsedSource, ctx: &mut AnalysisContext) -> bool {
        let mut offending = None;
        preorder(parsed.tree.root_node(), |node| {
            if node.is_error() || node.is_missing() || is_legacy_statement(node, parsed) {
                offending = Some(node);
                return false;
            }
            true
        });

        if offending.is_none() && !parsed.tree.root_node().has_error() {
            return true;
        }

        let mut violation = Violation::new(ViolationKind::SyntaxError, "Invalid Python syntax.");
        if let Some(node) = offending {
            violation = violation.at_line(node_line(node));
        }
        ctx.report(violation);
        false
    }

    fn scan_imports(&self, parsed: &ParsedSource, ctx: &mut AnalysisContext) -> anyhow::Result<()> {
        let imports = self.walk(parsed, ctx, Families::IMPORTS);
        if !ctx.is_done() {
            ctx.check_import_budget(&imports, "distinct imports in Python");
        }
        Ok(())
    }

    fn scan_patterns(&self, parsed: &ParsedSource, ctx: &mut AnalysisContext) -> anyhow::Result<()> {
        self.walk(parsed, ctx, Families::PATTERNS);
        let rules = ctx.rules();
        ctx.scan_textual(parsed.source, rules.patterns.iter(), "Blocked Python pattern");
        Ok(())
    }

    fn scan_allocations(
        &self,
        parsed: &ParsedSource,
        ctx: &mut AnalysisContext,
    ) -> anyhow::Result<()> {
        self.walk(parsed, ctx, Families::ALLOCATIONS);
        Ok(())
    }

    fn analyze(&self, parsed: &ParsedSource, ctx: &mut AnalysisContext) -> anyhow::Result<()> {
        if !self.check_syntax(parsed, ctx) {
            return Ok(());
        }

        let imports = self.walk(parsed, ctx, Families::ALL);
        if ctx.is_done() {
            return Ok(());
        }
        ctx.check_import_budget(&imports, "distinct imports in Python");

        let rules = ctx.rules();
        ctx.scan_textual(parsed.source, rules.patterns.iter(), "Blocked Python pattern");
        Ok(())
    }
}

/// Collapse whitespace inside a dotted name.
fn dotted(text: &str) -> String {
    text.split_whitespace().collect()
}

fn is_multiplication(node: Node) -> bool {
    node.kind() == "binary_operator"
        && node
            .child_by_field_name("operator")
            .map(|op| op.kind() == "*")
            .unwrap_or(false)
}

/// Python 2 `print x` / `exec code` statements. The parenthesised forms
/// are ordinary calls in Python 3.
fn is_legacy_statement(node: Node, parsed: &ParsedSource) -> bool {
    let keyword = match node.kind() {
        "print_statement" => "print",
        "exec_statement" => "exec",
        _ => return false,
    };
    let text = parsed.node_text(node);
    let rest = text.strip_prefix(keyword).unwrap_or(text).trim_start();
    !rest.starts_with('(')
}

/// Positional arguments of a call, in order.
fn positional_arguments(call: Node) -> Vec<Node> {
    let Some(args) = call.child_by_field_name("arguments") else {
        return Vec::new();
    };
    if args.kind() != "argument_list" {
        return Vec::new();
    }
    let mut cursor = args.walk();
    let positional = args
        .named_children(&mut cursor)
        .filter(|n| !matches!(n.kind(), "comment" | "keyword_argument"))
        .collect();
    positional
}

/// Number of elements produced by a `range(...)` call.
fn range_length(call: Node, parsed: &ParsedSource) -> FoldedSize {
    let args: Vec<FoldedSize> = positional_arguments(call)
        .into_iter()
        .map(|n| {
            if matches!(n.kind(), "list_splat" | "dictionary_splat") {
                FoldedSize::Unknown
            } else {
                FoldedSize::of(parsed.node_text(n))
            }
        })
        .collect();

    match args.as_slice() {
        [stop] => *stop,
        [start, stop] => stop.minus(*start),
        [start, stop, FoldedSize::Known(step)] if *step > 0 => {
            stepped_length(stop.minus(*start), *step)
        }
        [start, stop, FoldedSize::Known(step)] if *step < 0 => {
            stepped_length(start.minus(*stop), step.saturating_neg())
        }
        [start, stop, _] => match stop.minus(*start) {
            FoldedSize::Known(span) => FoldedSize::Known(span.saturating_abs()),
            other => other,
        },
        _ => FoldedSize::Unknown,
    }
}

/// Elements in a span walked with a positive `step`.
fn stepped_length(span: FoldedSize, step: i128) -> FoldedSize {
    match span {
        FoldedSize::Known(span) if span > 0 => {
            FoldedSize::Known(span.saturating_add(step - 1).div_euclid(step))
        }
        FoldedSize::Known(_) => FoldedSize::Known(0),
        other => other,
    }
}

/// Element count of a sequence repetition such as `[0] * n * m`, or None
/// when `node` is not one.
fn repetition_count(node: Node, parsed: &ParsedSource) -> Option<FoldedSize> {
    match node.kind() {
        kind if SEQUENCE_KINDS.contains(&kind) => Some(FoldedSize::Known(1)),
        "parenthesized_expression" => {
            let mut cursor = node.walk();
            let inner = node
                .named_children(&mut cursor)
                .find(|n| n.kind() != "comment")?;
            repetition_count(inner, parsed)
        }
        "binary_operator" if is_multiplication(node) => {
            let left = node.child_by_field_name("left")?;
            let right = node.child_by_field_name("right")?;
            if let Some(count) = repetition_count(left, parsed) {
                Some(count.times(FoldedSize::of(parsed.node_text(right))))
            } else {
                repetition_count(right, parsed)
                    .map(|count| count.times(FoldedSize::of(parsed.node_text(left))))
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{CompiledPolicy, Policy};

    fn check_with(policy: &Policy, source: &str) -> Vec<Violation> {
        let compiled = CompiledPolicy::compile(policy).unwrap();
        let analyzer = PythonAnalyzer::new();
        let parsed = analyzer.parse(source).unwrap();
        let mut ctx = AnalysisContext::new(&compiled, Language::Python);
        analyzer.analyze(&parsed, &mut ctx).unwrap();
        ctx.into_violations()
    }

    fn check(source: &str) -> Vec<Violation> {
        check_with(&Policy::default(), source)
    }

    fn first_message(source: &str) -> String {
        check(source)
            .into_iter()
            .next()
            .map(|v| v.message)
            .unwrap_or_default()
    }

    #[test]
    fn test_safe_program() {
        let source = r#"
import math
from collections import deque
from typing import List

def solve(nums: List[int]) -> int:
    q = deque(nums)
    grid = [[0] * 100 for _ in range(100)]
    return int(math.sqrt(sum(q))) + len(grid)

print(solve([1, 2, 3]))
"#;
        assert!(check(source).is_empty());
    }

    #[test]
    fn test_syntax_errors() {
        let violations = check("def f(:\n    pass\n");
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].kind, ViolationKind::SyntaxError);
        assert_eq!(violations[0].message, "Invalid Python syntax.");

        assert_eq!(first_message("print \"hello\"\n"), "Invalid Python syntax.");
        assert!(check("print(\"hello\")\n").is_empty());
    }

    #[test]
    fn test_import_rules() {
        assert_eq!(
            first_message("import os\n"),
            "Import of disallowed module 'os'."
        );
        assert_eq!(
            first_message("import os.path as p\n"),
            "Import of disallowed module 'os.path'."
        );
        assert_eq!(
            first_message("import numpy\n"),
            "Import of module 'numpy' not allowed by whitelist."
        );
        assert_eq!(
            first_message("from subprocess import run\n"),
            "Import from disallowed module 'subprocess'."
        );
        assert_eq!(
            first_message("from json import loads\n"),
            "Import from module 'json' not allowed by whitelist."
        );
        assert_eq!(
            first_message("from . import helper\n"),
            "Relative imports are not allowed."
        );
        assert_eq!(
            first_message("from .helper import x\n"),
            "Relative imports are not allowed."
        );
        assert_eq!(
            first_message("from __future__ import annotations\n"),
            "Import from module '__future__' not allowed by whitelist."
        );
    }

    #[test]
    fn test_import_budget() {
        let four = "import math\nimport random\nimport re\nimport heapq\n";
        assert!(check(four).is_empty());

        let five = format!("{}import bisect\n", four);
        let violations = check(&five);
        assert_eq!(violations[0].kind, ViolationKind::ImportBudgetExceeded);
        assert_eq!(
            violations[0].message,
            "Too many distinct imports in Python (5 > 4)."
        );

        // Repeated roots count once.
        let repeated = "import math\nfrom math import sqrt\nimport collections\n";
        assert!(check(repeated).is_empty());
    }

    #[test]
    fn test_module_attribute_access() {
        assert_eq!(
            first_message("x = sys.argv\n"),
            "Access to module 'sys' is not allowed."
        );
        assert_eq!(
            first_message("__builtins__.eval('1')\n"),
            "Access to module '__builtins__' is not allowed."
        );
    }

    #[test]
    fn test_dangerous_builtins() {
        let violations = check("eval('1 + 1')\n");
        assert_eq!(violations[0].kind, ViolationKind::DangerousPattern);
        assert_eq!(violations[0].message, "Use of builtin 'eval' not allowed.");
        assert_eq!(violations[0].line, Some(1));

        assert_eq!(
            first_message("x = 1\nf = open('data.txt')\n"),
            "Use of builtin 'open' not allowed."
        );
        assert_eq!(
            first_message("m = __import__('os')\n"),
            "Use of builtin '__import__' not allowed."
        );
        // Method calls with the same name are fine.
        assert!(check("import re\nre.compile('a+')\n").is_empty());
    }

    #[test]
    fn test_bytearray_allocations() {
        assert_eq!(
            first_message("b = bytearray(200000000)\n"),
            "Large allocation request: bytearray(200000000) >= threshold"
        );
        assert_eq!(
            first_message("b = bytes(1 << 30)\n"),
            "Large allocation expression in Python: 1 << 30"
        );
        assert!(check("b = bytearray(1024)\n").is_empty());
        assert!(check("n = 10\nb = bytearray(n)\n").is_empty());
    }

    #[test]
    fn test_range_materialisation() {
        assert_eq!(
            first_message("xs = list(range(10**9))\n"),
            "Large list(range(...)) requested: 10**9"
        );
        assert_eq!(
            first_message("xs = set(range(5, 10**9))\n"),
            "Large set(range(...)) requested: 5, 10**9"
        );
        assert!(check("xs = list(range(10**9 - 5, 10**9))\n").is_empty());
        assert!(check("xs = list(range(0, 10**9, 10**6))\n").is_empty());
        assert!(check("for i in range(10**9):\n    pass\n").is_empty());
    }

    #[test]
    fn test_range_direction_and_step() {
        assert_eq!(
            first_message("xs = list(range(10**9, 0, -1))\n"),
            "Large list(range(...)) requested: 10**9, 0, -1"
        );
        assert!(!check("xs = list(range(10**9, 0, step))\n").is_empty());
        assert!(check("xs = list(range(10, 0, -1))\n").is_empty());
        assert!(check("xs = list(range(0, 10**9, -1))\n").is_empty());

        let policy = Policy {
            byte_threshold: Some(1000),
            ..Default::default()
        };
        assert!(check_with(&policy, "xs = list(range(0, 1998, 2))\n").is_empty());
        assert!(!check_with(&policy, "xs = list(range(0, 2000, 2))\n").is_empty());
        assert!(check_with(&policy, "xs = list(range(1998, 0, -2))\n").is_empty());
        assert!(!check_with(&policy, "xs = list(range(2000, 0, -2))\n").is_empty());
    }

    #[test]
    fn test_multiplication() {
        assert_eq!(
            first_message("a = [0] * 200000000\n"),
            "Large list multiplication in Python: multiplier 200000000 >= threshold"
        );
        assert_eq!(
            first_message("a = [0] * (1 << 28)\n"),
            "Large list multiplication expression: [0] * (1 << 28)"
        );
        assert_eq!(
            first_message("a = [0] * 20000 * 20000\n"),
            "Large list multiplication expression: [0] * 20000 * 20000"
        );
        assert_eq!(
            first_message("s = 2 ** 30 * 'ab'\n"),
            "Large list multiplication expression: 2 ** 30 * 'ab'"
        );
        assert!(check("a = [0] * 1000\n").is_empty());
        assert!(check("n = 5\na = [0] * n * n\n").is_empty());
        assert!(check("x = 3 * 4\n").is_empty());
    }

    #[test]
    fn test_threshold_boundary() {
        let policy = Policy {
            byte_threshold: Some(1000),
            ..Default::default()
        };
        assert!(!check_with(&policy, "b = bytearray(1000)\n").is_empty());
        assert!(check_with(&policy, "b = bytearray(999)\n").is_empty());
    }

    #[test]
    fn test_report_all_collects_every_violation() {
        let policy = Policy {
            report_all: Some(true),
            ..Default::default()
        };
        let violations = check_with(&policy, "import os\neval('1')\n");
        let messages: Vec<_> = violations.iter().map(|v| v.message.as_str()).collect();
        assert_eq!(
            messages,
            vec![
                "Import of disallowed module 'os'.",
                "Use of builtin 'eval' not allowed."
            ]
        );
    }

    #[test]
    fn test_individual_scans() {
        let compiled = CompiledPolicy::compile(&Policy::default()).unwrap();
        let analyzer = PythonAnalyzer::new();
        let parsed = analyzer.parse("eval('1')\nb = bytearray(1 << 40)\n").unwrap();

        let mut ctx = AnalysisContext::new(&compiled, Language::Python);
        analyzer.scan_imports(&parsed, &mut ctx).unwrap();
        assert!(!ctx.has_violations());

        let mut ctx = AnalysisContext::new(&compiled, Language::Python);
        analyzer.scan_allocations(&parsed, &mut ctx).unwrap();
        let violations = ctx.into_violations();
        assert_eq!(violations[0].kind, ViolationKind::AllocationTooLarge);
        assert_eq!(violations[0].line, Some(2));
    }
}

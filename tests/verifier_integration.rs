//! Integration tests for the verifier.
//!
//! These tests drive the public API against the submissions under
//! `testdata/submissions` and against inline sources.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use codegate::{Language, LanguageRules, Policy, Verifier, ViolationKind, SAFE_REASON};

fn submission(name: &str) -> String {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("testdata")
        .join("submissions")
        .join(name);
    std::fs::read_to_string(&path).expect("should read fixture")
}

fn setup() -> Verifier {
    codegate::init();
    Verifier::default()
}

#[test]
fn test_python_os_import_is_rejected() {
    let verdict = setup().check(&submission("shell.py"), "python");
    assert!(!verdict.is_safe());
    assert!(verdict.reason().contains("'os'"), "reason: {}", verdict.reason());
    assert!(verdict.has_kind(ViolationKind::PolicyViolation));
}

#[test]
fn test_python_math_alone_is_safe() {
    let verdict = setup().check("import math\n", "python");
    assert!(verdict.is_safe());
    assert_eq!(verdict.reason(), SAFE_REASON);
}

#[test]
fn test_c_system_header_is_rejected() {
    let verdict = setup().check(&submission("syscall.c"), "c");
    assert!(!verdict.is_safe());
    assert_eq!(verdict.reason(), "C header not allowed: unistd.h");
}

#[test]
fn test_c_static_array_over_threshold_is_rejected() {
    let verifier = setup();
    assert_eq!(verifier.policy().byte_threshold, 128 * 1024 * 1024);
    let verdict = verifier.check(&submission("big_array.c"), "c");
    assert!(!verdict.is_safe());
    assert!(verdict.has_kind(ViolationKind::AllocationTooLarge));
}

#[test]
fn test_go_os_import_is_rejected_despite_allow_list() {
    let policy = Policy {
        go: Some(LanguageRules {
            allowed_modules: Some(vec!["fmt".to_string(), "os".to_string()]),
            ..Default::default()
        }),
        ..Default::default()
    };
    let verifier = Verifier::new(&policy).unwrap();
    let verdict = verifier.check(&submission("os_import.go"), "go");
    assert!(!verdict.is_safe());
    assert!(verdict.reason().contains("'os'"));
}

#[test]
fn test_js_constant_is_safe() {
    let verdict = setup().check(&submission("const.js"), "javascript");
    assert!(verdict.is_safe(), "reason: {}", verdict.reason());
}

#[test]
fn test_safe_fixtures() {
    let verifier = setup();
    for (name, language) in [
        ("safe.py", "python"),
        ("sum.c", "c"),
        ("hello.go", "go"),
        ("const.js", "js"),
        ("Main.java", "java"),
    ] {
        let verdict = verifier.check(&submission(name), language);
        assert!(verdict.is_safe(), "{}: {}", name, verdict.reason());
    }
}

#[test]
fn test_unsafe_fixtures() {
    let verifier = setup();
    for (name, language) in [
        ("shell.py", "python"),
        ("huge.py", "python"),
        ("syscall.c", "c"),
        ("big_array.c", "c"),
        ("os_import.go", "go"),
        ("child.js", "js"),
        ("Files.java", "java"),
    ] {
        let verdict = verifier.check(&submission(name), language);
        assert!(!verdict.is_safe(), "{} should be rejected", name);
    }
}

#[test]
fn test_unsupported_language_names_the_tag() {
    let verdict = setup().check("fn main() {}", "Rust");
    assert!(!verdict.is_safe());
    assert_eq!(verdict.reason(), "Unsupported language: rust");
}

#[test]
fn test_invalid_python_syntax() {
    let verdict = setup().check("def f(:\n    pass\n", "python");
    assert!(!verdict.is_safe());
    assert_eq!(verdict.reason(), "Invalid Python syntax.");
    assert!(verdict.has_kind(ViolationKind::SyntaxError));
}

#[test]
fn test_allocation_threshold_boundary() {
    let verifier = Verifier::with_limits(4096, 4).unwrap();
    assert!(!verifier.check("b = bytearray(4096)\n", "python").is_safe());
    assert!(verifier.check("b = bytearray(4095)\n", "python").is_safe());

    assert!(!verifier.check("int buf[4096];\n", "c").is_safe());
    assert!(verifier.check("int buf[4095];\n", "c").is_safe());
}

#[test]
fn test_import_count_boundary() {
    let verifier = setup();
    let four = "import math\nimport re\nimport heapq\nimport bisect\n";
    assert!(verifier.check(four, "python").is_safe());

    let five = format!("{}import functools\n", four);
    let verdict = verifier.check(&five, "python");
    assert!(!verdict.is_safe());
    assert!(verdict.has_kind(ViolationKind::ImportBudgetExceeded));
}

#[test]
fn test_checks_are_idempotent() {
    let verifier = setup();
    for (code, language) in [
        ("import os\n", "python"),
        ("import math\n", "python"),
        ("#include <unistd.h>\n", "c"),
        ("const x = 5;", "js"),
    ] {
        let first = verifier.check(code, language);
        let second = verifier.check(code, language);
        assert_eq!(first, second, "{}", code);
    }
}

#[test]
fn test_whitelist_monotonicity() {
    let narrow = Verifier::default();
    let wide = Verifier::new(&Policy {
        python: Some(LanguageRules {
            allowed_modules: Some(
                [
                    "math", "random", "re", "functools", "itertools", "collections", "heapq",
                    "bisect", "statistics", "typing", "dataclasses", "json", "string",
                ]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            ),
            ..Default::default()
        }),
        ..Default::default()
    })
    .unwrap();

    for code in [
        "import math\n",
        "from collections import Counter\n",
        "import json\n",
        "import string\nimport heapq\n",
    ] {
        if narrow.check(code, "python").is_safe() {
            assert!(wide.check(code, "python").is_safe(), "{}", code);
        }
    }
    assert!(!narrow.check("import json\n", "python").is_safe());
    assert!(wide.check("import json\n", "python").is_safe());
}

#[test]
fn test_policy_file_drives_verifier() {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("testdata")
        .join("policy.yaml");
    let policy = Policy::parse_file(&path).unwrap();
    let verifier = Verifier::new(&policy).unwrap();

    assert!(verifier.check("import json\n", "python").is_safe());
    assert!(!verifier.check("import heapq\n", "python").is_safe());
    assert!(!verifier.check("b = bytearray(1 << 20)\n", "python").is_safe());
    assert!(!verifier
        .check("import math\nimport json\nfrom math import pi as p\nimport re\n", "python")
        .is_safe());
}

#[test]
fn test_report_all_collects_every_violation() {
    let fail_fast = setup();
    let thorough = Verifier::new(&Policy {
        report_all: Some(true),
        ..Default::default()
    })
    .unwrap();

    let code = "import os\nimport subprocess\n";
    assert_eq!(fail_fast.check(code, "python").violations.len(), 1);
    let verdict = thorough.check(code, "python");
    assert!(verdict.violations.len() >= 2);
    assert!(verdict.reason().contains("; "));
}

#[test]
fn test_verifier_shared_across_threads() {
    let verifier = Arc::new(setup());
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let verifier = Arc::clone(&verifier);
            thread::spawn(move || {
                let (code, language, safe) = if i % 2 == 0 {
                    ("import math\n", Language::Python, true)
                } else {
                    ("#include <unistd.h>\n", Language::C, false)
                };
                for _ in 0..20 {
                    assert_eq!(verifier.check_language(code, language).is_safe(), safe);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}

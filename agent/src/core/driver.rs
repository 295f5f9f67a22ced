//! Test driver synthesis and output comparison.
//!
//! The driver replaces any `main` the candidate declares with one that calls
//! the entry method once per parsed test case and prints each result on its
//! own line. Comparison is strictly positional: stdout line `i` is matched
//! against test case `i`. A candidate that prints extra or missing lines
//! therefore shifts every later comparison.

use std::fmt::Write as _;
use std::sync::LazyLock;

use regex::Regex;

use crate::core::test_case::ParsedTestCase;
use crate::core::types::{TestCaseResult, TestResult};

/// Method name assumed when no public method is found.
pub const DEFAULT_ENTRY_METHOD: &str = "solution";

static PUBLIC_METHOD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\bpublic\s+(?:static\s+)?(?:final\s+)?(?:synchronized\s+)?[\w.$]+(?:\s*<[^()]*?>)?(?:\s*\[\s*\])*\s+(\w+)\s*\(",
    )
    .expect("method pattern should compile")
});

static MAIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?:public\s+)?static\s+void\s+main\s*\([^)]*\)\s*(?:throws\s+[\w.,\s]+?)?\s*\{",
    )
    .expect("main pattern should compile")
});

/// First public method in the source other than `main`.
pub fn extract_entry_method(source: &str) -> String {
    PUBLIC_METHOD_RE
        .captures_iter(source)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
        .find(|name| *name != "main")
        .unwrap_or(DEFAULT_ENTRY_METHOD)
        .to_string()
}

/// Remove every `static void main(...) { ... }` block from the source.
pub fn strip_main(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut rest = source;
    while let Some(found) = MAIN_RE.find(rest) {
        out.push_str(&rest[..found.start()]);
        match matching_brace(rest, found.end() - 1) {
            Some(close) => rest = &rest[close + 1..],
            None => {
                // Unbalanced braces: leave the tail alone and let the compiler report it.
                out.push_str(&rest[found.start()..]);
                return out;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Byte index of the `}` closing the `{` at `open`. Literals and comments are
/// skipped so braces inside them do not count.
fn matching_brace(source: &str, open: usize) -> Option<usize> {
    let bytes = source.as_bytes();
    let mut depth = 0usize;
    let mut idx = open;
    let mut quote: Option<u8> = None;
    while idx < bytes.len() {
        let b = bytes[idx];
        match quote {
            Some(q) => {
                if b == b'\\' {
                    idx += 1;
                } else if b == q {
                    quote = None;
                }
            }
            None => match b {
                b'/' if bytes.get(idx + 1) == Some(&b'/') => {
                    idx = source[idx..].find('\n').map_or(bytes.len(), |n| idx + n);
                }
                b'/' if bytes.get(idx + 1) == Some(&b'*') => {
                    idx = source[idx + 2..]
                        .find("*/")
                        .map_or(bytes.len(), |n| idx + 2 + n + 1);
                }
                b'"' | b'\'' => quote = Some(b),
                b'{' => depth += 1,
                b'}' => {
                    depth = depth.checked_sub(1)?;
                    if depth == 0 {
                        return Some(idx);
                    }
                }
                _ => {}
            },
        }
        idx += 1;
    }
    None
}

/// Render the generated `main` for `entry_type` and `entry_method`.
pub fn render_driver(entry_type: &str, entry_method: &str, cases: &[ParsedTestCase]) -> String {
    let mut driver = String::new();
    driver.push_str("    public static void main(String[] args) {\n");
    let _ = writeln!(driver, "        {entry_type} sol = new {entry_type}();");
    for (idx, case) in cases.iter().enumerate() {
        let label = case.original.replace(['\r', '\n'], " ");
        let _ = writeln!(driver, "        // Test case {}: {}", idx + 1, label);
        let _ = writeln!(
            driver,
            "        System.out.println(sol.{entry_method}({}));",
            case.input
        );
    }
    driver.push_str("    }\n");
    driver
}

/// Replace any existing `main` and inject the test driver before the final `}`.
///
/// Sources with no closing brace are returned unchanged (minus any `main`);
/// compilation will report them.
pub fn synthesize(
    source: &str,
    entry_type: &str,
    entry_method: &str,
    cases: &[ParsedTestCase],
) -> String {
    let stripped = strip_main(source);
    let Some(last_brace) = stripped.rfind('}') else {
        return stripped;
    };
    let mut out = String::with_capacity(stripped.len() + 256);
    out.push_str(stripped[..last_brace].trim_end());
    out.push_str("\n\n");
    out.push_str(&render_driver(entry_type, entry_method, cases));
    out.push_str("}\n");
    out
}

/// Compare stdout lines with expected values, position by position.
///
/// Missing lines compare as the empty string and count as failures.
pub fn compare(cases: &[ParsedTestCase], stdout: &str) -> TestResult {
    let lines: Vec<&str> = stdout.lines().collect();
    let mut results = Vec::with_capacity(cases.len());
    let mut passed_count = 0;
    let mut failed_count = 0;
    let mut failure_summary = String::new();

    for (idx, case) in cases.iter().enumerate() {
        let expected = case.expected.trim();
        let actual = lines.get(idx).map(|l| l.trim()).unwrap_or("");
        let passed = actual == expected;
        if passed {
            passed_count += 1;
        } else {
            failed_count += 1;
            let _ = write!(
                failure_summary,
                "Test: {}\n  Expected: {}\n  Actual: {}\n",
                case.original, expected, actual
            );
        }
        results.push(TestCaseResult {
            test_case: case.original.clone(),
            input: case.input.clone(),
            expected: expected.to_string(),
            actual: actual.to_string(),
            passed,
            error_message: (!passed).then(|| format!("Expected '{expected}' but got '{actual}'")),
        });
    }

    TestResult {
        cases: results,
        passed_count,
        failed_count,
        failure_summary,
        parse_failed: false,
        execution: None,
    }
}

//! Runs a candidate against its task's test cases.

use tracing::{debug, instrument, warn};

use crate::core::driver::{compare, extract_entry_method, synthesize};
use crate::core::sanitize::{extract_entry_type, strip_markdown};
use crate::core::test_case::parse_all;
use crate::core::types::TestResult;
use crate::io::sandbox::Sandbox;

pub const PARSE_FAILURE_SUMMARY: &str = "Could not parse any test cases";

/// Wraps a candidate in a generated driver and checks its output.
#[derive(Debug, Clone)]
pub struct TestHarness<S> {
    sandbox: S,
}

impl<S: Sandbox> TestHarness<S> {
    pub fn new(sandbox: S) -> Self {
        Self { sandbox }
    }

    /// Never fails; every problem is reported as failed cases.
    #[instrument(skip_all, fields(cases = test_cases.len()))]
    pub fn run<T: AsRef<str>>(&self, source: &str, test_cases: &[T]) -> TestResult {
        let parsed = parse_all(test_cases);
        if parsed.is_empty() {
            warn!("no test case could be parsed; skipping execution");
            return TestResult {
                parse_failed: true,
                ..TestResult::all_failed(test_cases.len(), PARSE_FAILURE_SUMMARY)
            };
        }

        let code = strip_markdown(source);
        let entry_type = extract_entry_type(&code);
        let entry_method = extract_entry_method(&code);
        debug!(entry_type = %entry_type, entry_method = %entry_method, "synthesizing driver");
        let wrapped = synthesize(&code, &entry_type, &entry_method, &parsed);

        let execution = self.sandbox.execute(&wrapped);
        if !execution.is_success() {
            let summary = format!("Execution failed: {}", execution.error_message());
            return TestResult {
                execution: Some(execution),
                ..TestResult::all_failed(parsed.len(), summary)
            };
        }

        let mut result = compare(&parsed, &execution.stdout);
        debug!(
            passed = result.passed_count,
            failed = result.failed_count,
            "compared driver output"
        );
        result.execution = Some(execution);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ExecutionResult;
    use crate::test_support::ScriptedSandbox;

    const EVEN: &str = "public class Solution {\n    public boolean isEven(int n) { return n % 2 == 0; }\n}";

    #[test]
    fn unparsable_cases_skip_the_sandbox() {
        let sandbox = ScriptedSandbox::new(vec![]);
        let harness = TestHarness::new(&sandbox);
        let result = harness.run(EVEN, &["whatever", "  "]);

        assert!(result.parse_failed);
        assert_eq!(result.failed_count, 2);
        assert_eq!(result.passed_count, 0);
        assert_eq!(result.failure_summary, PARSE_FAILURE_SUMMARY);
        assert!(sandbox.sources().is_empty());
    }

    #[test]
    fn driver_calls_entry_method_per_case() {
        let sandbox = ScriptedSandbox::new(vec![ExecutionResult {
            compiled: true,
            executed: true,
            stdout: "true\nfalse\n".to_string(),
            exit_code: Some(0),
            ..ExecutionResult::default()
        }]);
        let harness = TestHarness::new(&sandbox);
        let result = harness.run(EVEN, &["Input: 2, Output: true", "Input: 3, Output: false"]);

        assert!(result.all_passed());
        let sources = sandbox.sources();
        assert_eq!(sources.len(), 1);
        assert!(sources[0].contains("System.out.println(sol.isEven(2));"));
        assert!(sources[0].contains("System.out.println(sol.isEven(3));"));
        assert!(result.execution.is_some());
    }

    #[test]
    fn failed_execution_fails_every_parsed_case() {
        let sandbox = ScriptedSandbox::new(vec![ExecutionResult {
            stderr: "Solution.java:2: error: ';' expected".to_string(),
            exit_code: Some(1),
            ..ExecutionResult::default()
        }]);
        let harness = TestHarness::new(&sandbox);
        let result = harness.run(EVEN, &["2 -> true", "nonsense", "3 -> false"]);

        assert_eq!(result.failed_count, 2);
        assert_eq!(result.passed_count, 0);
        assert_eq!(
            result.failure_summary,
            "Execution failed: Solution.java:2: error: ';' expected"
        );
        assert!(!result.parse_failed);
    }
}

//! Failure classification and prompt rewriting between iterations.
//!
//! A [`ReflectionPolicy`] must be deterministic: identical inputs produce an
//! identical [`Reflection`], including the enhanced prompt. The loop's tests
//! rely on this.

use crate::core::classifier::classify_error_message;
use crate::core::prompt::{PromptBuilder, ReflectInputs};
use crate::core::task::Attempt;
use crate::core::types::{ErrorType, ExecutionResult, TestResult};

/// Number of earlier attempts summarized in the enhanced prompt.
const HISTORY_LIMIT: usize = 5;
/// Lines of raw error output quoted in root-cause text.
const EXCERPT_LINES: usize = 5;

/// Everything known about a failed iteration.
#[derive(Debug, Clone, Copy)]
pub struct ReflectionInput<'a> {
    pub source: &'a str,
    /// Direct sandbox run of the candidate as generated.
    pub execution: &'a ExecutionResult,
    pub tests: &'a TestResult,
    pub goal: &'a str,
    pub language: &'a str,
    pub test_cases: &'a [String],
    /// Prior attempts for this task, oldest first.
    pub history: &'a [Attempt],
}

/// Classification and rewritten prompt for the next iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reflection {
    pub error_type: ErrorType,
    pub analysis: String,
    pub root_cause: String,
    pub suggested_fix: String,
    pub enhanced_prompt: String,
}

pub trait ReflectionPolicy: Send + Sync {
    fn reflect(&self, input: &ReflectionInput<'_>) -> Reflection;
}

/// Substring/flag-based policy with templated prompt rewriting.
#[derive(Debug, Clone, Default)]
pub struct RuleBasedReflection {
    prompts: PromptBuilder,
}

impl RuleBasedReflection {
    pub fn new(prompt_budget_bytes: usize) -> Self {
        Self {
            prompts: PromptBuilder::new(prompt_budget_bytes),
        }
    }
}

impl ReflectionPolicy for RuleBasedReflection {
    fn reflect(&self, input: &ReflectionInput<'_>) -> Reflection {
        // The harness run is the one that exercised the test driver; prefer it.
        let execution = input.tests.execution.as_ref().unwrap_or(input.execution);
        let error_type = classify(execution, input.tests);
        let details = error_details(execution, input.tests, error_type);
        let excerpt = excerpt(&details, EXCERPT_LINES);
        let (root_cause, suggested_fix) = diagnose(error_type, &excerpt);
        let analysis = format!(
            "{error_type}: {}. {root_cause}",
            input.tests.summary()
        );

        let history = history_lines(input.history);
        let enhanced_prompt = self
            .prompts
            .build_reflect(&ReflectInputs {
                language: input.language,
                goal: input.goal,
                test_cases: input.test_cases,
                error_type: error_type.as_str(),
                root_cause: &root_cause,
                suggested_fix: &suggested_fix,
                details: Some(&details),
                previous_code: Some(input.source),
                history: &history,
            })
            .unwrap_or_else(|err| {
                tracing::warn!(err = %err, "reflect template failed, using plain prompt");
                plain_prompt(input, error_type, &root_cause, &suggested_fix)
            });

        Reflection {
            error_type,
            analysis,
            root_cause,
            suggested_fix,
            enhanced_prompt,
        }
    }
}

fn classify(execution: &ExecutionResult, tests: &TestResult) -> ErrorType {
    if tests.parse_failed {
        return ErrorType::TestParseError;
    }
    if execution.timed_out {
        return ErrorType::Timeout;
    }
    if execution.structural_error {
        return ErrorType::MalformedCode;
    }
    if !execution.compiled {
        return ErrorType::CompilationError;
    }
    if !execution.executed {
        return ErrorType::RuntimeError;
    }
    if !tests.cases.is_empty() {
        if tests.passed_count > 0 {
            return ErrorType::TestFailure;
        }
        return ErrorType::LogicError;
    }
    classify_error_message(&tests.failure_summary)
}

fn error_details(execution: &ExecutionResult, tests: &TestResult, error_type: ErrorType) -> String {
    match error_type {
        ErrorType::TestFailure | ErrorType::LogicError | ErrorType::TestParseError => {
            tests.failure_summary.trim().to_string()
        }
        ErrorType::Unknown if execution.is_success() => tests.failure_summary.trim().to_string(),
        _ => execution.error_message(),
    }
}

fn excerpt(text: &str, max_lines: usize) -> String {
    text.lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .take(max_lines)
        .collect::<Vec<_>>()
        .join("\n")
}

fn diagnose(error_type: ErrorType, excerpt: &str) -> (String, String) {
    let quoted = if excerpt.is_empty() {
        String::new()
    } else {
        format!("\n{excerpt}")
    };
    let (cause, fix) = match error_type {
        ErrorType::CompilationError => (
            "The code does not compile.",
            "Fix the syntax and type errors reported by the compiler; declare every symbol you use and keep a single top-level class.",
        ),
        ErrorType::RuntimeError => (
            "The code compiled but threw an error or exited non-zero while running.",
            "Guard against null values, out-of-range indexes and division by zero for the inputs in the test cases.",
        ),
        ErrorType::TestFailure => (
            "Some test cases produced the wrong output.",
            "Compare the expected and actual values for the failing cases and correct the logic for those inputs.",
        ),
        ErrorType::LogicError => (
            "No test case produced the expected output.",
            "Re-read the goal; the algorithm or the return value format is wrong. Return exactly the value shown as expected output.",
        ),
        ErrorType::Timeout => (
            "Compilation or execution exceeded the time limit.",
            "Remove unbounded loops and use an algorithm whose running time fits the inputs.",
        ),
        ErrorType::SafetyViolation => (
            "The code uses operations that are not allowed.",
            "Remove file, network, process, reflection, exit and sleep calls.",
        ),
        ErrorType::MalformedCode => (
            "The response did not contain a recognizable class declaration.",
            "Return one complete class in a fenced code block with no surrounding prose.",
        ),
        ErrorType::TestParseError => (
            "The test cases could not be parsed, so the code was never run.",
            "Keep the public method signature simple; the test inputs are passed verbatim as its arguments.",
        ),
        ErrorType::Unknown => (
            "The attempt failed for an unrecognized reason.",
            "Write a straightforward, complete solution that satisfies every test case.",
        ),
    };
    (format!("{cause}{quoted}"), fix.to_string())
}

fn history_lines(history: &[Attempt]) -> Vec<String> {
    let skip = history.len().saturating_sub(HISTORY_LIMIT);
    history
        .iter()
        .skip(skip)
        .map(|attempt| {
            let error_type = attempt.error_type.unwrap_or(ErrorType::Unknown);
            let first_line = attempt
                .error_message
                .as_deref()
                .and_then(|m| m.lines().find(|l| !l.trim().is_empty()))
                .map(str::trim)
                .unwrap_or("no details");
            format!(
                "Iteration {}: {error_type} - {first_line}",
                attempt.iteration_number + 1
            )
        })
        .collect()
}

fn plain_prompt(
    input: &ReflectionInput<'_>,
    error_type: ErrorType,
    root_cause: &str,
    suggested_fix: &str,
) -> String {
    format!(
        "Goal: {}\n\nTest cases:\n{}\n\nThe previous attempt failed with {error_type}.\nRoot cause: {root_cause}\nSuggested fix: {suggested_fix}\n\nReturn only the corrected {} code in a fenced block.",
        input.goal,
        input.test_cases.join("\n"),
        input.language
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::TestCaseResult;

    fn failing_case(passed: bool) -> TestCaseResult {
        TestCaseResult {
            test_case: "Input: 2, Output: true".to_string(),
            input: "2".to_string(),
            expected: "true".to_string(),
            actual: if passed { "true" } else { "false" }.to_string(),
            passed,
            error_message: None,
        }
    }

    fn reflect(execution: &ExecutionResult, tests: &TestResult, history: &[Attempt]) -> Reflection {
        let cases = vec!["Input: 2, Output: true".to_string()];
        RuleBasedReflection::default().reflect(&ReflectionInput {
            source: "public class Solution {}",
            execution,
            tests,
            goal: "return true if input is even",
            language: "java",
            test_cases: &cases,
            history,
        })
    }

    fn compile_failure() -> ExecutionResult {
        ExecutionResult {
            stderr: "Solution.java:2: error: cannot find symbol".to_string(),
            exit_code: Some(1),
            ..ExecutionResult::default()
        }
    }

    #[test]
    fn compile_failure_in_harness_run_is_compilation_error() {
        let tests = TestResult {
            execution: Some(compile_failure()),
            ..TestResult::all_failed(1, "Execution failed: cannot find symbol")
        };
        let reflection = reflect(&ExecutionResult::default(), &tests, &[]);
        assert_eq!(reflection.error_type, ErrorType::CompilationError);
        assert!(reflection.root_cause.contains("cannot find symbol"));
        assert!(reflection.enhanced_prompt.contains("Error type: COMPILATION_ERROR"));
        assert!(reflection.enhanced_prompt.contains("public class Solution {}"));
    }

    #[test]
    fn partial_pass_is_test_failure_and_none_is_logic_error() {
        let ok = ExecutionResult {
            compiled: true,
            executed: true,
            exit_code: Some(0),
            ..ExecutionResult::default()
        };
        let partial = TestResult {
            cases: vec![failing_case(true), failing_case(false)],
            passed_count: 1,
            failed_count: 1,
            failure_summary: "Test: x\n  Expected: true\n  Actual: false\n".to_string(),
            parse_failed: false,
            execution: Some(ok.clone()),
        };
        assert_eq!(reflect(&ok, &partial, &[]).error_type, ErrorType::TestFailure);

        let none = TestResult {
            cases: vec![failing_case(false)],
            passed_count: 0,
            failed_count: 1,
            ..partial
        };
        let reflection = reflect(&ok, &none, &[]);
        assert_eq!(reflection.error_type, ErrorType::LogicError);
        assert!(reflection.enhanced_prompt.contains("Actual: false"));
    }

    #[test]
    fn timeout_and_parse_failure_are_classified() {
        let timed_out = ExecutionResult {
            compiled: true,
            timed_out: true,
            ..ExecutionResult::default()
        };
        let tests = TestResult {
            execution: Some(timed_out),
            ..TestResult::all_failed(1, "Execution failed: execution timed out")
        };
        assert_eq!(
            reflect(&ExecutionResult::default(), &tests, &[]).error_type,
            ErrorType::Timeout
        );

        let mut unparsed = TestResult::all_failed(1, "Could not parse any test cases");
        unparsed.parse_failed = true;
        assert_eq!(
            reflect(&ExecutionResult::default(), &unparsed, &[]).error_type,
            ErrorType::TestParseError
        );
    }

    #[test]
    fn unknown_classification_still_yields_a_prompt() {
        let ok = ExecutionResult {
            compiled: true,
            executed: true,
            ..ExecutionResult::default()
        };
        let tests = TestResult::all_failed(1, "");
        let reflection = reflect(&ok, &tests, &[]);
        assert_eq!(reflection.error_type, ErrorType::Unknown);
        assert!(!reflection.enhanced_prompt.trim().is_empty());
        assert!(reflection.enhanced_prompt.contains("return true if input is even"));
    }

    #[test]
    fn reflection_is_deterministic() {
        let tests = TestResult {
            execution: Some(compile_failure()),
            ..TestResult::all_failed(1, "Execution failed")
        };
        let history = vec![Attempt {
            error_type: Some(ErrorType::SafetyViolation),
            error_message: Some("Forbidden blocking sleep detected".to_string()),
            ..Attempt::new("task-1", 0, "class A {}")
        }];
        let first = reflect(&ExecutionResult::default(), &tests, &history);
        let second = reflect(&ExecutionResult::default(), &tests, &history);
        assert_eq!(first, second);
        assert!(
            first
                .enhanced_prompt
                .contains("Iteration 1: SAFETY_VIOLATION - Forbidden blocking sleep detected")
        );
    }

    #[test]
    fn history_is_limited_to_latest_attempts() {
        let history: Vec<Attempt> = (0..8)
            .map(|i| Attempt::new("task-1", i, "class A {}"))
            .collect();
        let lines = history_lines(&history);
        assert_eq!(lines.len(), HISTORY_LIMIT);
        assert!(lines[0].starts_with("Iteration 4:"));
        assert!(lines[4].starts_with("Iteration 8:"));
    }
}

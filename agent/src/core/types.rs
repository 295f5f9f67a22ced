//! Shared deterministic types for agent core logic.
//!
//! These types are produced and consumed within a single iteration. None of
//! them are persisted directly; the loop copies what it needs into an
//! [`Attempt`](crate::core::task::Attempt).

use serde::{Deserialize, Serialize};

/// Categorical outcome of a failed iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorType {
    /// The compiler rejected the candidate (or produced no artifact).
    CompilationError,
    /// The candidate compiled but exited non-zero.
    RuntimeError,
    /// The candidate ran but some test cases produced the wrong output.
    TestFailure,
    /// Compilation or execution exceeded its wall-clock limit.
    Timeout,
    /// The safety gate refused to run the candidate.
    SafetyViolation,
    /// The candidate ran but no test case produced the expected output.
    LogicError,
    /// None of the task's test cases could be parsed.
    TestParseError,
    /// The candidate contained no recognizable declaration.
    MalformedCode,
    Unknown,
}

impl ErrorType {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorType::CompilationError => "COMPILATION_ERROR",
            ErrorType::RuntimeError => "RUNTIME_ERROR",
            ErrorType::TestFailure => "TEST_FAILURE",
            ErrorType::Timeout => "TIMEOUT",
            ErrorType::SafetyViolation => "SAFETY_VIOLATION",
            ErrorType::LogicError => "LOGIC_ERROR",
            ErrorType::TestParseError => "TEST_PARSE_ERROR",
            ErrorType::MalformedCode => "MALFORMED_CODE",
            ErrorType::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one compile + run cycle in the sandbox.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub compiled: bool,
    pub executed: bool,
    pub stdout: String,
    pub stderr: String,
    /// Exit code of the last process that ran. `None` when the process was
    /// killed by a signal or never spawned.
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub execution_time_ms: u64,
    /// Set when the sanitizer rejected the source before compilation.
    pub structural_error: bool,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.compiled && self.executed
    }

    /// Single human-readable description of why this execution failed.
    pub fn error_message(&self) -> String {
        let stderr = self.stderr.trim();
        if self.timed_out {
            let phase = if self.compiled { "execution" } else { "compilation" };
            if stderr.is_empty() {
                return format!("{phase} timed out");
            }
            return format!("{phase} timed out: {stderr}");
        }
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        match self.exit_code {
            Some(0) if self.is_success() => String::new(),
            Some(code) => format!("process exited with code {code}"),
            None => "process terminated without an exit code".to_string(),
        }
    }
}

/// Per-case comparison outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCaseResult {
    /// Original test case text, e.g. `Input: 2, Output: true`.
    pub test_case: String,
    pub input: String,
    pub expected: String,
    pub actual: String,
    pub passed: bool,
    pub error_message: Option<String>,
}

/// Aggregate result of running a candidate against the task's test cases.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    pub cases: Vec<TestCaseResult>,
    pub passed_count: usize,
    pub failed_count: usize,
    pub failure_summary: String,
    /// True when no test case could be parsed and the sandbox was never invoked.
    pub parse_failed: bool,
    /// Sandbox run of the candidate with the synthesized test driver.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionResult>,
}

impl TestResult {
    /// Result in which every case failed for the same reason.
    pub fn all_failed(failed_count: usize, failure_summary: impl Into<String>) -> Self {
        Self {
            cases: Vec::new(),
            passed_count: 0,
            failed_count,
            failure_summary: failure_summary.into(),
            parse_failed: false,
            execution: None,
        }
    }

    pub fn all_passed(&self) -> bool {
        self.failed_count == 0 && self.passed_count > 0
    }

    /// Fraction of cases that passed, in `0.0..=1.0`.
    pub fn pass_rate(&self) -> f64 {
        let total = self.passed_count + self.failed_count;
        if total == 0 {
            return 0.0;
        }
        self.passed_count as f64 / total as f64
    }

    pub fn summary(&self) -> String {
        format!(
            "{}/{} tests passed ({:.1}%)",
            self.passed_count,
            self.passed_count + self.failed_count,
            self.pass_rate() * 100.0
        )
    }
}

/// Verdict of the pre-execution safety screen.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyVerdict {
    pub violations: Vec<String>,
}

impl SafetyVerdict {
    pub fn is_safe(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn summary(&self) -> String {
        if self.violations.is_empty() {
            return "No safety violations".to_string();
        }
        self.violations.join("; ")
    }
}

//! Task and attempt records.
//!
//! Tasks and attempts live in an arena keyed by id (see
//! [`TaskStore`](crate::io::store::TaskStore)). An attempt carries its
//! task's id as a plain foreign key; there are no back-pointers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::types::ErrorType;

pub const DEFAULT_MAX_ITERATIONS: u32 = 10;
pub const MAX_ITERATIONS_LIMIT: u32 = 100;
pub const DEFAULT_LANGUAGE: &str = "java";

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Transitions are monotonic: PENDING -> IN_PROGRESS -> terminal.
    /// CANCELLED is reachable from PENDING and IN_PROGRESS only.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        match (self, next) {
            (TaskStatus::Pending, TaskStatus::InProgress) => true,
            (TaskStatus::Pending, TaskStatus::Cancelled) => true,
            // A worker that fails before it can mark the task started still
            // records the failure.
            (TaskStatus::Pending, TaskStatus::Failed) => true,
            // Progress writes keep the task IN_PROGRESS.
            (TaskStatus::InProgress, TaskStatus::InProgress) => true,
            (TaskStatus::InProgress, next) => next.is_terminal(),
            (current, next) => current == next && !current.is_terminal(),
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "PENDING" => Ok(TaskStatus::Pending),
            "IN_PROGRESS" => Ok(TaskStatus::InProgress),
            "COMPLETED" => Ok(TaskStatus::Completed),
            "FAILED" => Ok(TaskStatus::Failed),
            "CANCELLED" => Ok(TaskStatus::Cancelled),
            other => Err(format!("unknown task status '{other}'")),
        }
    }
}

/// Caller-supplied description of a new task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub goal: String,
    #[serde(default)]
    pub description: Option<String>,
    pub test_cases: Vec<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub max_iterations: Option<u32>,
}

impl TaskRequest {
    pub fn new(goal: impl Into<String>, test_cases: Vec<String>) -> Self {
        Self {
            goal: goal.into(),
            description: None,
            test_cases,
            language: None,
            max_iterations: None,
        }
    }

    /// Returns a list of stable error messages (empty on success).
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.goal.trim().is_empty() {
            errors.push("goal is required".to_string());
        }
        if !self.test_cases.iter().any(|case| !case.trim().is_empty()) {
            errors.push("at least one test case is required".to_string());
        }
        if let Some(max) = self.max_iterations
            && !(1..=MAX_ITERATIONS_LIMIT).contains(&max)
        {
            errors.push(format!(
                "max_iterations must be in 1..={MAX_ITERATIONS_LIMIT} (got {max})"
            ));
        }
        errors
    }
}

/// A code-generation task and its lifecycle bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub goal: String,
    pub description: Option<String>,
    pub language: String,
    pub test_cases: Vec<String>,
    pub status: TaskStatus,
    pub current_iteration: u32,
    pub max_iterations: u32,
    /// Winning candidate; set only when the task completes.
    pub generated_code: Option<String>,
    /// Failure description; set only when the task fails.
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Build a PENDING task from a request. The request must already be valid.
    pub fn from_request(request: &TaskRequest, default_max_iterations: u32) -> Self {
        let test_cases = request
            .test_cases
            .iter()
            .map(|case| case.trim().to_string())
            .filter(|case| !case.is_empty())
            .collect();
        Self {
            id: Uuid::new_v4().to_string(),
            goal: request.goal.trim().to_string(),
            description: request
                .description
                .as_deref()
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(str::to_string),
            language: request
                .language
                .clone()
                .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
            test_cases,
            status: TaskStatus::Pending,
            current_iteration: 0,
            max_iterations: request.max_iterations.unwrap_or(default_max_iterations),
            generated_code: None,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }
}

/// Immutable record of one iteration's candidate and outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    pub id: String,
    pub task_id: String,
    /// Zero-based loop index; unique per task.
    pub iteration_number: u32,
    pub generated_code: String,
    pub test_passed: bool,
    /// Captured stdout excerpt from the sandbox run.
    pub test_output: Option<String>,
    pub error_message: Option<String>,
    pub error_type: Option<ErrorType>,
    pub reflection_analysis: Option<String>,
    pub root_cause: Option<String>,
    pub suggested_fix: Option<String>,
    pub execution_time_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
}

impl Attempt {
    pub fn new(task_id: &str, iteration_number: u32, generated_code: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            task_id: task_id.to_string(),
            iteration_number,
            generated_code: generated_code.to_string(),
            test_passed: false,
            test_output: None,
            error_message: None,
            error_type: None,
            reflection_analysis: None,
            root_cause: None,
            suggested_fix: None,
            execution_time_ms: None,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions_are_monotonic() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::InProgress));
        assert!(TaskStatus::InProgress.can_transition_to(TaskStatus::Completed));
        assert!(TaskStatus::InProgress.can_transition_to(TaskStatus::Cancelled));
        assert!(TaskStatus::InProgress.can_transition_to(TaskStatus::InProgress));
        assert!(!TaskStatus::InProgress.can_transition_to(TaskStatus::Pending));
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Failed));
        assert!(!TaskStatus::Cancelled.can_transition_to(TaskStatus::Completed));
        assert!(!TaskStatus::Failed.can_transition_to(TaskStatus::Cancelled));
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Completed));
    }

    #[test]
    fn status_parses_case_insensitively() {
        assert_eq!(
            "in_progress".parse::<TaskStatus>(),
            Ok(TaskStatus::InProgress)
        );
        assert_eq!("Cancelled".parse::<TaskStatus>(), Ok(TaskStatus::Cancelled));
        assert!("done".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn request_validation_reports_every_problem() {
        let mut request = TaskRequest::new("  ", vec![" ".to_string()]);
        request.max_iterations = Some(0);
        let errors = request.validate();
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().any(|e| e.contains("goal")));
        assert!(errors.iter().any(|e| e.contains("test case")));
        assert!(errors.iter().any(|e| e.contains("max_iterations")));
    }

    #[test]
    fn task_from_request_drops_blank_cases_and_applies_defaults() {
        let request = TaskRequest::new(
            "return true if even",
            vec!["Input: 2, Output: true".to_string(), "  ".to_string()],
        );
        let task = Task::from_request(&request, DEFAULT_MAX_ITERATIONS);
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.test_cases, vec!["Input: 2, Output: true".to_string()]);
        assert_eq!(task.max_iterations, DEFAULT_MAX_ITERATIONS);
        assert_eq!(task.language, DEFAULT_LANGUAGE);
        assert_eq!(task.current_iteration, 0);
        assert!(Uuid::parse_str(&task.id).is_ok());
    }

    #[test]
    fn task_serializes_status_in_screaming_case() {
        let request = TaskRequest::new("goal", vec!["1 -> 1".to_string()]);
        let task = Task::from_request(&request, 3);
        let value = serde_json::to_value(&task).expect("serialize");
        assert_eq!(value["status"], "PENDING");
        assert_eq!(value["max_iterations"], 3);
    }
}

//! Orchestration of one task through bounded generate/test/reflect iterations.
//!
//! Every write the loop makes while a task runs is conditional on the stored
//! status still being IN_PROGRESS. A cancellation recorded by another thread
//! therefore wins: the next conditional write fails, the loop stops, and the
//! task stays CANCELLED.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, error, info, instrument, warn};

use crate::core::prompt::{GenerateInputs, PromptBuilder};
use crate::core::reflection::{ReflectionInput, ReflectionPolicy, RuleBasedReflection};
use crate::core::safety::SafetyGate;
use crate::core::task::{Attempt, Task, TaskStatus};
use crate::core::types::{ErrorType, ExecutionResult, TestResult};
use crate::io::config::AgentConfig;
use crate::io::generator::{GenerationConfig, Generator};
use crate::io::harness::TestHarness;
use crate::io::sandbox::Sandbox;
use crate::io::store::{StoreError, TaskStore};

/// How the iterations ended.
#[derive(Debug)]
enum Outcome {
    Passed(String),
    Exhausted,
    /// The stored status left IN_PROGRESS underneath the loop.
    Preempted,
}

/// Drives tasks from PENDING to a terminal status.
pub struct AgentLoop {
    store: Arc<dyn TaskStore>,
    generator: Arc<dyn Generator>,
    sandbox: Arc<dyn Sandbox>,
    harness: TestHarness<Arc<dyn Sandbox>>,
    safety: SafetyGate,
    reflection: Arc<dyn ReflectionPolicy>,
    prompts: PromptBuilder,
    sampling: GenerationConfig,
}

impl AgentLoop {
    pub fn new(
        store: Arc<dyn TaskStore>,
        generator: Arc<dyn Generator>,
        sandbox: Arc<dyn Sandbox>,
        config: &AgentConfig,
    ) -> Self {
        Self {
            store,
            generator,
            harness: TestHarness::new(Arc::clone(&sandbox)),
            sandbox,
            safety: SafetyGate::new(config.safety.loop_window),
            reflection: Arc::new(RuleBasedReflection::new(config.prompt_budget_bytes)),
            prompts: PromptBuilder::new(config.prompt_budget_bytes),
            sampling: config.generator.sampling(),
        }
    }

    /// Replace the default rule-based reflection policy.
    pub fn with_reflection(mut self, reflection: Arc<dyn ReflectionPolicy>) -> Self {
        self.reflection = reflection;
        self
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    /// Run a PENDING task to completion and return its final status.
    ///
    /// Failures inside the loop are recorded on the task as FAILED with
    /// `Internal error: ...`. An `Err` is returned only when the task cannot
    /// be read or its final status cannot be written.
    #[instrument(skip_all, fields(task_id = %task_id))]
    pub fn process_task(&self, task_id: &str) -> Result<TaskStatus, StoreError> {
        let mut task = self.store.get(task_id)?;
        if task.status != TaskStatus::Pending {
            warn!(status = %task.status, "task is not pending, skipping");
            return Ok(task.status);
        }

        task.status = TaskStatus::InProgress;
        task.started_at = Some(Utc::now());
        if !self.store.update_if_status(&task, TaskStatus::Pending)? {
            info!("task left PENDING before it started");
            return Ok(self.store.get(task_id)?.status);
        }
        info!(max_iterations = task.max_iterations, "task started");

        let outcome = self.run_iterations(&mut task);
        match outcome {
            Ok(Outcome::Passed(code)) => {
                task.status = TaskStatus::Completed;
                task.generated_code = Some(code);
            }
            Ok(Outcome::Exhausted) => {
                task.status = TaskStatus::Failed;
                task.error_message = Some(format!(
                    "Failed after {} iterations",
                    task.max_iterations
                ));
            }
            Ok(Outcome::Preempted) => return self.preempted(task_id),
            Err(err) => {
                error!(err = %format!("{err:#}"), "task failed with internal error");
                task.status = TaskStatus::Failed;
                task.error_message = Some(format!("Internal error: {err:#}"));
            }
        }
        task.completed_at = Some(Utc::now());

        if !self.store.update_if_status(&task, TaskStatus::InProgress)? {
            return self.preempted(task_id);
        }
        info!(
            status = %task.status,
            iterations = task.current_iteration,
            "task finished"
        );
        Ok(task.status)
    }

    fn preempted(&self, task_id: &str) -> Result<TaskStatus, StoreError> {
        let status = self.store.get(task_id)?.status;
        info!(status = %status, "task status changed during processing, stopping");
        Ok(status)
    }

    fn run_iterations(&self, task: &mut Task) -> Result<Outcome> {
        let mut prompt = self.prompts.build_generate(&GenerateInputs {
            language: &task.language,
            goal: &task.goal,
            description: task.description.as_deref(),
            test_cases: &task.test_cases,
        })?;

        for iteration in 0..task.max_iterations {
            task.current_iteration = iteration + 1;
            if !self.store.update_if_status(task, TaskStatus::InProgress)? {
                return Ok(Outcome::Preempted);
            }
            info!(iteration = task.current_iteration, "starting iteration");

            let code = match self.generator.generate(&prompt, &self.sampling) {
                Ok(code) => code,
                Err(err) => {
                    warn!(iteration = task.current_iteration, err = %err, "generation failed");
                    continue;
                }
            };

            let verdict = self.safety.check(&code);
            if !verdict.is_safe() {
                let summary = verdict.summary();
                warn!(iteration = task.current_iteration, violations = %summary, "unsafe candidate");
                let mut attempt = Attempt::new(&task.id, iteration, &code);
                attempt.error_type = Some(ErrorType::SafetyViolation);
                attempt.error_message = Some(summary.clone());
                attempt.reflection_analysis = Some(summary.clone());
                self.store.append_attempt(&attempt)?;
                prompt.push_str(&format!("\n\nIMPORTANT: Do NOT use: {summary}"));
                continue;
            }

            let execution = self.sandbox.execute(&code);
            let tests = self.harness.run(&code, &task.test_cases);
            let mut attempt = Attempt::new(&task.id, iteration, &code);
            attempt.test_output = Some(captured_stdout(&execution, &tests).to_string());
            attempt.execution_time_ms = Some(execution.execution_time_ms);

            if tests.all_passed() {
                attempt.test_passed = true;
                self.store.append_attempt(&attempt)?;
                info!(iteration = task.current_iteration, "all tests passed");
                return Ok(Outcome::Passed(code));
            }

            let history = self.store.attempts(&task.id)?;
            let reflection = self.reflection.reflect(&ReflectionInput {
                source: &code,
                execution: &execution,
                tests: &tests,
                goal: &task.goal,
                language: &task.language,
                test_cases: &task.test_cases,
                history: &history,
            });
            info!(
                iteration = task.current_iteration,
                error_type = %reflection.error_type,
                summary = %tests.summary(),
                "iteration failed"
            );
            attempt.error_type = Some(reflection.error_type);
            attempt.error_message = Some(failure_message(&execution, &tests));
            attempt.reflection_analysis = Some(reflection.analysis);
            attempt.root_cause = Some(reflection.root_cause);
            attempt.suggested_fix = Some(reflection.suggested_fix);
            self.store.append_attempt(&attempt)?;
            debug!(prompt_bytes = reflection.enhanced_prompt.len(), "prompt rewritten");
            prompt = reflection.enhanced_prompt;
        }

        Ok(Outcome::Exhausted)
    }
}

/// Stdout of the driver run when there was one, else of the direct run.
fn captured_stdout<'a>(execution: &'a ExecutionResult, tests: &'a TestResult) -> &'a str {
    tests
        .execution
        .as_ref()
        .map_or(execution.stdout.as_str(), |e| e.stdout.as_str())
}

fn failure_message(execution: &ExecutionResult, tests: &TestResult) -> String {
    let summary = tests.failure_summary.trim();
    if summary.is_empty() {
        return execution.error_message();
    }
    summary.to_string()
}

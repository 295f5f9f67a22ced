//! Task lifecycle entry points: create, inspect, cancel.

use std::sync::Arc;

use anyhow::{Result, bail};
use chrono::Utc;
use tracing::{error, info, instrument};

use crate::agent_loop::AgentLoop;
use crate::core::task::{Attempt, Task, TaskRequest, TaskStatus};
use crate::io::store::{StoreError, TaskStore};
use crate::pool::{Submission, WorkerPool};

pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Creates tasks and hands each one to the pool exactly once, after its
/// record has been written.
pub struct TaskService {
    store: Arc<dyn TaskStore>,
    agent: Arc<AgentLoop>,
    pool: WorkerPool,
    default_max_iterations: u32,
}

impl TaskService {
    pub fn new(agent: AgentLoop, pool: WorkerPool, default_max_iterations: u32) -> Self {
        Self {
            store: Arc::clone(agent.store()),
            agent: Arc::new(agent),
            pool,
            default_max_iterations,
        }
    }

    /// Validate, persist and submit a new task.
    #[instrument(skip_all)]
    pub fn create_task(&self, request: &TaskRequest) -> Result<Task> {
        let errors = request.validate();
        if !errors.is_empty() {
            bail!("invalid task request: {}", errors.join("; "));
        }
        let task = Task::from_request(request, self.default_max_iterations);
        self.store.create(&task)?;
        info!(task_id = %task.id, "task created");
        let submission = self.submit(&task.id);
        info!(task_id = %task.id, ?submission, "task submitted");
        Ok(task)
    }

    fn submit(&self, task_id: &str) -> Submission {
        let agent = Arc::clone(&self.agent);
        let task_id = task_id.to_string();
        self.pool.submit(move || {
            if let Err(err) = agent.process_task(&task_id) {
                error!(task_id = %task_id, err = %err, "task processing failed");
            }
        })
    }

    pub fn get_task(&self, id: &str) -> Result<Task, StoreError> {
        self.store.get(id)
    }

    pub fn list_tasks(
        &self,
        status: Option<TaskStatus>,
        page: usize,
        size: usize,
    ) -> Result<Vec<Task>, StoreError> {
        self.store.list_by_status(status, page, size)
    }

    pub fn attempts(&self, id: &str) -> Result<Vec<Attempt>, StoreError> {
        self.store.attempts(id)
    }

    /// Cancel a PENDING or IN_PROGRESS task. A running loop notices at its
    /// next iteration boundary.
    pub fn cancel_task(&self, id: &str) -> Result<Task> {
        cancel_task(self.store.as_ref(), id)
    }

    /// Stop accepting work and wait for running tasks to finish.
    pub fn shutdown(mut self) {
        self.pool.shutdown();
    }
}

/// Cancel through the store directly; used by the CLI without a running pool.
pub fn cancel_task(store: &dyn TaskStore, id: &str) -> Result<Task> {
    loop {
        let mut task = store.get(id)?;
        let expected = task.status;
        if expected.is_terminal() {
            bail!("task {id} is already {expected}");
        }
        task.status = TaskStatus::Cancelled;
        task.completed_at = Some(Utc::now());
        if store.update_if_status(&task, expected)? {
            info!(task_id = %id, from = %expected, "task cancelled");
            return Ok(task);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::{AgentConfig, PoolConfig};
    use crate::io::store::MemoryTaskStore;
    use crate::test_support::{ScriptedGenerator, ScriptedSandbox, passing_run};

    const EVEN: &str = "public class Solution { public boolean isEven(int n) { return n % 2 == 0; } }";

    fn service(generator: ScriptedGenerator, sandbox: ScriptedSandbox) -> TaskService {
        let config = AgentConfig::default();
        let store: Arc<dyn TaskStore> = Arc::new(MemoryTaskStore::new());
        let agent = AgentLoop::new(store, Arc::new(generator), Arc::new(sandbox), &config);
        let pool = WorkerPool::new(&PoolConfig {
            core_workers: 1,
            max_workers: 1,
            queue_capacity: 4,
            keep_alive_secs: 1,
        })
        .expect("pool");
        TaskService::new(agent, pool, config.max_iterations)
    }

    #[test]
    fn invalid_request_is_rejected_before_storage() {
        let svc = service(ScriptedGenerator::new(vec![]), ScriptedSandbox::new(vec![]));
        let err = svc
            .create_task(&TaskRequest::new(" ", vec![]))
            .expect_err("invalid");
        assert!(err.to_string().contains("goal is required"));
        assert!(svc.list_tasks(None, 0, 10).expect("list").is_empty());
    }

    #[test]
    fn created_task_is_processed_by_the_pool() {
        let svc = service(
            ScriptedGenerator::new(vec![Ok(EVEN.to_string())]),
            ScriptedSandbox::new(vec![passing_run(""), passing_run("true\n")]),
        );
        let task = svc
            .create_task(&TaskRequest::new("even", vec!["2 -> true".to_string()]))
            .expect("create");
        assert_eq!(task.status, TaskStatus::Pending);

        let store = Arc::clone(&svc.store);
        svc.shutdown();
        let done = store.get(&task.id).expect("get");
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.current_iteration, 1);
    }

    #[test]
    fn cancel_rejects_terminal_tasks() {
        let store = MemoryTaskStore::new();
        let task = Task::from_request(&TaskRequest::new("g", vec!["1 -> 1".to_string()]), 3);
        store.create(&task).expect("create");

        let cancelled = cancel_task(&store, &task.id).expect("cancel");
        assert_eq!(cancelled.status, TaskStatus::Cancelled);
        assert!(cancelled.completed_at.is_some());
        let err = cancel_task(&store, &task.id).expect_err("already cancelled");
        assert!(err.to_string().contains("already CANCELLED"));
    }
}

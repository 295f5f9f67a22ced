//! Durable task and attempt records.
//!
//! Tasks are keyed by id; attempts are appended under their task id and are
//! never rewritten. Status writes are checked against
//! [`TaskStatus::can_transition_to`], so a terminal task cannot be reopened.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::Context;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::core::task::{Attempt, Task, TaskStatus};
use crate::io::atomic::write_json_atomic;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("task {0} not found")]
    NotFound(String),

    #[error("task {0} already exists")]
    AlreadyExists(String),

    #[error("task {id}: invalid status transition {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("task {task_id}: attempt for iteration {iteration} already recorded")]
    DuplicateAttempt { task_id: String, iteration: u32 },

    #[error("storage failure: {0:#}")]
    Backend(anyhow::Error),
}

impl From<anyhow::Error> for StoreError {
    fn from(err: anyhow::Error) -> Self {
        StoreError::Backend(err)
    }
}

/// Shared persistence for tasks and attempts. Implementations are internally
/// synchronized and safe to share across workers.
pub trait TaskStore: Send + Sync {
    fn create(&self, task: &Task) -> Result<(), StoreError>;

    fn get(&self, id: &str) -> Result<Task, StoreError>;

    /// Replace the stored task. Fails if the status change is not allowed.
    fn update(&self, task: &Task) -> Result<(), StoreError>;

    /// Replace the stored task only if its current status is `expected`.
    ///
    /// Returns `Ok(false)` without writing when the status differs.
    fn update_if_status(&self, task: &Task, expected: TaskStatus) -> Result<bool, StoreError>;

    /// Tasks newest first, optionally filtered by status. `page` is zero-based.
    fn list_by_status(
        &self,
        status: Option<TaskStatus>,
        page: usize,
        size: usize,
    ) -> Result<Vec<Task>, StoreError>;

    /// Rejects a second attempt with the same iteration number.
    fn append_attempt(&self, attempt: &Attempt) -> Result<(), StoreError>;

    /// Attempts for a task ordered by iteration number.
    fn attempts(&self, task_id: &str) -> Result<Vec<Attempt>, StoreError>;
}

fn check_transition(current: &Task, next: &Task) -> Result<(), StoreError> {
    if current.status.can_transition_to(next.status) {
        return Ok(());
    }
    Err(StoreError::InvalidTransition {
        id: next.id.clone(),
        from: current.status,
        to: next.status,
    })
}

fn paginate(mut tasks: Vec<Task>, status: Option<TaskStatus>, page: usize, size: usize) -> Vec<Task> {
    tasks.retain(|t| status.is_none_or(|s| t.status == s));
    tasks.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    tasks
        .into_iter()
        .skip(page.saturating_mul(size))
        .take(size)
        .collect()
}

#[derive(Debug, Default)]
struct Arena {
    tasks: HashMap<String, Task>,
    attempts: HashMap<String, Vec<Attempt>>,
}

/// In-process store; contents are lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    arena: Mutex<Arena>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Arena> {
        self.arena.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TaskStore for MemoryTaskStore {
    fn create(&self, task: &Task) -> Result<(), StoreError> {
        let mut arena = self.lock();
        if arena.tasks.contains_key(&task.id) {
            return Err(StoreError::AlreadyExists(task.id.clone()));
        }
        arena.tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Task, StoreError> {
        self.lock()
            .tasks
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn update(&self, task: &Task) -> Result<(), StoreError> {
        let mut arena = self.lock();
        let current = arena
            .tasks
            .get_mut(&task.id)
            .ok_or_else(|| StoreError::NotFound(task.id.clone()))?;
        check_transition(current, task)?;
        *current = task.clone();
        Ok(())
    }

    fn update_if_status(&self, task: &Task, expected: TaskStatus) -> Result<bool, StoreError> {
        let mut arena = self.lock();
        let current = arena
            .tasks
            .get_mut(&task.id)
            .ok_or_else(|| StoreError::NotFound(task.id.clone()))?;
        if current.status != expected {
            return Ok(false);
        }
        check_transition(current, task)?;
        *current = task.clone();
        Ok(true)
    }

    fn list_by_status(
        &self,
        status: Option<TaskStatus>,
        page: usize,
        size: usize,
    ) -> Result<Vec<Task>, StoreError> {
        let tasks = self.lock().tasks.values().cloned().collect();
        Ok(paginate(tasks, status, page, size))
    }

    fn append_attempt(&self, attempt: &Attempt) -> Result<(), StoreError> {
        let mut arena = self.lock();
        if !arena.tasks.contains_key(&attempt.task_id) {
            return Err(StoreError::NotFound(attempt.task_id.clone()));
        }
        let attempts = arena.attempts.entry(attempt.task_id.clone()).or_default();
        if attempts
            .iter()
            .any(|a| a.iteration_number == attempt.iteration_number)
        {
            return Err(StoreError::DuplicateAttempt {
                task_id: attempt.task_id.clone(),
                iteration: attempt.iteration_number,
            });
        }
        attempts.push(attempt.clone());
        attempts.sort_by_key(|a| a.iteration_number);
        Ok(())
    }

    fn attempts(&self, task_id: &str) -> Result<Vec<Attempt>, StoreError> {
        let arena = self.lock();
        if !arena.tasks.contains_key(task_id) {
            return Err(StoreError::NotFound(task_id.to_string()));
        }
        Ok(arena.attempts.get(task_id).cloned().unwrap_or_default())
    }
}

/// JSON files under `<root>/tasks/<id>/task.json` and
/// `<root>/tasks/<id>/attempts/<iteration>.json`.
///
/// Writes are atomic (temp file + rename). The in-process lock serializes
/// read-modify-write sequences; separate processes sharing a root are not
/// coordinated.
#[derive(Debug)]
pub struct FileTaskStore {
    root: PathBuf,
    lock: Mutex<()>,
}

impl FileTaskStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        let tasks_dir = root.join("tasks");
        fs::create_dir_all(&tasks_dir)
            .with_context(|| format!("create task store {}", tasks_dir.display()))?;
        Ok(Self {
            root,
            lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Only UUID-shaped ids map to paths; anything else cannot exist.
    fn task_dir(&self, id: &str) -> Result<PathBuf, StoreError> {
        if Uuid::parse_str(id).is_err() {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(self.root.join("tasks").join(id))
    }

    fn task_path(&self, id: &str) -> Result<PathBuf, StoreError> {
        Ok(self.task_dir(id)?.join("task.json"))
    }

    fn attempt_path(&self, task_id: &str, iteration: u32) -> Result<PathBuf, StoreError> {
        Ok(self
            .task_dir(task_id)?
            .join("attempts")
            .join(format!("{iteration:04}.json")))
    }

    fn read_task(&self, id: &str) -> Result<Task, StoreError> {
        let path = self.task_path(id)?;
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound(id.to_string()));
            }
            Err(e) => {
                return Err(anyhow::Error::new(e)
                    .context(format!("read {}", path.display()))
                    .into());
            }
        };
        let task = serde_json::from_str(&contents)
            .with_context(|| format!("parse {}", path.display()))?;
        Ok(task)
    }

    fn write_task(&self, task: &Task) -> Result<(), StoreError> {
        let path = self.task_path(&task.id)?;
        write_json_atomic(&path, task)?;
        debug!(task_id = %task.id, status = %task.status, "wrote task");
        Ok(())
    }
}

impl TaskStore for FileTaskStore {
    fn create(&self, task: &Task) -> Result<(), StoreError> {
        let _guard = self.guard();
        if self.task_path(&task.id)?.exists() {
            return Err(StoreError::AlreadyExists(task.id.clone()));
        }
        self.write_task(task)
    }

    fn get(&self, id: &str) -> Result<Task, StoreError> {
        let _guard = self.guard();
        self.read_task(id)
    }

    fn update(&self, task: &Task) -> Result<(), StoreError> {
        let _guard = self.guard();
        let current = self.read_task(&task.id)?;
        check_transition(&current, task)?;
        self.write_task(task)
    }

    fn update_if_status(&self, task: &Task, expected: TaskStatus) -> Result<bool, StoreError> {
        let _guard = self.guard();
        let current = self.read_task(&task.id)?;
        if current.status != expected {
            return Ok(false);
        }
        check_transition(&current, task)?;
        self.write_task(task)?;
        Ok(true)
    }

    fn list_by_status(
        &self,
        status: Option<TaskStatus>,
        page: usize,
        size: usize,
    ) -> Result<Vec<Task>, StoreError> {
        let _guard = self.guard();
        let tasks_dir = self.root.join("tasks");
        let entries = fs::read_dir(&tasks_dir)
            .with_context(|| format!("read {}", tasks_dir.display()))?;
        let mut tasks = Vec::new();
        for entry in entries {
            let entry = entry.with_context(|| format!("read {}", tasks_dir.display()))?;
            let Some(id) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            match self.read_task(&id) {
                Ok(task) => tasks.push(task),
                Err(StoreError::NotFound(_)) => {
                    warn!(entry = %id, "skipping task directory without a task record");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(paginate(tasks, status, page, size))
    }

    fn append_attempt(&self, attempt: &Attempt) -> Result<(), StoreError> {
        let _guard = self.guard();
        self.read_task(&attempt.task_id)?;
        let path = self.attempt_path(&attempt.task_id, attempt.iteration_number)?;
        if path.exists() {
            return Err(StoreError::DuplicateAttempt {
                task_id: attempt.task_id.clone(),
                iteration: attempt.iteration_number,
            });
        }
        write_json_atomic(&path, attempt)?;
        debug!(
            task_id = %attempt.task_id,
            iteration = attempt.iteration_number,
            "wrote attempt"
        );
        Ok(())
    }

    fn attempts(&self, task_id: &str) -> Result<Vec<Attempt>, StoreError> {
        let _guard = self.guard();
        self.read_task(task_id)?;
        let dir = self.task_dir(task_id)?.join("attempts");
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut attempts = Vec::new();
        for entry in fs::read_dir(&dir).with_context(|| format!("read {}", dir.display()))? {
            let path = entry
                .with_context(|| format!("read {}", dir.display()))?
                .path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("read {}", path.display()))?;
            let attempt: Attempt = serde_json::from_str(&contents)
                .with_context(|| format!("parse {}", path.display()))?;
            attempts.push(attempt);
        }
        attempts.sort_by_key(|a| a.iteration_number);
        Ok(attempts)
    }
}

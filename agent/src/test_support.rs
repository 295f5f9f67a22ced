//! Scripted fakes and fixtures for tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use crate::core::types::ExecutionResult;
use crate::io::generator::{GenerationConfig, GenerationError, Generator};
use crate::io::sandbox::{Sandbox, Toolchain};

/// Generator that replays a fixed script and records every prompt it sees.
///
/// `Err(message)` entries become [`GenerationError::Failed`]. Once the script
/// runs out every call fails.
pub struct ScriptedGenerator {
    script: Mutex<VecDeque<Result<String, String>>>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl ScriptedGenerator {
    pub fn new(script: Vec<Result<String, String>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Always returns the same candidate.
    pub fn repeating(code: &str, times: usize) -> Self {
        Self::new(vec![Ok(code.to_string()); times])
    }

    pub fn prompts_handle(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.prompts)
    }
}

impl Generator for ScriptedGenerator {
    fn generate(&self, prompt: &str, _config: &GenerationConfig) -> Result<String, GenerationError> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(prompt.to_string());
        let next = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        match next {
            Some(Ok(code)) => Ok(code),
            Some(Err(message)) => Err(GenerationError::Failed {
                code: None,
                stderr: message,
            }),
            None => Err(GenerationError::Empty),
        }
    }
}

type Responder = Box<dyn Fn(&str) -> ExecutionResult + Send + Sync>;

/// Sandbox that answers from a script and records submitted sources.
pub struct ScriptedSandbox {
    responder: Responder,
    sources: Mutex<Vec<String>>,
}

impl ScriptedSandbox {
    /// Replays `results` in order, then keeps returning the last one. An
    /// empty script answers every call with a compilation failure.
    pub fn new(results: Vec<ExecutionResult>) -> Self {
        let queue = Mutex::new(VecDeque::from(results));
        let last = Mutex::new(None::<ExecutionResult>);
        Self::from_fn(move |_| {
            let mut queue = queue.lock().unwrap_or_else(PoisonError::into_inner);
            let mut last = last.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(next) = queue.pop_front() {
                *last = Some(next);
            }
            last.clone().unwrap_or_else(|| ExecutionResult {
                stderr: "scripted sandbox has no results".to_string(),
                exit_code: Some(1),
                ..ExecutionResult::default()
            })
        })
    }

    pub fn from_fn(f: impl Fn(&str) -> ExecutionResult + Send + Sync + 'static) -> Self {
        Self {
            responder: Box::new(f),
            sources: Mutex::new(Vec::new()),
        }
    }

    pub fn sources(&self) -> Vec<String> {
        self.sources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Sandbox for ScriptedSandbox {
    fn execute(&self, source: &str) -> ExecutionResult {
        self.sources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(source.to_string());
        (self.responder)(source)
    }
}

/// Successful compile and run printing `stdout`.
pub fn passing_run(stdout: &str) -> ExecutionResult {
    ExecutionResult {
        compiled: true,
        executed: true,
        stdout: stdout.to_string(),
        exit_code: Some(0),
        ..ExecutionResult::default()
    }
}

/// Toolchain that "compiles" by copying and "runs" the copy with `sh`.
///
/// Sources are shell scripts; a `# class Name` comment satisfies the
/// structure check and names the entry type.
pub fn shell_toolchain() -> Toolchain {
    Toolchain {
        compile: vec![
            "cp".to_string(),
            "{source}".to_string(),
            "{artifact}".to_string(),
        ],
        run: vec!["sh".to_string(), "{artifact}".to_string()],
        source_extension: "sh".to_string(),
        artifact_extension: "class".to_string(),
    }
}

/// True when a JDK compiler is on PATH.
pub fn javac_available() -> bool {
    std::process::Command::new("javac")
        .arg("-version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .is_ok_and(|s| s.success())
}

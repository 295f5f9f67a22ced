//! Code generator abstraction.
//!
//! The [`Generator`] trait decouples the loop from whatever produces candidate
//! source (an LLM CLI, an HTTP client wrapper, a script). Tests use scripted
//! generators that return predetermined candidates without spawning processes.

use std::process::Command;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::core::sanitize::strip_markdown;
use crate::io::process::run_command_with_timeout;

/// Sampling parameters forwarded to the generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            temperature: 0.7,
            max_tokens: 2048,
        }
    }
}

/// A failed generation. The loop spends the iteration and moves on.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("generator command is not configured")]
    NotConfigured,

    #[error("failed to run generator: {0:#}")]
    Process(anyhow::Error),

    #[error("generator timed out after {0:?}")]
    TimedOut(Duration),

    #[error("generator exited with code {code:?}: {stderr}")]
    Failed { code: Option<i32>, stderr: String },

    #[error("generator returned no code")]
    Empty,
}

pub trait Generator: Send + Sync {
    fn generate(&self, prompt: &str, config: &GenerationConfig) -> Result<String, GenerationError>;
}

/// Generator that spawns an external command.
///
/// The prompt is written to stdin; sampling parameters are passed as
/// `AGENT_MODEL`, `AGENT_TEMPERATURE` and `AGENT_MAX_TOKENS`. Code is taken
/// from the first fenced block in stdout, or the whole stdout if unfenced.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    command: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandGenerator {
    pub fn new(command: Vec<String>, timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            command,
            timeout,
            output_limit_bytes,
        }
    }
}

impl Generator for CommandGenerator {
    #[instrument(skip_all, fields(timeout_secs = self.timeout.as_secs(), prompt_bytes = prompt.len()))]
    fn generate(&self, prompt: &str, config: &GenerationConfig) -> Result<String, GenerationError> {
        let Some((program, args)) = self.command.split_first() else {
            return Err(GenerationError::NotConfigured);
        };
        info!(program = %program, model = %config.model, "invoking generator");

        let mut cmd = Command::new(program);
        cmd.args(args)
            .env("AGENT_MODEL", &config.model)
            .env("AGENT_TEMPERATURE", config.temperature.to_string())
            .env("AGENT_MAX_TOKENS", config.max_tokens.to_string());

        let output = run_command_with_timeout(
            cmd,
            Some(prompt.as_bytes()),
            self.timeout,
            self.output_limit_bytes,
        )
        .map_err(GenerationError::Process)?;

        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "generator timed out");
            return Err(GenerationError::TimedOut(self.timeout));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.exit_code(), "generator failed");
            return Err(GenerationError::Failed {
                code: output.exit_code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let code = strip_markdown(&String::from_utf8_lossy(&output.stdout));
        if code.is_empty() {
            return Err(GenerationError::Empty);
        }
        debug!(code_bytes = code.len(), "generator returned code");
        Ok(code)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandGenerator {
        CommandGenerator::new(
            vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            Duration::from_secs(5),
            10_000,
        )
    }

    #[test]
    fn extracts_fenced_code_from_stdout() {
        let generator = sh("cat >/dev/null; printf 'Sure:\\n```java\\nclass A {}\\n```\\n'");
        let code = generator
            .generate("prompt", &GenerationConfig::default())
            .expect("generate");
        assert_eq!(code, "class A {}");
    }

    #[test]
    fn passes_prompt_and_parameters() {
        let generator = sh("read p; echo \"$p $AGENT_MODEL $AGENT_TEMPERATURE $AGENT_MAX_TOKENS\"");
        let config = GenerationConfig {
            model: "m1".to_string(),
            temperature: 0.5,
            max_tokens: 64,
        };
        let out = generator.generate("hello\n", &config).expect("generate");
        assert_eq!(out, "hello m1 0.5 64");
    }

    #[test]
    fn failures_are_typed() {
        let config = GenerationConfig::default();
        assert!(matches!(
            sh("echo bad >&2; exit 2").generate("p", &config),
            Err(GenerationError::Failed { code: Some(2), .. })
        ));
        assert!(matches!(
            sh("cat >/dev/null").generate("p", &config),
            Err(GenerationError::Empty)
        ));
        assert!(matches!(
            CommandGenerator::new(Vec::new(), Duration::from_secs(1), 10).generate("p", &config),
            Err(GenerationError::NotConfigured)
        ));
    }
}

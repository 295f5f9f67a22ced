//! Agent configuration stored as TOML.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::prompt::DEFAULT_PROMPT_BUDGET_BYTES;
use crate::core::safety::DEFAULT_LOOP_WINDOW;
use crate::core::task::{DEFAULT_MAX_ITERATIONS, MAX_ITERATIONS_LIMIT};
use crate::io::atomic::write_atomic;
use crate::io::generator::GenerationConfig;
use crate::io::sandbox::{DEFAULT_TIMEOUT_SECS, Toolchain};

/// Agent configuration (TOML).
///
/// Loaded once and passed to every component. Missing fields take their
/// defaults, so an empty file is a valid configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    /// `max_iterations` for tasks that do not specify one.
    pub max_iterations: u32,

    /// Bound on captured stdout/stderr per stream, per process.
    pub output_limit_bytes: usize,

    /// Byte budget for generated prompts.
    pub prompt_budget_bytes: usize,

    /// Base directory for per-execution sandbox workspaces.
    pub workspace_dir: PathBuf,

    pub sandbox: SandboxConfig,
    pub safety: SafetyConfig,
    pub generator: GeneratorConfig,
    pub pool: PoolConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SandboxConfig {
    /// Wall-clock limit applied separately to compile and run.
    pub timeout_secs: u64,
    pub toolchain: Toolchain,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            toolchain: Toolchain::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SafetyConfig {
    /// Lines after an infinite-loop header searched for `break`/`return`.
    pub loop_window: usize,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            loop_window: DEFAULT_LOOP_WINDOW,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Command to execute for generation (e.g. `["llm","-m","gpt-4o"]`).
    /// The prompt is written to its stdin.
    pub command: Vec<String>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        let sampling = GenerationConfig::default();
        Self {
            command: Vec::new(),
            model: sampling.model,
            temperature: sampling.temperature,
            max_tokens: sampling.max_tokens,
            timeout_secs: 120,
        }
    }
}

impl GeneratorConfig {
    pub fn sampling(&self) -> GenerationConfig {
        GenerationConfig {
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PoolConfig {
    pub core_workers: usize,
    pub max_workers: usize,
    pub queue_capacity: usize,
    /// Idle time after which workers above `core_workers` exit.
    pub keep_alive_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            core_workers: 5,
            max_workers: 10,
            queue_capacity: 100,
            keep_alive_secs: 60,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            output_limit_bytes: 100_000,
            prompt_budget_bytes: DEFAULT_PROMPT_BUDGET_BYTES,
            workspace_dir: std::env::temp_dir().join("agent"),
            sandbox: SandboxConfig::default(),
            safety: SafetyConfig::default(),
            generator: GeneratorConfig::default(),
            pool: PoolConfig::default(),
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_ITERATIONS_LIMIT).contains(&self.max_iterations) {
            return Err(anyhow!(
                "max_iterations must be in 1..={MAX_ITERATIONS_LIMIT}"
            ));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.prompt_budget_bytes == 0 {
            return Err(anyhow!("prompt_budget_bytes must be > 0"));
        }
        if self.workspace_dir.as_os_str().is_empty() {
            return Err(anyhow!("workspace_dir must not be empty"));
        }
        if self.sandbox.timeout_secs == 0 {
            return Err(anyhow!("sandbox.timeout_secs must be > 0"));
        }
        self.sandbox.toolchain.validate()?;
        if self.safety.loop_window == 0 {
            return Err(anyhow!("safety.loop_window must be > 0"));
        }
        if self.generator.timeout_secs == 0 {
            return Err(anyhow!("generator.timeout_secs must be > 0"));
        }
        if !(0.0..=2.0).contains(&self.generator.temperature) {
            return Err(anyhow!("generator.temperature must be in 0.0..=2.0"));
        }
        if self.pool.core_workers == 0 {
            return Err(anyhow!("pool.core_workers must be > 0"));
        }
        if self.pool.max_workers < self.pool.core_workers {
            return Err(anyhow!("pool.max_workers must be >= pool.core_workers"));
        }
        if self.pool.queue_capacity == 0 {
            return Err(anyhow!("pool.queue_capacity must be > 0"));
        }
        Ok(())
    }

    pub fn sandbox_timeout(&self) -> Duration {
        Duration::from_secs(self.sandbox.timeout_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AgentConfig::default()`.
pub fn load_config(path: &Path) -> Result<AgentConfig> {
    if !path.exists() {
        let cfg = AgentConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AgentConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &AgentConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

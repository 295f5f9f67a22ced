//! Compile-then-run execution of a candidate in a throwaway workspace.
//!
//! Every call gets its own directory under the configured base, named
//! `<entry>-<timestamp>-<random>`. The directory is removed before
//! [`Sandbox::execute`] returns, on every path.
//!
//! This is process isolation only: the child runs with the agent's own
//! privileges. The safety screen in front of it is a denylist, not a
//! security boundary.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use rand::{Rng, distributions::Alphanumeric};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use crate::core::sanitize::{extract_entry_type, sanitize};
use crate::core::types::ExecutionResult;
use crate::io::process::{CommandOutput, run_command_with_timeout};

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Executes a candidate source and reports what happened. Never fails:
/// infrastructure problems surface as an unsuccessful [`ExecutionResult`].
pub trait Sandbox: Send + Sync {
    fn execute(&self, source: &str) -> ExecutionResult;
}

impl<S: Sandbox + ?Sized> Sandbox for Arc<S> {
    fn execute(&self, source: &str) -> ExecutionResult {
        (**self).execute(source)
    }
}

impl<S: Sandbox + ?Sized> Sandbox for &S {
    fn execute(&self, source: &str) -> ExecutionResult {
        (**self).execute(source)
    }
}

/// Compiler and runner invocations.
///
/// Arguments may contain `{source}` (source file name), `{entry}` (entry type
/// name) and `{artifact}` (expected compiler output file name). Commands run
/// with the workspace as their working directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Toolchain {
    pub compile: Vec<String>,
    pub run: Vec<String>,
    pub source_extension: String,
    pub artifact_extension: String,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self {
            compile: vec!["javac".to_string(), "{source}".to_string()],
            run: vec!["java".to_string(), "{entry}".to_string()],
            source_extension: "java".to_string(),
            artifact_extension: "class".to_string(),
        }
    }
}

impl Toolchain {
    pub fn validate(&self) -> Result<()> {
        if self.compile.first().is_none_or(|p| p.trim().is_empty()) {
            bail!("sandbox.toolchain.compile must be a non-empty array");
        }
        if self.run.first().is_none_or(|p| p.trim().is_empty()) {
            bail!("sandbox.toolchain.run must be a non-empty array");
        }
        if self.source_extension.trim().is_empty() || self.artifact_extension.trim().is_empty() {
            bail!("sandbox.toolchain extensions must be non-empty");
        }
        Ok(())
    }

    fn source_file(&self, entry: &str) -> String {
        format!("{entry}.{}", self.source_extension)
    }

    fn artifact_file(&self, entry: &str) -> String {
        format!("{entry}.{}", self.artifact_extension)
    }

    fn command(&self, template: &[String], entry: &str, workdir: &Path) -> Result<Command> {
        let Some((program, args)) = template.split_first() else {
            bail!("empty command template");
        };
        let source = self.source_file(entry);
        let artifact = self.artifact_file(entry);
        let expand = |arg: &str| {
            arg.replace("{source}", &source)
                .replace("{artifact}", &artifact)
                .replace("{entry}", entry)
        };
        let mut cmd = Command::new(expand(program));
        cmd.args(args.iter().map(|a| expand(a))).current_dir(workdir);
        Ok(cmd)
    }
}

/// Process-based sandbox driven by a [`Toolchain`].
#[derive(Debug, Clone)]
pub struct SandboxRunner {
    toolchain: Toolchain,
    workspace_dir: PathBuf,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl SandboxRunner {
    pub fn new(
        toolchain: Toolchain,
        workspace_dir: impl Into<PathBuf>,
        timeout: Duration,
        output_limit_bytes: usize,
    ) -> Self {
        Self {
            toolchain,
            workspace_dir: workspace_dir.into(),
            timeout,
            output_limit_bytes,
        }
    }

    pub fn workspace_dir(&self) -> &Path {
        &self.workspace_dir
    }

    fn run_step(&self, template: &[String], entry: &str, workdir: &Path) -> Result<CommandOutput> {
        let cmd = self.toolchain.command(template, entry, workdir)?;
        run_command_with_timeout(cmd, None, self.timeout, self.output_limit_bytes)
    }

    fn compile_and_run(&self, code: &str, entry: &str) -> Result<ExecutionResult> {
        let workspace = Workspace::create(&self.workspace_dir, entry)?;
        let source_path = workspace.root().join(self.toolchain.source_file(entry));
        fs::write(&source_path, code)
            .with_context(|| format!("write source {}", source_path.display()))?;

        let compile = self
            .run_step(&self.toolchain.compile, entry, workspace.root())
            .context("run compiler")?;
        let artifact = workspace.root().join(self.toolchain.artifact_file(entry));
        if compile.timed_out {
            return Ok(ExecutionResult {
                timed_out: true,
                stdout: compile.stdout_text("compile"),
                stderr: compile.stderr_text("compile"),
                exit_code: compile.exit_code(),
                ..ExecutionResult::default()
            });
        }
        if !compile.status.success() || !artifact.exists() {
            let mut stderr = compile.stderr_text("compile");
            if stderr.trim().is_empty() {
                stderr = compile.stdout_text("compile");
            }
            if compile.status.success() {
                if !stderr.is_empty() && !stderr.ends_with('\n') {
                    stderr.push('\n');
                }
                stderr.push_str(&format!(
                    "compilation failed: compiler produced no {}",
                    self.toolchain.artifact_file(entry)
                ));
            }
            debug!(exit_code = ?compile.exit_code(), "compilation failed");
            return Ok(ExecutionResult {
                stderr,
                exit_code: compile.exit_code(),
                ..ExecutionResult::default()
            });
        }

        let run = self
            .run_step(&self.toolchain.run, entry, workspace.root())
            .context("run program")?;
        Ok(ExecutionResult {
            compiled: true,
            executed: run.succeeded(),
            stdout: run.stdout_text("run"),
            stderr: run.stderr_text("run"),
            exit_code: run.exit_code(),
            timed_out: run.timed_out,
            execution_time_ms: 0,
            structural_error: false,
        })
    }
}

impl Sandbox for SandboxRunner {
    #[instrument(skip_all, fields(timeout_secs = self.timeout.as_secs()))]
    fn execute(&self, source: &str) -> ExecutionResult {
        let started = Instant::now();
        let code = match sanitize(source) {
            Ok(code) => code,
            Err(err) => {
                debug!(err = %err, "rejected malformed source");
                return ExecutionResult {
                    stderr: format!("Structural error: {err}"),
                    structural_error: true,
                    ..ExecutionResult::default()
                };
            }
        };
        let entry = extract_entry_type(&code);

        let mut result = self.compile_and_run(&code, &entry).unwrap_or_else(|err| {
            warn!(err = %format!("{err:#}"), entry = %entry, "sandbox execution failed");
            ExecutionResult {
                stderr: format!("Sandbox error: {err:#}"),
                ..ExecutionResult::default()
            }
        });
        result.execution_time_ms = started.elapsed().as_millis() as u64;
        info!(
            entry = %entry,
            compiled = result.compiled,
            executed = result.executed,
            timed_out = result.timed_out,
            elapsed_ms = result.execution_time_ms,
            "sandbox execution finished"
        );
        result
    }
}

/// Exclusively owned scratch directory, removed on drop.
struct Workspace {
    root: PathBuf,
}

impl Workspace {
    fn create(base_dir: &Path, entry: &str) -> Result<Self> {
        fs::create_dir_all(base_dir)
            .with_context(|| format!("create workspace dir {}", base_dir.display()))?;
        let timestamp = generate_timestamp();
        let mut attempts = 0;
        loop {
            let root = base_dir.join(build_workspace_name(entry, &timestamp, &generate_short_id()));
            match fs::create_dir(&root) {
                Ok(()) => {
                    debug!(workspace = %root.display(), "created workspace");
                    return Ok(Self { root });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists && attempts < 3 => attempts += 1,
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("create workspace {}", root.display()));
                }
            }
        }
    }

    fn root(&self) -> &Path {
        &self.root
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        remove_tree(&self.root);
    }
}

/// Delete a directory tree deepest entries first. Failures are logged only.
fn remove_tree(root: &Path) {
    for entry in WalkDir::new(root).contents_first(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(err = %err, workspace = %root.display(), "failed to walk workspace");
                continue;
            }
        };
        let removed = if entry.file_type().is_dir() {
            fs::remove_dir(entry.path())
        } else {
            fs::remove_file(entry.path())
        };
        if let Err(err) = removed {
            warn!(err = %err, path = %entry.path().display(), "failed to remove workspace entry");
        }
    }
}

fn build_workspace_name(entry: &str, timestamp: &str, short_id: &str) -> String {
    format!("{entry}-{timestamp}-{short_id}")
}

fn generate_timestamp() -> String {
    Utc::now().format("%Y%m%d%H%M%S%3f").to_string()
}

fn generate_short_id() -> String {
    let mut rng = rand::thread_rng();
    std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(8)
        .collect::<String>()
        .to_lowercase()
}

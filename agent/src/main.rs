//! Command-line front end for the self-correcting code-generation agent.
//!
//! Tasks and attempts are stored as JSON under the store directory
//! (`.agent/` by default); configuration is read from `agent.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use agent::agent_loop::AgentLoop;
use agent::core::safety::SafetyGate;
use agent::core::task::{TaskRequest, TaskStatus};
use agent::exit_codes;
use agent::io::config::{AgentConfig, load_config, write_config};
use agent::io::generator::CommandGenerator;
use agent::io::sandbox::{Sandbox, SandboxRunner};
use agent::io::store::{FileTaskStore, TaskStore};
use agent::logging;
use agent::pool::WorkerPool;
use agent::service::{DEFAULT_PAGE_SIZE, TaskService, cancel_task};
use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;

#[derive(Parser)]
#[command(
    name = "agent",
    version,
    about = "Self-correcting code-generation agent"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = "agent.toml")]
    config: PathBuf,

    /// Directory holding task and attempt records.
    #[arg(long, global = true, default_value = ".agent")]
    store: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a task, run it to a terminal status and print it.
    Run {
        /// What the generated code should do.
        #[arg(long)]
        goal: String,
        #[arg(long)]
        description: Option<String>,
        /// Test case such as `Input: 2, Output: true`. Repeatable.
        #[arg(long = "test")]
        tests: Vec<String>,
        /// File with one test case per line.
        #[arg(long)]
        tests_file: Option<PathBuf>,
        #[arg(long)]
        max_iterations: Option<u32>,
        #[arg(long)]
        language: Option<String>,
    },
    /// Print a task.
    Show { id: String },
    /// List tasks, newest first.
    List {
        #[arg(long)]
        status: Option<TaskStatus>,
        /// Zero-based page index.
        #[arg(long, default_value_t = 0)]
        page: usize,
        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
        size: usize,
    },
    /// Cancel a PENDING or IN_PROGRESS task.
    Cancel { id: String },
    /// Print a task's attempts in iteration order.
    Attempts { id: String },
    /// Run the safety screen over a source file.
    Check { file: PathBuf },
    /// Compile and run a source file in the sandbox.
    Exec { file: PathBuf },
    /// Write the default configuration file.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::InitConfig { force } => cmd_init_config(&cli.config, force),
        Command::Check { file } => {
            let cfg = load_config(&cli.config)?;
            cmd_check(&cfg, &file)
        }
        Command::Exec { file } => {
            let cfg = load_config(&cli.config)?;
            cmd_exec(&cfg, &file)
        }
        Command::Run {
            goal,
            description,
            tests,
            tests_file,
            max_iterations,
            language,
        } => {
            let cfg = load_config(&cli.config)?;
            let mut test_cases = tests;
            if let Some(path) = tests_file {
                test_cases.extend(read_test_file(&path)?);
            }
            let request = TaskRequest {
                goal,
                description,
                test_cases,
                language,
                max_iterations,
            };
            cmd_run(&cfg, &cli.store, &request)
        }
        Command::Show { id } => {
            let store = FileTaskStore::open(&cli.store)?;
            print_json(&store.get(&id)?)?;
            Ok(exit_codes::OK)
        }
        Command::List { status, page, size } => {
            let store = FileTaskStore::open(&cli.store)?;
            print_json(&store.list_by_status(status, page, size)?)?;
            Ok(exit_codes::OK)
        }
        Command::Cancel { id } => {
            let store = FileTaskStore::open(&cli.store)?;
            print_json(&cancel_task(&store, &id)?)?;
            Ok(exit_codes::OK)
        }
        Command::Attempts { id } => {
            let store = FileTaskStore::open(&cli.store)?;
            print_json(&store.attempts(&id)?)?;
            Ok(exit_codes::OK)
        }
    }
}

fn cmd_init_config(path: &Path, force: bool) -> Result<i32> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &AgentConfig::default())?;
    println!("{}", path.display());
    Ok(exit_codes::OK)
}

fn cmd_check(cfg: &AgentConfig, file: &Path) -> Result<i32> {
    let source = fs::read_to_string(file).with_context(|| format!("read {}", file.display()))?;
    let verdict = SafetyGate::new(cfg.safety.loop_window).check(&source);
    if verdict.is_safe() {
        println!("{}", verdict.summary());
        return Ok(exit_codes::OK);
    }
    for violation in &verdict.violations {
        println!("{violation}");
    }
    Ok(exit_codes::UNSAFE)
}

fn cmd_exec(cfg: &AgentConfig, file: &Path) -> Result<i32> {
    let source = fs::read_to_string(file).with_context(|| format!("read {}", file.display()))?;
    let result = sandbox_from_config(cfg).execute(&source);
    print_json(&result)?;
    if result.is_success() {
        Ok(exit_codes::OK)
    } else {
        Ok(exit_codes::EXEC_FAILED)
    }
}

fn cmd_run(cfg: &AgentConfig, store_dir: &Path, request: &TaskRequest) -> Result<i32> {
    if cfg.generator.command.is_empty() {
        bail!("generator.command is not configured (see `agent init-config`)");
    }
    let store: Arc<dyn TaskStore> = Arc::new(FileTaskStore::open(store_dir)?);
    let generator = CommandGenerator::new(
        cfg.generator.command.clone(),
        cfg.generator.timeout(),
        cfg.output_limit_bytes,
    );
    let agent = AgentLoop::new(
        Arc::clone(&store),
        Arc::new(generator),
        Arc::new(sandbox_from_config(cfg)),
        cfg,
    );
    let service = TaskService::new(agent, WorkerPool::new(&cfg.pool)?, cfg.max_iterations);

    let task = service.create_task(request)?;
    service.shutdown();

    let task = store.get(&task.id)?;
    print_json(&task)?;
    Ok(match task.status {
        TaskStatus::Completed => exit_codes::OK,
        TaskStatus::Cancelled => exit_codes::TASK_CANCELLED,
        _ => exit_codes::TASK_FAILED,
    })
}

fn sandbox_from_config(cfg: &AgentConfig) -> SandboxRunner {
    SandboxRunner::new(
        cfg.sandbox.toolchain.clone(),
        &cfg.workspace_dir,
        cfg.sandbox_timeout(),
        cfg.output_limit_bytes,
    )
}

fn read_test_file(path: &Path) -> Result<Vec<String>> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Serialize `value` to pretty-printed JSON on stdout.
fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize json")?;
    println!("{payload}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run_with_repeated_tests() {
        let cli = Cli::parse_from([
            "agent",
            "run",
            "--goal",
            "even",
            "--test",
            "2 -> true",
            "--test",
            "3 -> false",
            "--max-iterations",
            "3",
        ]);
        let Command::Run {
            goal,
            tests,
            max_iterations,
            ..
        } = cli.command
        else {
            panic!("expected run");
        };
        assert_eq!(goal, "even");
        assert_eq!(tests, vec!["2 -> true", "3 -> false"]);
        assert_eq!(max_iterations, Some(3));
        assert_eq!(cli.store, PathBuf::from(".agent"));
    }

    #[test]
    fn parse_list_status_and_global_options() {
        let cli = Cli::parse_from([
            "agent",
            "list",
            "--status",
            "in_progress",
            "--store",
            "/tmp/s",
        ]);
        assert!(matches!(
            cli.command,
            Command::List {
                status: Some(TaskStatus::InProgress),
                page: 0,
                size: DEFAULT_PAGE_SIZE
            }
        ));
        assert_eq!(cli.store, PathBuf::from("/tmp/s"));
    }

    #[test]
    fn parse_init_config_force() {
        let cli = Cli::parse_from(["agent", "init-config", "--force"]);
        assert!(matches!(cli.command, Command::InitConfig { force: true }));
    }

    #[test]
    fn test_file_skips_blank_and_comment_lines() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("cases.txt");
        fs::write(&path, "# even\nInput: 2, Output: true\n\n  3 -> false \n").expect("write");
        assert_eq!(
            read_test_file(&path).expect("read"),
            vec!["Input: 2, Output: true", "3 -> false"]
        );
    }
}

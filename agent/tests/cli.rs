//! CLI tests: spawn the agent binary and check exit codes and output.

use std::fs;
use std::process::{Command, Output};

use agent::core::task::{Task, TaskRequest, TaskStatus};
use agent::exit_codes;
use agent::io::store::{FileTaskStore, TaskStore};

fn agent(dir: &std::path::Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_agent"))
        .current_dir(dir)
        .args(args)
        .output()
        .expect("run agent")
}

#[test]
fn check_reports_violations_with_unsafe_exit_code() {
    let temp = tempfile::tempdir().expect("tempdir");
    let file = temp.path().join("Bad.java");
    fs::write(
        &file,
        "public class Bad { void f() throws Exception { Thread.sleep(10); System.exit(1); } }",
    )
    .expect("write");

    let output = agent(temp.path(), &["check", "Bad.java"]);
    assert_eq!(output.status.code(), Some(exit_codes::UNSAFE));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Forbidden process termination"));
    assert!(stdout.contains("Forbidden blocking sleep"));
}

#[test]
fn check_accepts_clean_source() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(
        temp.path().join("Ok.java"),
        "public class Ok { int f(int n) { return n; } }",
    )
    .expect("write");

    let output = agent(temp.path(), &["check", "Ok.java"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert!(String::from_utf8_lossy(&output.stdout).contains("No safety violations"));
}

#[test]
fn init_config_refuses_to_overwrite_without_force() {
    let temp = tempfile::tempdir().expect("tempdir");
    assert_eq!(
        agent(temp.path(), &["init-config"]).status.code(),
        Some(exit_codes::OK)
    );
    let written = fs::read_to_string(temp.path().join("agent.toml")).expect("config");
    assert!(written.contains("max_iterations = 10"));

    assert_eq!(
        agent(temp.path(), &["init-config"]).status.code(),
        Some(exit_codes::INVALID)
    );
    assert_eq!(
        agent(temp.path(), &["init-config", "--force"]).status.code(),
        Some(exit_codes::OK)
    );
}

#[test]
fn run_without_generator_command_is_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = agent(
        temp.path(),
        &["run", "--goal", "even", "--test", "2 -> true"],
    );
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&output.stderr).contains("generator.command"));
}

#[test]
fn show_list_and_cancel_use_the_store() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = FileTaskStore::open(temp.path().join(".agent")).expect("open");
    let task = Task::from_request(&TaskRequest::new("goal", vec!["1 -> 1".to_string()]), 4);
    store.create(&task).expect("create");

    let shown = agent(temp.path(), &["show", &task.id]);
    assert_eq!(shown.status.code(), Some(exit_codes::OK));
    let parsed: Task = serde_json::from_slice(&shown.stdout).expect("task json");
    assert_eq!(parsed.id, task.id);

    let listed = agent(temp.path(), &["list", "--status", "pending"]);
    let tasks: Vec<Task> = serde_json::from_slice(&listed.stdout).expect("list json");
    assert_eq!(tasks.len(), 1);

    let cancelled = agent(temp.path(), &["cancel", &task.id]);
    assert_eq!(cancelled.status.code(), Some(exit_codes::OK));
    assert_eq!(store.get(&task.id).expect("get").status, TaskStatus::Cancelled);

    let again = agent(temp.path(), &["cancel", &task.id]);
    assert_eq!(again.status.code(), Some(exit_codes::INVALID));

    let missing = agent(temp.path(), &["show", "not-a-task"]);
    assert_eq!(missing.status.code(), Some(exit_codes::INVALID));
}

#[cfg(unix)]
#[test]
fn exec_runs_source_with_configured_toolchain() {
    let temp = tempfile::tempdir().expect("tempdir");
    let work = temp.path().join("work");
    fs::write(
        temp.path().join("agent.toml"),
        format!(
            "workspace_dir = {:?}\n\n[sandbox.toolchain]\ncompile = [\"cp\", \"{{source}}\", \"{{artifact}}\"]\nrun = [\"sh\", \"{{artifact}}\"]\nsource_extension = \"sh\"\n",
            work.display().to_string()
        ),
    )
    .expect("config");
    fs::write(temp.path().join("prog.sh"), "# class Solution\necho hello\n").expect("source");

    let output = agent(temp.path(), &["exec", "prog.sh"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let result: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(result["stdout"], "hello\n");
    assert_eq!(result["compiled"], true);
    assert_eq!(fs::read_dir(&work).expect("work dir").count(), 0);
}

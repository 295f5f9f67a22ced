//! Process-level sandbox and harness tests.
//!
//! Most tests use a shell "toolchain" so they run without a JDK; the ones that
//! need `javac` skip themselves when it is missing.

#![cfg(unix)]

use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use agent::io::harness::TestHarness;
use agent::io::sandbox::{Sandbox, SandboxRunner, Toolchain};
use agent::test_support::{javac_available, shell_toolchain};

fn shell_sandbox(base: &Path, timeout: Duration) -> SandboxRunner {
    SandboxRunner::new(shell_toolchain(), base, timeout, 100_000)
}

fn leftover_entries(base: &Path) -> Vec<String> {
    match fs::read_dir(base) {
        Ok(entries) => entries
            .filter_map(Result::ok)
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    }
}

#[test]
fn workspace_is_removed_after_every_outcome() {
    let temp = tempfile::tempdir().expect("tempdir");
    let sandbox = shell_sandbox(temp.path(), Duration::from_secs(5));

    let ok = sandbox.execute("# class Solution\nmkdir -p deep/er/still\necho x > deep/er/still/f\necho done\n");
    assert!(ok.is_success());
    assert_eq!(ok.stdout.trim(), "done");
    assert!(leftover_entries(temp.path()).is_empty());

    let failed = sandbox.execute("# class Solution\nexit 9\n");
    assert!(failed.compiled && !failed.executed);
    assert!(leftover_entries(temp.path()).is_empty());

    let malformed = sandbox.execute("no declarations here");
    assert!(malformed.structural_error);
    assert!(leftover_entries(temp.path()).is_empty());
}

#[test]
fn non_terminating_program_is_killed_at_the_timeout() {
    let temp = tempfile::tempdir().expect("tempdir");
    let sandbox = shell_sandbox(temp.path(), Duration::from_secs(1));

    let started = Instant::now();
    let result = sandbox.execute("# class Solution\nwhile :; do :; done\n");
    let elapsed = started.elapsed();

    assert!(result.compiled);
    assert!(result.timed_out);
    assert!(!result.executed);
    assert!(elapsed < Duration::from_secs(3), "took {elapsed:?}");
    assert!(leftover_entries(temp.path()).is_empty());
}

#[test]
fn concurrent_executions_use_distinct_workspaces() {
    let temp = tempfile::tempdir().expect("tempdir");
    let sandbox = shell_sandbox(temp.path(), Duration::from_secs(5));
    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let sandbox = &sandbox;
                scope.spawn(move || {
                    sandbox.execute(&format!("# class Solution\necho {i} > marker\ncat marker\n"))
                })
            })
            .collect();
        for (i, handle) in handles.into_iter().enumerate() {
            let result = handle.join().expect("join");
            assert_eq!(result.stdout.trim(), i.to_string());
        }
    });
    assert!(leftover_entries(temp.path()).is_empty());
}

#[test]
fn identity_candidate_passes_single_case_with_jdk() {
    if !javac_available() {
        eprintln!("skipping: javac not found");
        return;
    }
    let temp = tempfile::tempdir().expect("tempdir");
    let sandbox = SandboxRunner::new(
        Toolchain::default(),
        temp.path(),
        Duration::from_secs(30),
        100_000,
    );
    let harness = TestHarness::new(&sandbox);
    let source = "public class Solution {\n    public int identity(int n) {\n        return n;\n    }\n}";

    let result = harness.run(source, &["Input: 5, Output: 5"]);
    assert_eq!(result.passed_count, 1);
    assert_eq!(result.failed_count, 0);
    assert!(leftover_entries(temp.path()).is_empty());
}

#[test]
fn compile_error_is_reported_with_jdk() {
    if !javac_available() {
        eprintln!("skipping: javac not found");
        return;
    }
    let temp = tempfile::tempdir().expect("tempdir");
    let sandbox = SandboxRunner::new(
        Toolchain::default(),
        temp.path(),
        Duration::from_secs(30),
        100_000,
    );
    let result = sandbox.execute("public class Solution { int f() { return x; } }");
    assert!(!result.compiled);
    assert!(result.stderr.contains("cannot find symbol"));
}

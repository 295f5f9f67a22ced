//! Self-correcting code-generation agent.
//!
//! A task (goal plus human-written test cases) is driven through bounded
//! iterations: generate a candidate, screen it, compile and run it against a
//! synthesized test driver, and on failure classify the error and rewrite the
//! prompt for the next attempt. The architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (safety screen, test parsing,
//!   driver synthesis, classification, prompts). No I/O, fully testable in
//!   isolation.
//! - **[`io`]**: Side-effecting operations (processes, sandbox workspaces,
//!   generator, storage, config). Isolated behind traits to enable fakes in
//!   tests.
//!
//! Orchestration modules ([`agent_loop`], [`pool`], [`service`]) coordinate
//! core logic with I/O to implement the task lifecycle and CLI commands.

pub mod agent_loop;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod pool;
pub mod service;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

//! Deterministic, pure logic shared by the agent loop.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod classifier;
pub mod driver;
pub mod prompt;
pub mod reflection;
pub mod safety;
pub mod sanitize;
pub mod task;
pub mod test_case;
pub mod types;

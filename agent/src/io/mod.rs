//! Side-effecting components: processes, sandbox, generator, storage, config.

pub mod atomic;
pub mod config;
pub mod generator;
pub mod harness;
pub mod process;
pub mod sandbox;
pub mod store;

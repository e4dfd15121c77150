//! Application layer
//!
//! Wires the registry, gates, retry policy and repository state into the
//! per-test lifecycle exposed to test cases.

pub mod harness;

pub use harness::{Harness, TestRun};

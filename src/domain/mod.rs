//! Domain layer for the checkpoint harness
//!
//! Core types shared by every agent driver: errors, data contracts,
//! and the ports (`Agent`, `Session`) that concrete drivers implement.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{HarnessError, HarnessResult};

//! Harness services: admission control, dialog handling, retries,
//! convergence polling and per-test repository state.

pub mod checkpoint_reader;
pub mod convergence;
pub mod dialog;
pub mod gate;
pub mod repo_state;
pub mod retry;

pub use checkpoint_reader::CheckpointReader;
pub use convergence::{poll_until, poll_until_changed};
pub use dialog::{DialogPlan, DialogRule};
pub use gate::{ConcurrencyGate, SlotPermit};
pub use repo_state::RepoState;
pub use retry::{RetryPolicy, TransientSignatures};

//! Session port - interface for long-lived interactive agent runs.

use async_trait::async_trait;
use std::time::Duration;

use crate::domain::errors::HarnessResult;

/// Cleanup attached to a session, run exactly once when it closes.
pub type CloseHook = Box<dyn FnOnce() + Send + 'static>;

/// Handle to one interactive agent run inside a terminal pane.
///
/// A session is owned by the test that started it and must be closed through
/// the test's cleanup path. `close` is idempotent.
#[async_trait]
pub trait Session: Send + Sync {
    /// Identifier of the underlying terminal session.
    fn name(&self) -> &str;

    /// Deliver one line of text followed by Enter.
    async fn send(&self, text: &str) -> HarnessResult<()>;

    /// Deliver raw key names (e.g. `Enter`, `Down`) without a trailing Enter.
    async fn send_keys(&self, keys: &[&str]) -> HarnessResult<()>;

    /// Block until `pattern` (a regular expression) appears in the pane.
    ///
    /// Returns the pane snapshot on success. On timeout the error carries the
    /// last snapshot so the failure can be diagnosed.
    async fn wait_for(&self, pattern: &str, timeout: Duration) -> HarnessResult<String>;

    /// Current pane content, without waiting.
    async fn capture(&self) -> HarnessResult<String>;

    /// Forget the snapshot taken at the last send so the next wait matches
    /// against the pane as it is now.
    fn reset_last_sent(&self);

    /// Attach cleanup to run when the session closes.
    fn on_close(&self, hook: CloseHook);

    /// Tear the session down and run close hooks. Safe to call repeatedly.
    async fn close(&self) -> HarnessResult<()>;
}

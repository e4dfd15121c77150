//! Startup dialog automaton.
//!
//! Interactive agents open with a sequence of modal dialogs (folder trust,
//! permission warnings) before their input prompt appears. [`DialogPlan`]
//! describes one agent's dialogs; [`DialogPlan::dismiss`] drives any
//! [`Session`] through them until the ready marker shows up, or fails after a
//! fixed number of iterations.

use regex::escape;
use std::time::Duration;
use tracing::{debug, info, instrument};

use crate::domain::errors::{HarnessError, HarnessResult};
use crate::domain::models::DialogConfig;
use crate::domain::ports::Session;

/// One known dialog and how to dismiss it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogRule {
    pub name: String,
    /// Literal text identifying the dialog in the pane.
    pub marker: String,
    /// Keys sent before the confirm key, for dialogs whose default answer declines.
    pub pre_keys: Vec<String>,
}

impl DialogRule {
    /// A dialog accepted by the confirm key alone.
    pub fn confirm(name: impl Into<String>, marker: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            marker: marker.into(),
            pre_keys: Vec::new(),
        }
    }

    /// A dialog that needs navigation before confirming.
    pub fn navigate_then_confirm<I, S>(name: impl Into<String>, marker: impl Into<String>, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            marker: marker.into(),
            pre_keys: keys.into_iter().map(Into::into).collect(),
        }
    }
}

/// Parameters of the dismissal loop for one agent.
#[derive(Debug, Clone)]
pub struct DialogPlan {
    pub ready_marker: String,
    pub rules: Vec<DialogRule>,
    pub confirm_key: String,
    pub max_iterations: u32,
    pub wait_timeout: Duration,
    pub settle: Duration,
}

impl DialogPlan {
    pub fn new(ready_marker: impl Into<String>) -> Self {
        let defaults = DialogConfig::default();
        Self {
            ready_marker: ready_marker.into(),
            rules: Vec::new(),
            confirm_key: "Enter".to_string(),
            max_iterations: defaults.max_iterations,
            wait_timeout: Duration::from_secs(defaults.wait_secs),
            settle: Duration::from_millis(defaults.settle_ms),
        }
    }

    pub fn rule(mut self, rule: DialogRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Apply iteration cap and timings from configuration.
    pub fn tuned(mut self, config: &DialogConfig) -> Self {
        self.max_iterations = config.max_iterations;
        self.wait_timeout = Duration::from_secs(config.wait_secs);
        self.settle = Duration::from_millis(config.settle_ms);
        self
    }

    /// Regex matching the ready marker or any dialog marker.
    fn any_marker(&self) -> String {
        std::iter::once(&self.ready_marker)
            .chain(self.rules.iter().map(|r| &r.marker))
            .map(|m| escape(m))
            .collect::<Vec<_>>()
            .join("|")
    }

    /// Drive `session` until the ready marker is visible.
    ///
    /// Returns the iteration on which the session became ready. A wait that
    /// times out without any marker still consumes an iteration. Exhausting
    /// the cap is a setup failure.
    #[instrument(skip(self, session), fields(session = session.name()))]
    pub async fn dismiss(&self, session: &dyn Session) -> HarnessResult<u32> {
        let pattern = self.any_marker();
        let mut pane = String::new();

        for iteration in 1..=self.max_iterations {
            pane = match session.wait_for(&pattern, self.wait_timeout).await {
                Ok(pane) => pane,
                Err(HarnessError::PatternTimeout { pane, .. }) => {
                    debug!(iteration, "no known marker yet");
                    pane
                }
                Err(e) => return Err(e),
            };

            if pane.contains(&self.ready_marker) {
                session.reset_last_sent();
                info!(iteration, "session ready");
                return Ok(iteration);
            }

            if let Some(rule) = self.rules.iter().find(|r| pane.contains(&r.marker)) {
                debug!(iteration, dialog = %rule.name, "dismissing dialog");
                if !rule.pre_keys.is_empty() {
                    let keys: Vec<&str> = rule.pre_keys.iter().map(String::as_str).collect();
                    session.send_keys(&keys).await?;
                }
                session.send_keys(&[self.confirm_key.as_str()]).await?;
                tokio::time::sleep(self.settle).await;
            }
        }

        Err(HarnessError::setup(format!(
            "session {} did not reach ready marker `{}` after {} iterations\n--- pane ---\n{}",
            session.name(),
            self.ready_marker,
            self.max_iterations,
            pane
        )))
    }
}

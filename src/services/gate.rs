//! Per-agent concurrency gate.
//!
//! Bounds how many tests may drive the same agent at once, to stay inside
//! provider rate limits. Waiters are admitted first-come-first-served. A slot
//! is held by a [`SlotPermit`] and returned when the permit is released or
//! dropped, which also covers early returns and panics.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::errors::{HarnessError, HarnessResult};

/// Admission control keyed by agent name. Agents without a gate are unbounded.
#[derive(Debug, Default, Clone)]
pub struct ConcurrencyGate {
    gates: HashMap<String, Arc<Semaphore>>,
    capacities: HashMap<String, usize>,
}

impl ConcurrencyGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Limit `agent` to `capacity` concurrent slots.
    pub fn with_gate(mut self, agent: impl Into<String>, capacity: usize) -> Self {
        self.register(agent, capacity);
        self
    }

    /// Limit `agent` to `capacity` concurrent slots, replacing any earlier gate.
    pub fn register(&mut self, agent: impl Into<String>, capacity: usize) {
        let agent = agent.into();
        let capacity = if capacity == 0 {
            warn!(agent = %agent, "gate capacity 0 would block forever, using 1");
            1
        } else {
            capacity
        };
        self.gates
            .insert(agent.clone(), Arc::new(Semaphore::new(capacity)));
        self.capacities.insert(agent, capacity);
    }

    /// Configured slot count, or `None` for an unbounded agent.
    pub fn capacity(&self, agent: &str) -> Option<usize> {
        self.capacities.get(agent).copied()
    }

    /// Wait for a slot for `agent`, or until `cancel` fires.
    ///
    /// On cancellation no slot is granted.
    pub async fn acquire(
        &self,
        agent: &str,
        cancel: &CancellationToken,
    ) -> HarnessResult<SlotPermit> {
        let Some(semaphore) = self.gates.get(agent).cloned() else {
            return Ok(SlotPermit::unbounded(agent));
        };
        if cancel.is_cancelled() {
            return Err(HarnessError::Cancelled(format!("waiting for a {agent} slot")));
        }

        debug!(agent, available = semaphore.available_permits(), "waiting for slot");
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                Err(HarnessError::Cancelled(format!("waiting for a {agent} slot")))
            }
            permit = semaphore.acquire_owned() => {
                let permit = permit.map_err(|_| HarnessError::setup(format!("gate for {agent} is closed")))?;
                debug!(agent, "slot acquired");
                Ok(SlotPermit {
                    agent: agent.to_string(),
                    permit: Some(permit),
                })
            }
        }
    }
}

/// A held slot. Returned to the gate exactly once, on release or drop.
#[derive(Debug)]
pub struct SlotPermit {
    agent: String,
    permit: Option<OwnedSemaphorePermit>,
}

impl SlotPermit {
    fn unbounded(agent: &str) -> Self {
        Self {
            agent: agent.to_string(),
            permit: None,
        }
    }

    pub fn agent(&self) -> &str {
        &self.agent
    }

    /// Whether this permit occupies a bounded slot.
    pub fn is_gated(&self) -> bool {
        self.permit.is_some()
    }

    /// Return the slot now.
    pub fn release(mut self) {
        self.give_back();
    }

    fn give_back(&mut self) {
        if self.permit.take().is_some() {
            debug!(agent = %self.agent, "slot released");
        }
    }
}

impl Drop for SlotPermit {
    fn drop(&mut self) {
        self.give_back();
    }
}

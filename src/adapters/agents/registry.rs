//! Agent registry and factory.
//!
//! Built once at startup, then shared read-only by every test.

use std::sync::Arc;
use tracing::info;

use super::claude_code::{ClaudeCodeAgent, ClaudeCodeConfig, CLAUDE_CODE};
use super::gemini_cli::{GeminiCliAgent, GeminiCliConfig, GEMINI_CLI};
use super::opencode::{OpenCodeAgent, OpenCodeConfig, OPENCODE};
use crate::domain::errors::{HarnessError, HarnessResult};
use crate::domain::models::HarnessConfig;
use crate::domain::ports::Agent;
use crate::infrastructure::process::ProcessDriver;
use crate::services::gate::ConcurrencyGate;

/// Registered agents plus their concurrency gates.
pub struct AgentRegistry {
    agents: Vec<Arc<dyn Agent>>,
    gate: ConcurrencyGate,
}

impl AgentRegistry {
    pub fn builder() -> AgentRegistryBuilder {
        AgentRegistryBuilder::default()
    }

    /// Register the built-in agents and gates described by `config`,
    /// keeping only the selected agent when `config.agent` is set.
    pub fn from_config(config: &HarnessConfig) -> HarnessResult<Self> {
        let driver = ProcessDriver::new(config.timeouts.kill_grace());

        let claude = ClaudeCodeConfig {
            dialog: config.dialog.clone(),
            ..ClaudeCodeConfig::default()
        }
        .with_settings(&config.agent_settings(CLAUDE_CODE));
        let gemini = GeminiCliConfig {
            dialog: config.dialog.clone(),
            ..GeminiCliConfig::default()
        }
        .with_settings(&config.agent_settings(GEMINI_CLI));
        let opencode = OpenCodeConfig::default().with_settings(&config.agent_settings(OPENCODE));

        let mut builder = Self::builder()
            .register(ClaudeCodeAgent::new(claude, driver.clone()))
            .register(GeminiCliAgent::new(gemini, driver.clone()))
            .register(OpenCodeAgent::new(opencode, driver))
            .select(config.agent.clone());
        for (agent, capacity) in &config.gates {
            builder = builder.with_gate(agent.clone(), *capacity);
        }
        builder.build()
    }

    /// Look up an agent by name.
    pub fn get(&self, name: &str) -> HarnessResult<Arc<dyn Agent>> {
        self.agents
            .iter()
            .find(|agent| agent.name() == name)
            .cloned()
            .ok_or_else(|| HarnessError::UnknownAgent(format!("{name} (registered: {})", self.names().join(", "))))
    }

    pub fn agents(&self) -> &[Arc<dyn Agent>] {
        &self.agents
    }

    pub fn names(&self) -> Vec<&str> {
        self.agents.iter().map(|agent| agent.name()).collect()
    }

    pub const fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }
}

/// Accumulates agents and gates before the registry is frozen.
#[derive(Default)]
pub struct AgentRegistryBuilder {
    agents: Vec<Arc<dyn Agent>>,
    gate: ConcurrencyGate,
    selector: Option<String>,
}

impl AgentRegistryBuilder {
    pub fn register(self, agent: impl Agent + 'static) -> Self {
        self.register_arc(Arc::new(agent))
    }

    pub fn register_arc(mut self, agent: Arc<dyn Agent>) -> Self {
        self.agents.push(agent);
        self
    }

    /// Bound concurrent use of `agent` to `capacity` slots.
    pub fn with_gate(mut self, agent: impl Into<String>, capacity: usize) -> Self {
        self.gate.register(agent, capacity);
        self
    }

    /// Keep only the named agent. `None` or an empty name keeps all.
    pub fn select(mut self, selector: Option<String>) -> Self {
        self.selector = selector.filter(|s| !s.trim().is_empty());
        self
    }

    pub fn build(self) -> HarnessResult<AgentRegistry> {
        let mut seen = std::collections::HashSet::new();
        for agent in &self.agents {
            if !seen.insert(agent.name().to_string()) {
                return Err(HarnessError::setup(format!(
                    "agent {} registered twice",
                    agent.name()
                )));
            }
        }

        let mut agents = self.agents;
        if let Some(selector) = &self.selector {
            let registered: Vec<String> = agents.iter().map(|a| a.name().to_string()).collect();
            agents.retain(|agent| agent.name() == selector.trim());
            if agents.is_empty() {
                return Err(HarnessError::UnknownAgent(format!(
                    "{selector} (registered: {})",
                    registered.join(", ")
                )));
            }
        }

        let names: Vec<&str> = agents.iter().map(|a| a.name()).collect();
        info!(agents = ?names, selector = ?self.selector, "agent registry built");
        Ok(AgentRegistry {
            agents,
            gate: self.gate,
        })
    }
}

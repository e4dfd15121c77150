//! Environment hardening for agent child processes.

use tokio::process::Command;

/// Variables removed from, and injected into, an agent's environment.
///
/// The ambient environment is otherwise inherited unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvPolicy {
    remove: Vec<String>,
    inject: Vec<(String, String)>,
}

impl EnvPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop an ambient variable, e.g. one that makes the agent think it is nested.
    pub fn remove(mut self, key: impl Into<String>) -> Self {
        self.remove.push(key.into());
        self
    }

    /// Set a variable, replacing any earlier value for the same key.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        self.inject.retain(|(existing, _)| existing != &key);
        self.inject.push((key, value.into()));
        self
    }

    /// Layer extra variables on top (later wins).
    pub fn extend<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (key, value) in vars {
            self = self.set(key, value);
        }
        self
    }

    pub fn removed(&self) -> &[String] {
        &self.remove
    }

    pub fn injected(&self) -> &[(String, String)] {
        &self.inject
    }

    /// Apply the policy to a command about to be spawned.
    pub fn apply(&self, cmd: &mut Command) {
        for key in &self.remove {
            cmd.env_remove(key);
        }
        for (key, value) in &self.inject {
            cmd.env(key, value);
        }
    }

    /// Prefix for running a program under `env` with this policy, for
    /// launchers (like tmux) that do not inherit our process environment.
    pub fn env_prefix(&self) -> Vec<String> {
        let mut prefix = vec!["env".to_string()];
        for key in &self.remove {
            prefix.push("-u".to_string());
            prefix.push(key.clone());
        }
        for (key, value) in &self.inject {
            prefix.push(format!("{key}={value}"));
        }
        prefix
    }
}

//! Per-invocation run configuration and composable option functions.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Options applied to a single batch invocation.
///
/// Every field is optional: an unset value means "use the agent's default".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunConfig {
    /// Model identifier passed to the agent CLI
    pub model: Option<String>,
    /// Permission mode (e.g. `bypassPermissions`)
    pub permission_mode: Option<String>,
    /// Extra environment variables for the child process
    pub env: Vec<(String, String)>,
    /// Extra CLI arguments appended before the prompt
    pub extra_args: Vec<String>,
    /// Hard limit for this invocation, on top of the test deadline
    pub timeout: Option<Duration>,
}

/// A composable option mutating a [`RunConfig`].
///
/// Options are applied in order, so later options override earlier ones.
#[derive(Clone)]
pub struct RunOption(Arc<dyn Fn(&mut RunConfig) + Send + Sync>);

impl RunOption {
    pub fn new(apply: impl Fn(&mut RunConfig) + Send + Sync + 'static) -> Self {
        Self(Arc::new(apply))
    }

    pub fn apply(&self, config: &mut RunConfig) {
        (self.0)(config);
    }
}

impl fmt::Debug for RunOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RunOption(..)")
    }
}

impl RunConfig {
    /// Build a configuration by applying options in order.
    pub fn from_options(options: &[RunOption]) -> Self {
        let mut config = Self::default();
        for option in options {
            option.apply(&mut config);
        }
        config
    }

    /// Model to use, falling back to the agent default.
    pub fn model_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.model.as_deref().unwrap_or(default)
    }

    /// Permission mode to use, falling back to the agent default.
    pub fn permission_mode_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.permission_mode.as_deref().unwrap_or(default)
    }
}

pub fn with_model(model: impl Into<String>) -> RunOption {
    let model = model.into();
    RunOption::new(move |config| config.model = Some(model.clone()))
}

pub fn with_permission_mode(mode: impl Into<String>) -> RunOption {
    let mode = mode.into();
    RunOption::new(move |config| config.permission_mode = Some(mode.clone()))
}

pub fn with_env(key: impl Into<String>, value: impl Into<String>) -> RunOption {
    let (key, value) = (key.into(), value.into());
    RunOption::new(move |config| {
        config.env.retain(|(existing, _)| existing != &key);
        config.env.push((key.clone(), value.clone()));
    })
}

pub fn with_extra_args<I, S>(args: I) -> RunOption
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let args: Vec<String> = args.into_iter().map(Into::into).collect();
    RunOption::new(move |config| config.extra_args.extend(args.iter().cloned()))
}

pub fn with_timeout(timeout: Duration) -> RunOption {
    RunOption::new(move |config| config.timeout = Some(timeout))
}

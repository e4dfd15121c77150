//! Agent implementations.
//!
//! Each module drives one AI coding tool behind the [`Agent`](crate::domain::ports::Agent) port.

pub mod claude_code;
mod cli;
pub mod gemini_cli;
pub mod mock;
pub mod opencode;
pub mod registry;

pub use claude_code::{ClaudeCodeAgent, ClaudeCodeConfig, CLAUDE_CODE};
pub use gemini_cli::{GeminiCliAgent, GeminiCliConfig, GEMINI_CLI};
pub use mock::{MockAgent, MockResponse, ScriptedSession};
pub use opencode::{OpenCodeAgent, OpenCodeConfig, OPENCODE};
pub use registry::{AgentRegistry, AgentRegistryBuilder};

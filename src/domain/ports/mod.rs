//! Domain ports (interfaces) for agent drivers.

pub mod agent;
pub mod session;

pub use agent::{Agent, SessionStart};
pub use session::{CloseHook, Session};

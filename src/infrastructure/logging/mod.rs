//! Logging infrastructure
//!
//! Structured logging using tracing and tracing-subscriber:
//! - pretty or JSON output on stdout
//! - optional JSON log file via tracing-appender
//! - `RUST_LOG` overrides through `EnvFilter`

pub mod config;
pub mod logger;

pub use config::{LogConfig, LogFormat};
pub use logger::{init_test_logging, LoggerImpl, LOG_FILE_NAME};

// Re-export tracing macros for convenience
pub use tracing::{debug, error, info, instrument, trace, warn};

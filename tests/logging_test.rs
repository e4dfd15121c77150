//! Global subscriber installation. Kept in its own test binary because it
//! installs process-wide state.

use checkpoint_harness::infrastructure::logging::{LogConfig, LogFormat, LoggerImpl, LOG_FILE_NAME};
use std::time::Duration;

#[test]
fn test_file_sink_receives_structured_events() {
    let dir = tempfile::tempdir().unwrap();
    let config = LogConfig {
        level: "debug".to_string(),
        format: LogFormat::Json,
        log_dir: Some(dir.path().to_path_buf()),
        enable_stdout: false,
    };

    let logger = LoggerImpl::init(&config).unwrap();
    assert!(logger.writes_file());
    tracing::info!(agent = "mock", attempt = 2, "retry succeeded");

    let second = LoggerImpl::init(&config);
    assert!(second.is_err(), "a second global subscriber is refused");

    drop(logger);
    std::thread::sleep(Duration::from_millis(100));

    let contents = std::fs::read_to_string(dir.path().join(LOG_FILE_NAME)).unwrap();
    let event = contents
        .lines()
        .map(|line| serde_json::from_str::<serde_json::Value>(line).unwrap())
        .find(|v| v["fields"]["message"] == "retry succeeded")
        .expect("event written to file");
    assert_eq!(event["fields"]["agent"], "mock");
    assert_eq!(event["fields"]["attempt"], 2);
    assert_eq!(event["level"], "INFO");
}

//! Environment-driven agent selection.

use checkpoint_harness::{ConfigLoader, Harness};

#[tokio::test]
async fn test_env_selector_limits_agents() {
    let project = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(project.path().join(".e2e")).unwrap();
    std::fs::write(
        project.path().join(".e2e/config.yaml"),
        "gates:\n  opencode: 3\n",
    )
    .unwrap();

    let harness = temp_env::async_with_vars([("E2E_AGENT", Some("opencode"))], async {
        let config = ConfigLoader::load_from_dir(project.path()).unwrap();
        Harness::from_config(config).unwrap()
    })
    .await;

    assert_eq!(harness.agent_names(), vec!["opencode"]);
    assert_eq!(harness.registry().gate().capacity("opencode"), Some(3));
    assert_eq!(harness.registry().gate().capacity("claude-code"), Some(4));
}

#[tokio::test]
async fn test_unknown_env_selector_rejected() {
    let project = tempfile::tempdir().unwrap();

    let result = temp_env::async_with_vars([("E2E_AGENT", Some("cursor"))], async {
        let config = ConfigLoader::load_from_dir(project.path()).unwrap();
        Harness::from_config(config)
    })
    .await;

    let err = result.err().unwrap();
    assert!(err.to_string().contains("cursor"));
}

#[tokio::test]
async fn test_all_agents_without_selector() {
    let project = tempfile::tempdir().unwrap();
    let harness = temp_env::async_with_vars([("E2E_AGENT", None::<&str>)], async {
        Harness::from_config(ConfigLoader::load_from_dir(project.path()).unwrap()).unwrap()
    })
    .await;
    assert_eq!(harness.agent_names(), vec!["claude-code", "gemini-cli", "opencode"]);
}

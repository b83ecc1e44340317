//! Orchestrator assembly tests.

use scanpost_core::config::ScanpostConfig;
use scanpost_daemon::orchestrator::Orchestrator;

fn config_with_devices(names: &[&str]) -> ScanpostConfig {
    let mut toml = String::from("[server]\nhost = \"127.0.0.1\"\n");
    for name in names {
        toml.push_str(&format!("\n[[device]]\nname = \"{name}\"\n"));
    }
    ScanpostConfig::parse(&toml).expect("test config should parse")
}

#[tokio::test(flavor = "multi_thread")]
async fn build_registers_configured_devices() {
    // Given: a configuration with two devices
    let config = config_with_devices(&["front-desk", "mail-room"]);

    // When: building the orchestrator
    let orchestrator = Orchestrator::build_from_config(config).await.unwrap();

    // Then: both devices are registered
    let mut ids = orchestrator.registry().device_ids();
    ids.sort();
    assert_eq!(ids, vec!["front-desk", "mail-room"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_device_names_fail_build() {
    let config = config_with_devices(&["front-desk", "front-desk"]);
    let err = Orchestrator::build_from_config(config).await.unwrap_err();
    assert!(err.to_string().contains("front-desk"));
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_security_policy_fails_build() {
    let mut config = config_with_devices(&["front-desk"]);
    config.server.security_policy = "ssl".to_owned();

    let err = Orchestrator::build_from_config(config).await.unwrap_err();
    assert!(err.to_string().contains("security_policy"));
}

#[tokio::test(flavor = "multi_thread")]
async fn server_lifecycle_through_orchestrator() {
    // Given: a built orchestrator
    let config = config_with_devices(&["front-desk"]);
    let orchestrator = Orchestrator::build_from_config(config).await.unwrap();
    let server = orchestrator.server();

    // When: starting the server
    server.start().await.unwrap();

    // Then: the device listener is bound and advertised
    let addr = server.bound_addr("front-desk", false).await;
    assert!(addr.is_some());
    let adverts = server.advertisements().await;
    assert_eq!(adverts.len(), 1);
    assert_eq!(adverts[0].device_id, "front-desk");

    server.stop().await;
    assert!(server.advertisements().await.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn build_from_missing_config_file_fails() {
    let err = Orchestrator::build(std::path::Path::new("/nonexistent/scanpost.toml"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("failed to load config"));
}

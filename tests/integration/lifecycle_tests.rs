//! Integration tests for the endpoint lifecycle state machine and the
//! [`SessionControl`] facade.
//!
//! These tests touch the process environment (session id advertisement)
//! and are serialized.

use std::sync::Arc;

use serial_test::serial;
use session_control::extension::{HostEvent, SessionControl};
use session_control::ipc::address;
use session_control::ipc::lifecycle::ControlManager;
use session_control::AppError;

use super::test_helpers::{test_config, FakeHost, FakeSession};

const ENV_VAR: &str = "SESSION_CONTROL_TEST_ID";

#[tokio::test]
#[serial]
async fn enable_switch_and_disable() {
    let dir = tempfile::tempdir().unwrap();
    let control_dir = dir.path().join("control");
    let host = FakeHost::new();
    let mut manager = ControlManager::new(Arc::new(test_config(&control_dir)), host.services());

    manager.refresh(FakeSession::new("alpha"), true).await.unwrap();
    let alpha = address::socket_path(&control_dir, "alpha").unwrap();
    assert!(manager.is_running());
    assert_eq!(manager.address(), Some(alpha.as_path()));
    assert!(address::is_live(&alpha).await);
    assert_eq!(std::env::var(ENV_VAR).unwrap(), "alpha");

    manager.refresh(FakeSession::new("beta"), true).await.unwrap();
    let beta = address::socket_path(&control_dir, "beta").unwrap();
    assert!(!alpha.exists());
    assert!(address::is_live(&beta).await);
    assert_eq!(manager.session_id().await.as_deref(), Some("beta"));
    assert_eq!(std::env::var(ENV_VAR).unwrap(), "beta");

    manager.refresh(FakeSession::new("beta"), false).await.unwrap();
    assert!(!manager.is_running());
    assert!(!beta.exists());
    assert!(std::env::var(ENV_VAR).is_err());
}

#[tokio::test]
#[serial]
async fn same_session_keeps_the_endpoint() {
    let dir = tempfile::tempdir().unwrap();
    let host = FakeHost::new();
    let mut manager = ControlManager::new(Arc::new(test_config(dir.path())), host.services());

    manager.start(FakeSession::new("alpha")).await.unwrap();
    manager.start(FakeSession::new("alpha")).await.unwrap();

    assert!(manager.is_running());
    assert!(address::is_live(&address::socket_path(dir.path(), "alpha").unwrap()).await);
    manager.shutdown().await.unwrap();
}

#[tokio::test]
#[serial]
async fn stale_socket_file_is_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let host = FakeHost::new();
    let stale = address::socket_path(dir.path(), "alpha").unwrap();
    std::fs::write(&stale, b"").unwrap();

    let mut manager = ControlManager::new(Arc::new(test_config(dir.path())), host.services());
    manager.start(FakeSession::new("alpha")).await.unwrap();

    assert!(address::is_live(&stale).await);
    manager.shutdown().await.unwrap();
}

#[tokio::test]
#[serial]
async fn live_socket_is_not_stolen() {
    let dir = tempfile::tempdir().unwrap();
    let host = FakeHost::new();
    let config = Arc::new(test_config(dir.path()));

    let mut owner = ControlManager::new(Arc::clone(&config), host.services());
    owner.start(FakeSession::new("alpha")).await.unwrap();

    let mut intruder = ControlManager::new(config, host.services());
    let result = intruder.start(FakeSession::new("alpha")).await;
    assert!(matches!(result, Err(AppError::Ipc(_))), "{result:?}");
    assert!(!intruder.is_running());

    let socket = address::socket_path(dir.path(), "alpha").unwrap();
    assert!(address::is_live(&socket).await);
    owner.shutdown().await.unwrap();
}

#[tokio::test]
#[serial]
async fn failed_switch_withdraws_advertisement() {
    let dir = tempfile::tempdir().unwrap();
    let host = FakeHost::new();
    let config = Arc::new(test_config(dir.path()));

    let mut owner = ControlManager::new(Arc::clone(&config), host.services());
    owner.start(FakeSession::new("beta")).await.unwrap();

    let mut manager = ControlManager::new(config, host.services());
    manager.refresh(FakeSession::new("alpha"), true).await.unwrap();
    assert_eq!(std::env::var(ENV_VAR).unwrap(), "alpha");

    let result = manager.refresh(FakeSession::new("beta"), true).await;
    assert!(matches!(result, Err(AppError::Ipc(_))), "{result:?}");
    assert!(!manager.is_running());
    assert!(!address::socket_path(dir.path(), "alpha").unwrap().exists());
    assert!(std::env::var(ENV_VAR).is_err());

    owner.shutdown().await.unwrap();
}

#[tokio::test]
#[serial]
async fn unsafe_session_id_never_binds() {
    let dir = tempfile::tempdir().unwrap();
    let host = FakeHost::new();
    let mut manager = ControlManager::new(Arc::new(test_config(dir.path())), host.services());

    let result = manager.refresh(FakeSession::new("../escape"), true).await;
    assert!(matches!(result, Err(AppError::InvalidSessionId(_))));
    assert!(!manager.is_running());
}

#[tokio::test]
#[serial]
async fn facade_follows_host_events() {
    let dir = tempfile::tempdir().unwrap();
    let host = FakeHost::new();
    let control = SessionControl::new(Arc::new(test_config(dir.path())), host.services());

    control
        .handle_event(HostEvent::SessionStart {
            session: FakeSession::new("alpha"),
            control_enabled: false,
        })
        .await
        .unwrap();
    assert!(!control.is_running().await);

    control
        .handle_event(HostEvent::SessionSwitch {
            session: FakeSession::new("alpha"),
            control_enabled: true,
        })
        .await
        .unwrap();
    assert!(control.is_running().await);

    control
        .handle_event(HostEvent::TurnEnd { turn_index: 1 })
        .await
        .unwrap();

    control.handle_event(HostEvent::SessionShutdown).await.unwrap();
    assert!(!control.is_running().await);
    assert!(std::env::var(ENV_VAR).is_err());
    assert!(!address::socket_path(dir.path(), "alpha").unwrap().exists());
}

//! Integration tests for the RPC client against a live endpoint.

use std::time::Duration;

use session_control::ipc::client::{send_command, RpcOptions};
use session_control::ipc::protocol::{Command, EventKind, Request};
use session_control::AppError;

use super::test_helpers::{bind_endpoint, eventually, FakeHost, FakeSession};

#[tokio::test]
async fn plain_request_returns_response() {
    let dir = tempfile::tempdir().unwrap();
    let host = FakeHost::new();
    let endpoint = bind_endpoint(
        dir.path(),
        FakeSession::with_conversation("s1", "hi", "hello there"),
        &host,
    );

    let outcome = send_command(
        endpoint.address(),
        &Request::with_id(Command::GetMessage, "m1"),
        RpcOptions::request(Duration::from_secs(2)),
    )
    .await
    .unwrap();

    assert!(outcome.response.success);
    assert_eq!(outcome.response.id.as_deref(), Some("m1"));
    assert_eq!(outcome.event, None);
    endpoint.shutdown().await.unwrap();
}

#[tokio::test]
async fn send_waits_for_turn_end() {
    let dir = tempfile::tempdir().unwrap();
    let host = FakeHost::new();
    let session = FakeSession::with_conversation("s1", "hi", "first reply");
    let endpoint = bind_endpoint(dir.path(), session.clone(), &host);
    let address = endpoint.address().to_path_buf();

    let call = tokio::spawn(async move {
        send_command(
            &address,
            &Request::new(Command::Send {
                message: "continue".into(),
                mode: None,
            }),
            RpcOptions::until_turn_end(Duration::from_secs(2)),
        )
        .await
    });

    let live = &endpoint;
    eventually(|| async move { live.subscription_count().await == 1 }).await;
    assert_eq!(host.sender.sent().len(), 1);
    assert_eq!(endpoint.broadcast_turn_end(3).await, 1);

    let outcome = call.await.unwrap().unwrap();
    assert!(outcome.response.success);
    let event = outcome.event.unwrap();
    assert_eq!(event.turn_index, 3);
    assert_eq!(event.last_assistant_message.unwrap().content, "first reply");
    endpoint.shutdown().await.unwrap();
}

#[tokio::test]
async fn subscribe_request_is_its_own_event_source() {
    let dir = tempfile::tempdir().unwrap();
    let host = FakeHost::new();
    let endpoint = bind_endpoint(dir.path(), FakeSession::new("s1"), &host);
    let address = endpoint.address().to_path_buf();

    let call = tokio::spawn(async move {
        send_command(
            &address,
            &Request::new(Command::Subscribe {
                event: EventKind::TurnEnd,
            }),
            RpcOptions::until_turn_end(Duration::from_secs(2)),
        )
        .await
    });

    let live = &endpoint;
    eventually(|| async move { live.subscription_count().await == 1 }).await;
    endpoint.broadcast_turn_end(11).await;

    let outcome = call.await.unwrap().unwrap();
    assert_eq!(outcome.response.command, "subscribe");
    assert_eq!(outcome.event.unwrap().turn_index, 11);
    endpoint.shutdown().await.unwrap();
}

#[tokio::test]
async fn failed_response_does_not_wait_for_event() {
    let dir = tempfile::tempdir().unwrap();
    let host = FakeHost::new();
    let endpoint = bind_endpoint(dir.path(), FakeSession::new("s1"), &host);

    let outcome = send_command(
        endpoint.address(),
        &Request::new(Command::Send {
            message: String::new(),
            mode: None,
        }),
        RpcOptions::until_turn_end(Duration::from_secs(2)),
    )
    .await
    .unwrap();

    assert!(!outcome.response.success);
    assert_eq!(outcome.response.error.as_deref(), Some("missing message"));
    assert_eq!(outcome.event, None);

    let live = &endpoint;
    eventually(|| async move { live.subscription_count().await == 0 }).await;
    endpoint.shutdown().await.unwrap();
}

#[tokio::test]
async fn missing_event_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let host = FakeHost::new();
    let endpoint = bind_endpoint(dir.path(), FakeSession::new("s1"), &host);

    let result = send_command(
        endpoint.address(),
        &Request::new(Command::Send {
            message: "anyone there?".into(),
            mode: None,
        }),
        RpcOptions::until_turn_end(Duration::from_millis(200)),
    )
    .await;

    assert!(matches!(result, Err(AppError::Timeout(_))), "{result:?}");
    endpoint.shutdown().await.unwrap();
}

#[tokio::test]
async fn unreachable_session_is_a_connect_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = send_command(
        &dir.path().join("nobody.sock"),
        &Request::new(Command::Abort),
        RpcOptions::request(Duration::from_secs(1)),
    )
    .await;

    assert!(matches!(result, Err(AppError::Connect(_))), "{result:?}");
}

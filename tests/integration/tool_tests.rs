//! Integration tests for the `send_to_session` tool.

use std::sync::Arc;

use serde_json::json;
use serial_test::serial;
use session_control::extension::{
    HostEvent, SendToSessionParams, SendToSessionTool, SessionControl, ToolAction, WaitUntil,
};
use session_control::host::DeliveryMode;

use super::test_helpers::{bind_endpoint, eventually, test_config, FakeHost, FakeSession};

fn params(target: &str, action: ToolAction) -> SendToSessionParams {
    SendToSessionParams {
        target_session_id: target.to_owned(),
        action: Some(action),
        message: None,
        mode: None,
        wait_until: None,
    }
}

#[test]
fn params_accept_wire_names() {
    let parsed: SendToSessionParams = serde_json::from_value(json!({
        "targetSessionId": "abc",
        "message": "hi",
        "mode": "follow_up",
        "wait_until": "turn_end"
    }))
    .unwrap();
    assert_eq!(parsed.target_session_id, "abc");
    assert_eq!(parsed.action, None);
    assert_eq!(parsed.wait_until, Some(WaitUntil::TurnEnd));
}

#[tokio::test]
async fn invalid_target_fails_without_connecting() {
    let dir = tempfile::tempdir().unwrap();
    let tool = SendToSessionTool::new(Arc::new(test_config(dir.path())));

    let output = tool.execute(&params("../etc", ToolAction::GetMessage), None).await;
    assert!(output.is_error);
    assert_eq!(output.text, "Invalid session id");
}

#[tokio::test]
async fn get_message_returns_reply_text() {
    let dir = tempfile::tempdir().unwrap();
    let host = FakeHost::new();
    let endpoint = bind_endpoint(
        dir.path(),
        FakeSession::with_conversation("target", "status?", "Build is green."),
        &host,
    );
    let tool = SendToSessionTool::new(Arc::new(test_config(dir.path())));

    let output = tool.execute(&params("target", ToolAction::GetMessage), None).await;
    assert!(!output.is_error);
    assert_eq!(output.text, "Build is green.");
    endpoint.shutdown().await.unwrap();
}

#[tokio::test]
async fn get_message_without_reply_is_not_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let host = FakeHost::new();
    let endpoint = bind_endpoint(dir.path(), FakeSession::new("target"), &host);
    let tool = SendToSessionTool::new(Arc::new(test_config(dir.path())));

    let output = tool.execute(&params("target", ToolAction::GetMessage), None).await;
    assert!(!output.is_error);
    assert_eq!(output.text, "No assistant message found in session");
    endpoint.shutdown().await.unwrap();
}

#[tokio::test]
async fn get_summary_formats_model_and_text() {
    let dir = tempfile::tempdir().unwrap();
    let host = FakeHost::new();
    let endpoint = bind_endpoint(
        dir.path(),
        FakeSession::with_conversation("target", "refactor", "Refactored."),
        &host,
    );
    let tool = SendToSessionTool::new(Arc::new(test_config(dir.path())));

    let output = tool.execute(&params("target", ToolAction::GetSummary), None).await;
    assert_eq!(
        output.text,
        "Summary (via claude-haiku-4-5):\n\nEdited src/lib.rs; tests pass."
    );
    endpoint.shutdown().await.unwrap();
}

#[tokio::test]
async fn clear_reports_rewind_and_failures() {
    let dir = tempfile::tempdir().unwrap();
    let host = FakeHost::new();
    let session = FakeSession::with_conversation("target", "a", "b");
    let endpoint = bind_endpoint(dir.path(), session.clone(), &host);
    let tool = SendToSessionTool::new(Arc::new(test_config(dir.path())));

    let output = tool.execute(&params("target", ToolAction::Clear), None).await;
    assert_eq!(output.text, "Session cleared");
    let output = tool.execute(&params("target", ToolAction::Clear), None).await;
    assert_eq!(output.text, "Session already at root");

    session.set_busy(true);
    let output = tool.execute(&params("target", ToolAction::Clear), None).await;
    assert!(output.is_error);
    assert_eq!(
        output.text,
        "Failed to clear: session is busy - wait for turn to complete"
    );
    endpoint.shutdown().await.unwrap();
}

#[tokio::test]
async fn send_requires_message() {
    let dir = tempfile::tempdir().unwrap();
    let tool = SendToSessionTool::new(Arc::new(test_config(dir.path())));

    let output = tool.execute(&params("target", ToolAction::Send), Some("me")).await;
    assert!(output.is_error);
    assert_eq!(output.text, "Missing message for send action");
}

#[tokio::test]
async fn send_appends_sender_info() {
    let dir = tempfile::tempdir().unwrap();
    let host = FakeHost::new();
    let endpoint = bind_endpoint(dir.path(), FakeSession::new("target"), &host);
    let tool = SendToSessionTool::new(Arc::new(test_config(dir.path())));

    let mut call = params("target", ToolAction::Send);
    call.message = Some("please review".into());
    let output = tool.execute(&call, Some("caller")).await;

    assert!(!output.is_error, "{output:?}");
    assert_eq!(output.text, "Message sent to session target");
    assert_eq!(
        host.sender.sent(),
        vec![(
            "please review\n\n<sender_info>This message was sent by session caller</sender_info>"
                .to_owned(),
            DeliveryMode::Direct
        )]
    );
    endpoint.shutdown().await.unwrap();
}

#[tokio::test]
async fn send_message_processed_confirms_delivery() {
    let dir = tempfile::tempdir().unwrap();
    let host = FakeHost::new();
    let endpoint = bind_endpoint(dir.path(), FakeSession::new("target"), &host);
    let tool = SendToSessionTool::new(Arc::new(test_config(dir.path())));

    let mut call = params("target", ToolAction::Send);
    call.message = Some("ping".into());
    call.wait_until = Some(WaitUntil::MessageProcessed);
    let output = tool.execute(&call, None).await;

    assert_eq!(output.text, "Message delivered to session");
    assert_eq!(output.details["mode"], "direct");
    endpoint.shutdown().await.unwrap();
}

#[tokio::test]
async fn send_turn_end_returns_final_reply() {
    let dir = tempfile::tempdir().unwrap();
    let host = FakeHost::new();
    let session = FakeSession::with_conversation("target", "a", "Reply after turn.");
    let endpoint = bind_endpoint(dir.path(), session, &host);
    let config = Arc::new(test_config(dir.path()));

    let call = tokio::spawn(async move {
        let tool = SendToSessionTool::new(config);
        let mut call = params("target", ToolAction::Send);
        call.message = Some("go on".into());
        call.wait_until = Some(WaitUntil::TurnEnd);
        tool.execute(&call, None).await
    });

    let live = &endpoint;
    eventually(|| async move { live.subscription_count().await == 1 }).await;
    endpoint.broadcast_turn_end(2).await;

    let output = call.await.unwrap();
    assert_eq!(output.text, "Reply after turn.");
    assert_eq!(output.details["turnIndex"], 2);
    endpoint.shutdown().await.unwrap();
}

#[tokio::test]
async fn unreachable_target_is_reported_as_failure() {
    let dir = tempfile::tempdir().unwrap();
    let tool = SendToSessionTool::new(Arc::new(test_config(dir.path())));

    let output = tool.execute(&params("ghost", ToolAction::GetMessage), None).await;
    assert!(output.is_error);
    assert!(output.text.starts_with("Failed: connect:"), "{}", output.text);
}

#[tokio::test]
#[serial]
async fn facade_tool_signs_with_active_session() {
    let dir = tempfile::tempdir().unwrap();
    let host = FakeHost::new();
    let target_host = FakeHost::new();
    let target = bind_endpoint(dir.path(), FakeSession::new("target"), &target_host);

    let control = SessionControl::new(Arc::new(test_config(dir.path())), host.services());
    control
        .handle_event(HostEvent::SessionStart {
            session: FakeSession::new("caller"),
            control_enabled: true,
        })
        .await
        .unwrap();

    let mut call = params("target", ToolAction::Send);
    call.message = Some("hello".into());
    let output = control.call_tool(&call).await;
    assert!(!output.is_error, "{output:?}");
    assert!(target_host.sender.sent()[0]
        .0
        .ends_with("This message was sent by session caller</sender_info>"));

    control.handle_event(HostEvent::SessionShutdown).await.unwrap();
    target.shutdown().await.unwrap();
}

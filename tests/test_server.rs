//! Integration tests for the MCP server tools via duplex transport.
//!
//! Uses `tokio::io::duplex` to create an in-process transport, connects a test
//! client to the shellmcp server, and exercises tools through the MCP protocol.

use rmcp::model::*;
use rmcp::{ClientHandler, ServiceExt};
use serde_json::Value;
use shellmcp::server::ShellMcpServer;

/// Minimal test client that implements ClientHandler with defaults.
#[derive(Default, Clone)]
struct TestClient;

impl ClientHandler for TestClient {}

/// Helper: start a server+client pair connected via duplex transport.
async fn setup() -> rmcp::service::RunningService<
    rmcp::service::RoleClient,
    impl rmcp::service::Service<rmcp::service::RoleClient>,
> {
    let (server_transport, client_transport) = tokio::io::duplex(65536);

    let server = ShellMcpServer::new();
    tokio::spawn(async move {
        let service = server.serve(server_transport).await.unwrap();
        let _ = service.waiting().await;
    });

    let client = TestClient::default();
    client.serve(client_transport).await.unwrap()
}

/// Helper: call a tool and parse the JSON text content from the response.
async fn call_tool(
    client: &rmcp::service::RunningService<
        rmcp::service::RoleClient,
        impl rmcp::service::Service<rmcp::service::RoleClient>,
    >,
    name: &str,
    args: Value,
) -> Value {
    let params = CallToolRequestParams {
        meta: None,
        name: name.to_string().into(),
        arguments: Some(serde_json::from_value(args).unwrap()),
        task: None,
    };
    let request = ClientRequest::CallToolRequest(Request::new(params));
    let response = client.send_request(request).await.unwrap();

    let ServerResult::CallToolResult(result) = response else {
        panic!("expected CallToolResult, got {response:?}");
    };

    let text = result
        .content
        .iter()
        .filter_map(|c| match &c.raw {
            RawContent::Text(t) => Some(t.text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("");

    serde_json::from_str(&text).unwrap_or_else(|_| Value::String(text))
}

async fn create_local_session(
    client: &rmcp::service::RunningService<
        rmcp::service::RoleClient,
        impl rmcp::service::Service<rmcp::service::RoleClient>,
    >,
) -> String {
    let result = call_tool(client, "shell_session_create", serde_json::json!({})).await;
    result["session_id"].as_str().unwrap().to_string()
}

// ---------------------------------------------------------------------------
// session lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_session_create_and_close() {
    let client = setup().await;
    let session_id = create_local_session(&client).await;

    let status = call_tool(
        &client,
        "shell_session_status",
        serde_json::json!({"session_id": session_id}),
    )
    .await;
    assert_eq!(status["alive"], true);
    assert_eq!(status["mode"], "local");

    let closed = call_tool(
        &client,
        "shell_session_close",
        serde_json::json!({"session_id": session_id}),
    )
    .await;
    assert_eq!(closed["closed"], true);

    client.cancel().await.unwrap();
}

#[tokio::test]
async fn test_session_list_shows_entries() {
    let client = setup().await;
    let session_id = create_local_session(&client).await;

    let result = call_tool(&client, "shell_session_list", serde_json::json!({})).await;
    let sessions = result.as_array().unwrap();
    assert!(sessions.iter().any(|s| s["id"] == session_id));

    client.cancel().await.unwrap();
}

// ---------------------------------------------------------------------------
// shell_exec
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_shell_exec_echo() {
    let client = setup().await;
    let session_id = create_local_session(&client).await;

    let result = call_tool(
        &client,
        "shell_exec",
        serde_json::json!({"session_id": session_id, "command": "echo hello_world"}),
    )
    .await;

    assert_eq!(result["status"], "completed");
    assert_eq!(result["exit_status"], 0);
    let head = result["output_head"].as_array().unwrap();
    assert!(head.iter().any(|l| l.as_str().unwrap().contains("hello_world")));

    client.cancel().await.unwrap();
}

#[tokio::test]
async fn test_shell_exec_failure() {
    let client = setup().await;
    let session_id = create_local_session(&client).await;

    let result = call_tool(
        &client,
        "shell_exec",
        serde_json::json!({"session_id": session_id, "command": "exit 3"}),
    )
    .await;

    assert_eq!(result["status"], "completed");
    assert_eq!(result["exit_status"], 3);

    client.cancel().await.unwrap();
}

#[tokio::test]
async fn test_shell_exec_timeout_does_not_kill_shell() {
    let client = setup().await;
    let session_id = create_local_session(&client).await;

    let result = call_tool(
        &client,
        "shell_exec",
        serde_json::json!({"session_id": session_id, "command": "sleep 5", "timeout_ms": 200}),
    )
    .await;
    assert_eq!(result["status"], "timeout");
    assert_eq!(result["timed_out"], true);

    call_tool(
        &client,
        "shell_interrupt",
        serde_json::json!({"session_id": session_id}),
    )
    .await;

    let result = call_tool(
        &client,
        "shell_exec",
        serde_json::json!({"session_id": session_id, "command": "echo still_alive"}),
    )
    .await;
    assert_eq!(result["status"], "completed");
    let head = result["output_head"].as_array().unwrap();
    assert!(head.iter().any(|l| l.as_str().unwrap().contains("still_alive")));

    client.cancel().await.unwrap();
}

#[tokio::test]
async fn test_shell_exec_rejects_heredoc() {
    let client = setup().await;
    let session_id = create_local_session(&client).await;

    let result = call_tool(
        &client,
        "shell_exec",
        serde_json::json!({"session_id": session_id, "command": "cat <<EOF\nhi\nEOF"}),
    )
    .await;
    assert!(
        result.as_str().unwrap_or_default().contains("Heredoc")
            || result.to_string().contains("Heredoc")
    );

    client.cancel().await.unwrap();
}

#[tokio::test]
async fn test_shell_exec_blocks_dangerous_command() {
    let client = setup().await;
    let session_id = create_local_session(&client).await;

    let result = call_tool(
        &client,
        "shell_exec",
        serde_json::json!({"session_id": session_id, "command": "rm -rf /"}),
    )
    .await;
    assert!(result.to_string().contains("blocked"));

    client.cancel().await.unwrap();
}

#[tokio::test]
async fn test_shell_exec_recovery_suggestions_on_permission_denied() {
    let client = setup().await;
    let session_id = create_local_session(&client).await;

    let result = call_tool(
        &client,
        "shell_exec",
        serde_json::json!({"session_id": session_id, "command": "cat /etc/shadow"}),
    )
    .await;

    let suggestions = result["recovery_suggestions"].as_array().unwrap();
    assert!(!suggestions.is_empty());

    client.cancel().await.unwrap();
}

#[tokio::test]
async fn test_shell_exec_nonexistent_session() {
    let client = setup().await;
    let result = call_tool(
        &client,
        "shell_exec",
        serde_json::json!({"session_id": "s_doesnotexist", "command": "echo hi"}),
    )
    .await;
    assert!(result.to_string().contains("no session"));

    client.cancel().await.unwrap();
}

// ---------------------------------------------------------------------------
// file tools (local mode)
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_put_and_get_file_local_mode() {
    let client = setup().await;
    let dir = tempfile::tempdir().unwrap();
    let session_id = create_local_session(&client).await;

    let src = dir.path().join("src.txt");
    std::fs::write(&src, b"hello from test").unwrap();
    let dest = dir.path().join("dest.txt");

    let result = call_tool(
        &client,
        "shell_put_file",
        serde_json::json!({
            "session_id": session_id,
            "local_path": src.to_str().unwrap(),
            "remote_path": dest.to_str().unwrap(),
        }),
    )
    .await;
    assert_eq!(result["bytes"], 15);
    assert!(dest.exists());

    client.cancel().await.unwrap();
}

//! Integration tests for the session manager: local-mode PTY sessions driven
//! through the marker-framed exec loop.

use shellmcp::manager::{CreateSessionArgs, SessionManager};
use shellmcp::session::ExecStatus;

fn local_args(working_directory: Option<&str>) -> CreateSessionArgs {
    CreateSessionArgs {
        mode: Some("local".to_string()),
        working_directory: working_directory.map(ToString::to_string),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_create_and_close_session() {
    let manager = SessionManager::new();
    let info = manager.create(local_args(None)).await.unwrap();
    assert_eq!(info.mode, "local");
    assert!(info.alive);

    manager.close(&info.id).await.unwrap();
    assert!(manager.status(&info.id).await.is_err());
}

#[tokio::test]
async fn test_session_exec_echo() {
    let manager = SessionManager::new();
    let info = manager.create(local_args(None)).await.unwrap();

    let result = manager.exec(&info.id, "echo hello", 5000).await.unwrap();
    assert_eq!(result.status, ExecStatus::Completed);
    assert_eq!(result.exit_code, Some(0));
    assert!(result.lines.iter().any(|l| l.contains("hello")));

    manager.close(&info.id).await.unwrap();
}

#[tokio::test]
async fn test_session_exec_failure() {
    let manager = SessionManager::new();
    let info = manager.create(local_args(None)).await.unwrap();

    let result = manager.exec(&info.id, "false", 5000).await.unwrap();
    assert_eq!(result.status, ExecStatus::Completed);
    assert_eq!(result.exit_code, Some(1));

    manager.close(&info.id).await.unwrap();
}

#[tokio::test]
async fn test_session_exec_custom_exit_code() {
    let manager = SessionManager::new();
    let info = manager.create(local_args(None)).await.unwrap();

    let result = manager.exec(&info.id, "exit 42", 5000).await.unwrap();
    assert_eq!(result.exit_code, Some(42));

    manager.close(&info.id).await.unwrap();
}

#[tokio::test]
async fn test_session_exec_multiline_output() {
    let manager = SessionManager::new();
    let info = manager.create(local_args(None)).await.unwrap();

    let result = manager.exec(&info.id, "seq 1 5", 5000).await.unwrap();
    assert_eq!(result.exit_code, Some(0));
    assert!(result.lines.contains(&"1".to_string()));
    assert!(result.lines.contains(&"5".to_string()));

    manager.close(&info.id).await.unwrap();
}

#[tokio::test]
async fn test_session_stderr_captured() {
    let manager = SessionManager::new();
    let info = manager.create(local_args(None)).await.unwrap();

    let result = manager
        .exec(&info.id, "echo oops >&2", 5000)
        .await
        .unwrap();
    assert!(result.lines.iter().any(|l| l.contains("oops")));

    manager.close(&info.id).await.unwrap();
}

#[tokio::test]
async fn test_session_cwd_persists() {
    let manager = SessionManager::new();
    let info = manager.create(local_args(Some("/tmp"))).await.unwrap();

    manager.exec(&info.id, "cd /", 5000).await.unwrap();
    let status = manager.status(&info.id).await.unwrap();
    assert_eq!(status.cwd.as_deref(), Some("/"));

    manager.close(&info.id).await.unwrap();
}

#[tokio::test]
async fn test_session_env_var_persists() {
    let manager = SessionManager::new();
    let info = manager.create(local_args(None)).await.unwrap();

    manager.exec(&info.id, "export FOO=bar", 5000).await.unwrap();
    let result = manager.exec(&info.id, "echo $FOO", 5000).await.unwrap();
    assert!(result.lines.iter().any(|l| l.contains("bar")));

    manager.close(&info.id).await.unwrap();
}

#[tokio::test]
async fn test_session_alias_persists() {
    let manager = SessionManager::new();
    let info = manager.create(local_args(None)).await.unwrap();

    manager
        .exec(&info.id, "alias greet='echo hi-alias'", 5000)
        .await
        .unwrap();
    let result = manager.exec(&info.id, "greet", 5000).await.unwrap();
    assert!(result.lines.iter().any(|l| l.contains("hi-alias")));

    manager.close(&info.id).await.unwrap();
}

#[tokio::test]
async fn test_session_many_sequential_commands() {
    let manager = SessionManager::new();
    let info = manager.create(local_args(None)).await.unwrap();

    for i in 0..20 {
        let result = manager
            .exec(&info.id, &format!("echo iter{i}"), 5000)
            .await
            .unwrap();
        assert!(result.lines.iter().any(|l| l.contains(&format!("iter{i}"))));
    }

    manager.close(&info.id).await.unwrap();
}

#[tokio::test]
async fn test_session_timeout_then_still_usable() {
    let manager = SessionManager::new();
    let info = manager.create(local_args(None)).await.unwrap();

    let result = manager.exec(&info.id, "sleep 5", 200).await.unwrap();
    assert_eq!(result.status, ExecStatus::Timeout);
    assert!(result.timed_out);

    // No SIGINT is sent automatically; interrupt explicitly, then the
    // session should accept new commands.
    manager.interrupt(&info.id).await.unwrap();
    let result = manager.exec(&info.id, "echo recovered", 5000).await.unwrap();
    assert_eq!(result.status, ExecStatus::Completed);
    assert!(result.lines.iter().any(|l| l.contains("recovered")));

    manager.close(&info.id).await.unwrap();
}

#[tokio::test]
async fn test_session_blocks_dangerous_commands() {
    let manager = SessionManager::new();
    let info = manager.create(local_args(None)).await.unwrap();

    let err = manager.exec(&info.id, "rm -rf /", 5000).await.unwrap_err();
    assert!(err.to_string().contains("blocked"));

    manager.close(&info.id).await.unwrap();
}

#[tokio::test]
async fn test_session_rejects_heredoc() {
    let manager = SessionManager::new();
    let info = manager.create(local_args(None)).await.unwrap();

    let err = manager
        .exec(&info.id, "cat <<EOF\nhi\nEOF", 5000)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Heredoc"));

    manager.close(&info.id).await.unwrap();
}

#[tokio::test]
async fn test_multiple_independent_sessions() {
    let manager = SessionManager::new();
    let a = manager.create(local_args(None)).await.unwrap();
    let b = manager.create(local_args(None)).await.unwrap();

    manager.exec(&a.id, "export WHO=alice", 5000).await.unwrap();
    manager.exec(&b.id, "export WHO=bob", 5000).await.unwrap();

    let result_a = manager.exec(&a.id, "echo $WHO", 5000).await.unwrap();
    let result_b = manager.exec(&b.id, "echo $WHO", 5000).await.unwrap();

    assert!(result_a.lines.iter().any(|l| l.contains("alice")));
    assert!(result_b.lines.iter().any(|l| l.contains("bob")));

    manager.close(&a.id).await.unwrap();
    manager.close(&b.id).await.unwrap();
}

#[tokio::test]
async fn test_list_sessions() {
    let manager = SessionManager::new();
    assert!(manager.list().await.is_empty());

    let info = manager.create(local_args(None)).await.unwrap();
    let listed = manager.list().await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, info.id);

    manager.close(&info.id).await.unwrap();
}

#[tokio::test]
async fn test_exec_nonexistent_session() {
    let manager = SessionManager::new();
    let err = manager.exec("s_doesnotexist", "echo hi", 5000).await.unwrap_err();
    assert!(err.to_string().contains("no session"));
}

#[tokio::test]
async fn test_newline_less_prompt_is_detected_after_settle() {
    // `read -p` writes its prompt with no trailing newline and then blocks,
    // the same shape as `sudo`'s `[sudo] password for user: `. Detecting it
    // requires scanning the unterminated tail of the stream, not waiting for
    // a line to complete.
    let manager = SessionManager::new();
    let info = manager.create(local_args(None)).await.unwrap();

    let result = manager
        .exec(&info.id, "read -s -p 'password: ' pw; echo \"got-$pw\"", 5000)
        .await
        .unwrap();
    assert_eq!(result.status, ExecStatus::AwaitingInput);
    assert_eq!(
        result.prompt_type,
        Some(shellmcp::prompt::PromptType::Password)
    );

    let result = manager
        .provide_input(&info.id, "secret123", false)
        .await
        .unwrap();
    assert_eq!(result.status, ExecStatus::Completed);
    assert!(result.lines.iter().any(|l| l.contains("got-secret123")));

    manager.close(&info.id).await.unwrap();
}

#[tokio::test]
async fn test_close_is_idempotent_error_on_second_call() {
    let manager = SessionManager::new();
    let info = manager.create(local_args(None)).await.unwrap();
    manager.close(&info.id).await.unwrap();
    assert!(manager.close(&info.id).await.is_err());
}

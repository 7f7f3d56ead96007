//! MCP server: tool definitions using rmcp macros.
//!
//! Defines `ShellMcpServer`, exposing the full interactive-shell tool table:
//! session lifecycle (`shell_session_create`/`status`/`close`), command
//! execution (`shell_exec`/`provide_input`/`interrupt`), TCP tunnels
//! (`shell_tunnel_*`), and file transfer (`shell_put_file`/`get_file`/
//! `move_file`).

use crate::fs_tools;
use crate::manager::{CreateSessionArgs, SessionManager};
use crate::output;
use crate::recovery;
use crate::session::{ExecResult, ExecStatus};
use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::*;
use rmcp::schemars;
use rmcp::tool;
use rmcp::tool_handler;
use rmcp::tool_router;
use rmcp::{ErrorData as McpError, ServerHandler};
use serde::Serialize;

const DEFAULT_MAX_OUTPUT_LINES: usize = 200;

// ---------------------------------------------------------------------------
// Parameter structs (deserialized from MCP tool call arguments)
// ---------------------------------------------------------------------------

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct SessionCreateParams {
    /// `"local"` (default) for a PTY-backed bash process on this host, or
    /// `"ssh"` to open a shell over SSH.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    /// Starting working directory (local mode only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
    /// SSH host (required for `mode: "ssh"`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// SSH port. Defaults to 22.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// SSH username (required for `mode: "ssh"`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// SSH password, or the private key's passphrase when `key_path` is set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Path to a private key file, for public-key authentication.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_path: Option<String>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct ExecParams {
    pub session_id: String,
    pub command: String,
    /// Command timeout in milliseconds. Defaults to 30000, capped at
    /// `SHELLMCP_MAX_TIMEOUT_MS` (default one hour).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct ProvideInputParams {
    pub session_id: String,
    pub input: String,
    /// If true, the input is cached as the session's sudo password (TTL per
    /// `SHELLMCP_SUDO_CACHE_TTL_SECONDS`) and masked in the recording.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_for_sudo: Option<bool>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct SessionIdParams {
    pub session_id: String,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct TunnelCreateParams {
    pub session_id: String,
    /// `"local"` or `"reverse"`.
    #[serde(rename = "type")]
    pub tunnel_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_host: Option<String>,
    pub local_port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_host: Option<String>,
    pub remote_port: u16,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct TunnelIdParams {
    pub session_id: String,
    pub tunnel_id: String,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct PutFileParams {
    pub session_id: String,
    pub local_path: String,
    pub remote_path: String,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct GetFileParams {
    pub session_id: String,
    pub remote_path: String,
    pub local_path: String,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct MoveFileParams {
    pub session_id: String,
    pub from_path: String,
    pub to_path: String,
}

// ---------------------------------------------------------------------------
// Result structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
struct SessionCreateResult {
    session_id: String,
    status: &'static str,
    mode: String,
}

/// `shell_exec`/`shell_provide_input`'s result, matching the data model's
/// `ExecResult` plus LLM-friendly output windowing and recovery-suggestion
/// enrichment.
#[derive(Debug, Clone, Serialize)]
struct ExecToolResult {
    session_id: String,
    status: ExecStatus,
    exit_status: Option<i32>,
    duration_seconds: f64,
    timed_out: bool,
    prompt_type: &'static str,
    prompt_text: Option<String>,
    sudo_authenticated: bool,
    sudo_expires_in_seconds: Option<u64>,
    output_head: Vec<String>,
    output_tail: Vec<String>,
    output_error_lines: Vec<String>,
    total_lines: usize,
    truncated: bool,
    recovery_suggestions: Vec<recovery::Suggestion>,
}

fn prompt_type_str(result: &ExecResult) -> &'static str {
    match result.prompt_type {
        Some(crate::prompt::PromptType::Password) => "password",
        Some(crate::prompt::PromptType::Confirmation) => "confirmation",
        Some(crate::prompt::PromptType::Generic) => "generic",
        None => "none",
    }
}

fn build_exec_result(result: ExecResult) -> ExecToolResult {
    let max_lines = *crate::config::MAX_OUTPUT_LINES;
    let windowed = output::window(&result.lines, DEFAULT_MAX_OUTPUT_LINES.min(max_lines));
    let recovery_suggestions = if result.status == ExecStatus::Completed {
        recovery::analyze(&result.lines.join("\n"), result.exit_code.unwrap_or(0))
    } else {
        Vec::new()
    };

    ExecToolResult {
        session_id: result.session_id.clone(),
        status: result.status,
        exit_status: result.exit_code,
        duration_seconds: result.duration_seconds,
        timed_out: result.timed_out,
        prompt_type: prompt_type_str(&result),
        prompt_text: result.prompt_text.clone(),
        sudo_authenticated: result.sudo_authenticated,
        sudo_expires_in_seconds: result.sudo_expires_in_seconds,
        output_head: windowed.head,
        output_tail: windowed.tail,
        output_error_lines: windowed.error_lines,
        total_lines: windowed.total_lines,
        truncated: windowed.truncated,
        recovery_suggestions,
    }
}

// ---------------------------------------------------------------------------
// MCP Server
// ---------------------------------------------------------------------------

/// The shellmcp MCP server. Holds the process-wide [`SessionManager`]; all
/// state (sessions, sudo cache, auth rate limiter) lives behind it.
#[derive(Clone)]
pub struct ShellMcpServer {
    sessions: SessionManager,
    tool_router: ToolRouter<ShellMcpServer>,
}

impl ShellMcpServer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: SessionManager::new(),
            tool_router: Self::tool_router(),
        }
    }
}

impl Default for ShellMcpServer {
    fn default() -> Self {
        Self::new()
    }
}

fn json_content<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| McpError::internal_error(format!("JSON serialization error: {e}"), None))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

fn err_result<E: std::fmt::Display>(e: E) -> Result<CallToolResult, McpError> {
    Ok(CallToolResult::error(vec![Content::text(e.to_string())]))
}

#[tool_router]
impl ShellMcpServer {
    #[tool(
        description = "Create a persistent shell session: a long-lived bash process with a real PTY (mode=\"local\", the default), or an authenticated SSH shell (mode=\"ssh\", requires host+user and either password or key_path). Working directory, env vars, shell functions, and aliases persist across shell_exec calls on the same session_id. Returns the new session_id."
    )]
    async fn shell_session_create(
        &self,
        Parameters(params): Parameters<SessionCreateParams>,
    ) -> Result<CallToolResult, McpError> {
        let mode = params.mode.clone().unwrap_or_else(|| "local".to_string());
        tracing::info!(mode = %mode, "shell_session_create");

        let args = CreateSessionArgs {
            mode: params.mode,
            working_directory: params.working_directory,
            host: params.host,
            port: params.port,
            user: params.user,
            password: params.password,
            key_path: params.key_path,
        };

        match self.sessions.create(args).await {
            Ok(info) => json_content(&SessionCreateResult {
                session_id: info.id,
                status: "connected",
                mode: info.mode.to_string(),
            }),
            Err(e) => err_result(e),
        }
    }

    #[tool(
        description = "Run a command in a session, wrapped with start/end markers so output and exit status are captured precisely without parsing the shell prompt. Returns status=\"completed\" with exit_status and stdout on normal completion, status=\"awaiting_input\" with prompt_type/prompt_text if the command is blocked on an interactive prompt (use shell_provide_input to answer it), or status=\"timeout\" if timeout_ms elapses -- the command keeps running in the shell; no signal is sent automatically (use shell_interrupt for that)."
    )]
    async fn shell_exec(
        &self,
        Parameters(params): Parameters<ExecParams>,
    ) -> Result<CallToolResult, McpError> {
        let timeout_ms = params.timeout_ms.unwrap_or(*crate::config::DEFAULT_TIMEOUT_MS);
        tracing::info!(session = %params.session_id, command = %params.command, "shell_exec");

        match self.sessions.exec(&params.session_id, &params.command, timeout_ms).await {
            Ok(result) => json_content(&build_exec_result(result)),
            Err(e) => err_result(e),
        }
    }

    #[tool(
        description = "Answer a prompt a session is currently awaiting (password, y/n confirmation, or a generic prompt), reported by shell_exec's status=\"awaiting_input\". Set cache_for_sudo=true when the input is a sudo password, so later commands that hit a fresh [sudo] password prompt on the same session are answered automatically until the cache TTL expires."
    )]
    async fn shell_provide_input(
        &self,
        Parameters(params): Parameters<ProvideInputParams>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(session = %params.session_id, "shell_provide_input");
        match self
            .sessions
            .provide_input(&params.session_id, &params.input, params.cache_for_sudo.unwrap_or(false))
            .await
        {
            Ok(result) => json_content(&build_exec_result(result)),
            Err(e) => err_result(e),
        }
    }

    #[tool(
        description = "Send SIGINT (Ctrl-C) to a session's foreground process. Use after a shell_exec call returns status=\"timeout\" if the command should actually be stopped rather than left running in the background."
    )]
    async fn shell_interrupt(
        &self,
        Parameters(params): Parameters<SessionIdParams>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(session = %params.session_id, "shell_interrupt");
        match self.sessions.interrupt(&params.session_id).await {
            Ok(()) => json_content(&serde_json::json!({"session_id": params.session_id, "interrupted": true})),
            Err(e) => err_result(e),
        }
    }

    #[tool(
        description = "Check a session's current state: whether it's alive, its current working directory, whether a sudo password is cached (and for how much longer), and any saved tunnel configs pending restore."
    )]
    async fn shell_session_status(
        &self,
        Parameters(params): Parameters<SessionIdParams>,
    ) -> Result<CallToolResult, McpError> {
        match self.sessions.status(&params.session_id).await {
            Ok(info) => json_content(&info),
            Err(e) => err_result(e),
        }
    }

    #[tool(
        description = "Close a session: terminate its shell process (or SSH connection), closing any live tunnels and clearing its cached sudo password. Live tunnel configs are saved so a new session could call shell_tunnel_restore-equivalent setup again."
    )]
    async fn shell_session_close(
        &self,
        Parameters(params): Parameters<SessionIdParams>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(session = %params.session_id, "shell_session_close");
        match self.sessions.close(&params.session_id).await {
            Ok(()) => json_content(&serde_json::json!({"session_id": params.session_id, "closed": true})),
            Err(e) => err_result(e),
        }
    }

    #[tool(description = "List all active sessions with their id, mode, and alive status.")]
    async fn shell_session_list(&self) -> Result<CallToolResult, McpError> {
        json_content(&self.sessions.list().await)
    }

    #[tool(
        description = "Open a TCP tunnel on an ssh-mode session. type=\"local\" listens on local_host:local_port (default 127.0.0.1) and forwards each connection to remote_host:remote_port (default 127.0.0.1) through the SSH server. type=\"reverse\" asks the SSH server to listen on remote_host:remote_port (default 0.0.0.0) and forwards incoming connections back to local_host:local_port on this machine."
    )]
    async fn shell_tunnel_create(
        &self,
        Parameters(params): Parameters<TunnelCreateParams>,
    ) -> Result<CallToolResult, McpError> {
        let local_host = params.local_host.unwrap_or_else(|| "127.0.0.1".to_string());
        tracing::info!(session = %params.session_id, kind = %params.tunnel_type, "shell_tunnel_create");

        let result = match params.tunnel_type.as_str() {
            "local" => {
                let remote_host = params.remote_host.unwrap_or_else(|| "127.0.0.1".to_string());
                self.sessions
                    .create_local_tunnel(&params.session_id, &local_host, params.local_port, &remote_host, params.remote_port)
                    .await
            }
            "reverse" => {
                let remote_host = params.remote_host.unwrap_or_else(|| "0.0.0.0".to_string());
                self.sessions
                    .create_reverse_tunnel(&params.session_id, &remote_host, params.remote_port, &local_host, params.local_port)
                    .await
            }
            other => {
                return err_result(format!("unknown tunnel type '{other}', expected 'local' or 'reverse'"));
            }
        };

        match result {
            Ok(status) => json_content(&status),
            Err(e) => err_result(e),
        }
    }

    #[tool(description = "List a session's live tunnels with their id, type, endpoints, and byte/connection counters.")]
    async fn shell_tunnel_list(
        &self,
        Parameters(params): Parameters<SessionIdParams>,
    ) -> Result<CallToolResult, McpError> {
        match self.sessions.list_tunnels(&params.session_id).await {
            Ok(tunnels) => json_content(&tunnels),
            Err(e) => err_result(e),
        }
    }

    #[tool(description = "Close one of a session's tunnels by id. The closed tunnel's config is saved for shell_tunnel_restore.")]
    async fn shell_tunnel_close(
        &self,
        Parameters(params): Parameters<TunnelIdParams>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(session = %params.session_id, tunnel = %params.tunnel_id, "shell_tunnel_close");
        match self.sessions.close_tunnel(&params.session_id, &params.tunnel_id).await {
            Ok(()) => json_content(&serde_json::json!({"tunnel_id": params.tunnel_id, "closed": true})),
            Err(e) => err_result(e),
        }
    }

    #[tool(
        description = "Recreate every tunnel saved on a session (from prior shell_tunnel_close calls or a session close) on the session's current SSH transport. Useful after reconnecting. Returns the newly created tunnels' statuses."
    )]
    async fn shell_tunnel_restore(
        &self,
        Parameters(params): Parameters<SessionIdParams>,
    ) -> Result<CallToolResult, McpError> {
        match self.sessions.restore_tunnels(&params.session_id).await {
            Ok(tunnels) => json_content(&tunnels),
            Err(e) => err_result(e),
        }
    }

    #[tool(
        description = "Upload a local file (on the machine running this server) into a session: a same-filesystem copy for mode=\"local\" sessions, or an SFTP transfer for mode=\"ssh\" sessions. remote_path is resolved against the session's current working directory if relative."
    )]
    async fn shell_put_file(
        &self,
        Parameters(params): Parameters<PutFileParams>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(session = %params.session_id, "shell_put_file");
        match fs_tools::put_file(&self.sessions, &params.session_id, &params.local_path, &params.remote_path).await {
            Ok(result) => json_content(&result),
            Err(e) => err_result(e),
        }
    }

    #[tool(
        description = "Download a file from inside a session to the local machine running this server: a same-filesystem copy for mode=\"local\" sessions, or an SFTP transfer for mode=\"ssh\" sessions. remote_path is resolved against the session's current working directory if relative."
    )]
    async fn shell_get_file(
        &self,
        Parameters(params): Parameters<GetFileParams>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(session = %params.session_id, "shell_get_file");
        match fs_tools::get_file(&self.sessions, &params.session_id, &params.remote_path, &params.local_path).await {
            Ok(result) => json_content(&result),
            Err(e) => err_result(e),
        }
    }

    #[tool(description = "Rename/move a file within a session's filesystem.")]
    async fn shell_move_file(
        &self,
        Parameters(params): Parameters<MoveFileParams>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(session = %params.session_id, "shell_move_file");
        match fs_tools::move_file(&self.sessions, &params.session_id, &params.from_path, &params.to_path).await {
            Ok(result) => json_content(&result),
            Err(e) => err_result(e),
        }
    }
}

#[tool_handler]
impl ServerHandler for ShellMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "shellmcp".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Default::default()
            },
            instructions: Some(
                "shellmcp gives an agent persistent, interactive shell sessions.\n\n\
                 Call shell_session_create first (mode=\"local\" for a PTY-backed bash process \
                 on this host, mode=\"ssh\" for an authenticated remote shell). Working directory, \
                 env vars, shell functions, and aliases persist across shell_exec calls on the same \
                 session_id.\n\n\
                 shell_exec wraps each command with start/end markers to capture output and exit \
                 status precisely. If the command blocks on an interactive prompt (password, y/n, \
                 or a generic prompt), shell_exec returns status=\"awaiting_input\" with prompt_type \
                 and prompt_text -- answer it with shell_provide_input (set cache_for_sudo=true for \
                 a sudo password so later prompts on the session are auto-answered until the cache \
                 expires). If timeout_ms elapses, status=\"timeout\" is returned and the command \
                 keeps running in the shell -- no signal is sent automatically; call shell_interrupt \
                 if it should actually be stopped.\n\n\
                 On ssh sessions, shell_tunnel_create opens local or reverse TCP tunnels, \
                 shell_tunnel_list/close manage them, and shell_tunnel_restore recreates tunnels \
                 saved from a prior close. shell_put_file/get_file/move_file move files into, out \
                 of, or around a session's filesystem.\n\n\
                 Exec results include windowed output (head/tail/error_lines) and rule-based \
                 recovery_suggestions for common failure patterns (permission denied, missing \
                 command, network errors, and similar)."
                    .to_string(),
            ),
        }
    }
}

//! The interactive-session state machine.
//!
//! Drives either a local PTY or an SSH channel through the same marker-framed
//! `Exec`/prompt-detection/timeout logic. States: `Idle`, `Running`,
//! `AwaitingInput`, `Closed`.

use crate::config;
use crate::error::{ShellError, ShellResult};
use crate::marker::MarkerSet;
use crate::output;
use crate::process;
use crate::prompt::{self, PromptType, SettleTimer};
use crate::pty_channel::PtyChannel;
use crate::recording::Recorder;
use crate::ssh::channel::SshChannel;
use crate::ssh::transport::SshTransport;
use crate::ssh::tunnel::{TunnelConfig, TunnelManager, TunnelStatus, TunnelType};
use crate::sudo_cache::{SudoCache, SudoPassword};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Result of executing a command, or of feeding a session more input.
#[derive(Debug, Clone, Serialize)]
pub struct ExecResult {
    pub session_id: String,
    pub status: ExecStatus,
    pub exit_code: Option<i32>,
    pub duration_seconds: f64,
    pub lines: Vec<String>,
    pub timed_out: bool,
    pub prompt_type: Option<PromptType>,
    pub prompt_text: Option<String>,
    pub sudo_authenticated: bool,
    pub sudo_expires_in_seconds: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecStatus {
    Completed,
    AwaitingInput,
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum State {
    Idle,
    Running,
    AwaitingInput,
    Closed,
}

/// Which channel a session is backed by.
enum Backend {
    Local(PtyChannel),
    Ssh {
        channel: SshChannel,
        transport: Arc<SshTransport>,
    },
}

/// Information about a session, returned by `status`/`list`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub mode: &'static str,
    pub alive: bool,
    pub cwd: Option<String>,
    pub sudo_cache_active: bool,
    pub sudo_expires_in_seconds: Option<u64>,
    pub saved_tunnels: Vec<TunnelConfig>,
}

pub struct Session {
    id: String,
    backend: Backend,
    state: State,
    cwd: Option<String>,
    recorder: Option<Recorder>,
    sudo_cache: Arc<SudoCache>,
    tunnels: Option<Arc<TunnelManager>>,
    /// Tunnel configs surviving a close/disconnect, kept so
    /// `tunnel_restore` can recreate them without the caller re-specifying
    /// every field.
    saved_tunnels: Vec<TunnelConfig>,
    /// Markers for the in-flight command, kept across an `AwaitingInput`
    /// round-trip so `provide_input` can resume the same scan.
    pending_markers: Option<MarkerSet>,
    pending_lines: Vec<String>,
    /// Bytes read but not yet terminated by a newline when the prompt fired
    /// -- a prompt like `password: ` is never followed by one, so the line
    /// it's on is still "open" when `AwaitingInput` is reported.
    pending_partial: String,
    pending_deadline: Option<Instant>,
}

impl Session {
    pub(crate) async fn new_local(
        id: String,
        working_directory: Option<String>,
        sudo_cache: Arc<SudoCache>,
        recorder: Option<Recorder>,
    ) -> ShellResult<Self> {
        let channel = PtyChannel::spawn(working_directory.as_deref()).await?;
        let mut session = Self {
            id,
            backend: Backend::Local(channel),
            state: State::Idle,
            cwd: working_directory,
            recorder,
            sudo_cache,
            tunnels: None,
            saved_tunnels: Vec::new(),
            pending_markers: None,
            pending_lines: Vec::new(),
            pending_partial: String::new(),
            pending_deadline: None,
        };
        session.init_shell().await?;
        Ok(session)
    }

    pub(crate) async fn new_ssh(
        id: String,
        transport: Arc<SshTransport>,
        sudo_cache: Arc<SudoCache>,
        recorder: Option<Recorder>,
    ) -> ShellResult<Self> {
        let raw_channel = transport.open_shell_channel().await?;
        let channel = SshChannel::new(raw_channel);
        let tunnels = Arc::new(TunnelManager::new(
            transport.clone(),
            *config::MAX_TUNNELS_PER_SESSION,
        ));
        let mut session = Self {
            id,
            backend: Backend::Ssh { channel, transport },
            state: State::Idle,
            cwd: None,
            recorder,
            sudo_cache,
            tunnels: Some(tunnels),
            saved_tunnels: Vec::new(),
            pending_markers: None,
            pending_lines: Vec::new(),
            pending_partial: String::new(),
            pending_deadline: None,
        };
        session.init_shell().await?;
        Ok(session)
    }

    #[must_use]
    pub fn mode(&self) -> &'static str {
        match self.backend {
            Backend::Local(_) => "local",
            Backend::Ssh { .. } => "ssh",
        }
    }

    #[must_use]
    pub fn ssh_transport(&self) -> Option<&Arc<SshTransport>> {
        match &self.backend {
            Backend::Ssh { transport, .. } => Some(transport),
            Backend::Local(_) => None,
        }
    }

    #[must_use]
    pub fn cwd(&self) -> Option<&str> {
        self.cwd.as_deref()
    }

    async fn write_all(&mut self, bytes: &[u8]) -> ShellResult<()> {
        match &mut self.backend {
            Backend::Local(c) => c.write_all(bytes).await,
            Backend::Ssh { channel, .. } => channel.write_all(bytes).await,
        }
    }

    async fn read_line(&mut self, buf: &mut String) -> ShellResult<usize> {
        match &mut self.backend {
            Backend::Local(c) => c.read_line(buf).await,
            Backend::Ssh { channel, .. } => channel.read_line(buf).await,
        }
    }

    async fn read_raw(&mut self, buf: &mut [u8]) -> ShellResult<usize> {
        match &mut self.backend {
            Backend::Local(c) => c.read(buf).await,
            Backend::Ssh { channel, .. } => channel.read(buf).await,
        }
    }

    async fn send_interrupt_bytes(&mut self) -> ShellResult<()> {
        match &mut self.backend {
            Backend::Local(c) => c.interrupt().await,
            Backend::Ssh { channel, .. } => channel.interrupt().await,
        }
    }

    /// Disable echo/PS1 noise and drain the shell's startup chatter.
    async fn init_shell(&mut self) -> ShellResult<()> {
        self.write_all(
            b"stty -echo\nexport PS1='' PS2='' PROMPT_COMMAND='' PAGER=cat GIT_PAGER=cat\nshopt -s expand_aliases\n",
        )
        .await?;

        let drain_marker = MarkerSet::new();
        self.write_all(format!("echo '{}'\n", drain_marker.start).as_bytes())
            .await?;

        let mut line = String::new();
        let _ = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                line.clear();
                match self.read_line(&mut line).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        if clean_line(&line).contains(&drain_marker.start) {
                            break;
                        }
                    }
                }
            }
        })
        .await;

        if let Some(recorder) = &self.recorder {
            recorder.record_start().await;
        }

        Ok(())
    }

    /// Discard any bytes left over from a command that timed out before a
    /// new one is installed, so stale output from the still-running
    /// previous command is never attributed to the next `Exec`.
    async fn drain_stale(&mut self) {
        let mut buf = [0u8; 4096];
        let mut drained = 0usize;
        const CAP: usize = 64 * 1024;
        loop {
            match tokio::time::timeout(Duration::from_millis(20), self.read_raw(&mut buf)).await {
                Ok(Ok(0)) | Err(_) | Ok(Err(_)) => break,
                Ok(Ok(n)) => {
                    drained += n;
                    if drained >= CAP {
                        break;
                    }
                }
            }
        }
    }

    /// Execute a command, returning once it completes, is interrupted by a
    /// timeout, or the shell starts waiting on an interactive prompt.
    pub async fn exec(&mut self, command: &str, timeout_ms: u64) -> ShellResult<ExecResult> {
        if self.state == State::Closed {
            return Err(ShellError::InvalidState(self.id.clone()));
        }
        if self.state != State::Idle {
            return Err(ShellError::InvalidState(format!(
                "session '{}' has an operation in flight",
                self.id
            )));
        }
        if contains_heredoc(command) {
            return Err(ShellError::InvalidArgument(
                "Heredocs are not supported in marker-framed exec".to_string(),
            ));
        }
        if let Err(reason) = process::validate_command(command) {
            return Err(ShellError::InvalidArgument(reason));
        }

        self.drain_stale().await;

        if let Some(recorder) = &self.recorder {
            recorder.record_input(command, false).await;
        }

        let markers = MarkerSet::new();
        // The end marker is echoed as three concatenated shell words so the
        // exit status expands outside any quoting that would block it:
        // 'prefix' "$status" 'suffix'. A final `pwd` line lets us track the
        // shell's cwd across commands without parsing the prompt.
        let wrapper = format!(
            "echo '{start}'\n{{ {command}; }} 2>&1\n__shellmcp_ec=$?\necho '{end_prefix}'\"$__shellmcp_ec\"'{end_suffix}'\npwd\n",
            start = markers.start,
            end_prefix = markers.end_prefix(),
            end_suffix = crate::marker::END_SUFFIX,
        );

        self.write_all(wrapper.as_bytes()).await?;
        self.state = State::Running;

        let timeout = Duration::from_millis(timeout_ms.min(*config::MAX_TIMEOUT_MS));
        self.run_scan_loop(&markers, timeout, Vec::new(), String::new()).await
    }

    /// Provide input while the session is `AwaitingInput`, resuming the scan
    /// loop for the in-flight command.
    pub async fn provide_input(
        &mut self,
        input: &str,
        cache_for_sudo: bool,
    ) -> ShellResult<ExecResult> {
        if self.state != State::AwaitingInput {
            return Err(ShellError::InvalidState(format!(
                "session '{}' is not awaiting input",
                self.id
            )));
        }

        if let Some(recorder) = &self.recorder {
            recorder.record_input(input, cache_for_sudo).await;
        }
        if cache_for_sudo {
            self.sudo_cache
                .set(&self.id, SudoPassword::new(input.as_bytes().to_vec()))
                .await;
        }

        self.write_all(format!("{input}\n").as_bytes()).await?;
        self.state = State::Running;

        let markers = self
            .pending_markers
            .take()
            .ok_or_else(|| ShellError::InvalidState("no command pending input".to_string()))?;
        let remaining = self.pending_deadline_remaining();
        self.run_scan_loop(
            &markers,
            remaining,
            std::mem::take(&mut self.pending_lines),
            std::mem::take(&mut self.pending_partial),
        )
        .await
    }

    /// Write raw bytes without marker framing, then read back output until
    /// the stream settles -- the way a human typing at a terminal would.
    /// Used for control sequences and interactive programs that don't fit
    /// the command/exit-status model `exec` assumes.
    pub async fn send_raw(&mut self, bytes: &[u8], idle_timeout_ms: u64) -> ShellResult<ExecResult> {
        if self.state == State::Closed {
            return Err(ShellError::InvalidState(self.id.clone()));
        }
        if !bytes.is_empty() {
            self.write_all(bytes).await?;
        }

        let idle_timeout = Duration::from_millis(idle_timeout_ms.max(50));
        let chunk_timeout = Duration::from_millis(200);
        let max_total = (idle_timeout * 5).max(Duration::from_secs(30));
        let start = Instant::now();

        let mut accumulated = Vec::<u8>::new();
        let mut last_meaningful_change = Instant::now();
        let mut prev_len = 0usize;
        let mut buf = [0u8; 4096];

        loop {
            match tokio::time::timeout(chunk_timeout, self.read_raw(&mut buf)).await {
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => {
                    accumulated.extend_from_slice(&buf[..n]);
                    if accumulated.len() - prev_len > 10 {
                        last_meaningful_change = Instant::now();
                        prev_len = accumulated.len();
                    }
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {}
            }

            if !accumulated.is_empty() && last_meaningful_change.elapsed() >= idle_timeout {
                break;
            }
            if start.elapsed() >= max_total {
                break;
            }
        }

        let raw = String::from_utf8_lossy(&accumulated);
        let lines: Vec<String> = raw
            .lines()
            .map(clean_line)
            .filter(|l| !l.is_empty())
            .collect();

        Ok(ExecResult {
            session_id: self.id.clone(),
            status: ExecStatus::Completed,
            exit_code: None,
            duration_seconds: start.elapsed().as_secs_f64(),
            lines,
            timed_out: false,
            prompt_type: None,
            prompt_text: None,
            sudo_authenticated: false,
            sudo_expires_in_seconds: None,
        })
    }

    /// Interrupt the foreground process. Valid in any non-closed state.
    pub async fn interrupt(&mut self) -> ShellResult<()> {
        if self.state == State::Closed {
            return Err(ShellError::InvalidState(self.id.clone()));
        }
        self.send_interrupt_bytes().await
    }

    #[must_use]
    pub async fn status(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            mode: self.mode(),
            alive: self.state != State::Closed,
            cwd: self.cwd.clone(),
            sudo_cache_active: self.sudo_cache.get(&self.id).await.is_some(),
            sudo_expires_in_seconds: self.sudo_cache.expires_in_seconds(&self.id).await,
            saved_tunnels: self.saved_tunnels.clone(),
        }
    }

    pub async fn close(&mut self) -> ShellResult<()> {
        if self.state == State::Closed {
            return Ok(());
        }
        self.state = State::Closed;
        let _ = self.write_all(b"exit\n").await;

        if let Some(tunnels) = &self.tunnels {
            let configs = tunnels.close_all().await;
            self.saved_tunnels.extend(configs);
        }
        self.sudo_cache.clear(&self.id).await;

        if let Backend::Local(channel) = &mut self.backend {
            if channel.wait_with_timeout(Duration::from_secs(2)).await.is_err() {
                channel.kill();
            }
        }

        if let Some(recorder) = &self.recorder {
            recorder.finalize().await;
        }
        Ok(())
    }

    // -- tunnels ----------------------------------------------------------

    fn tunnel_manager(&self) -> ShellResult<&Arc<TunnelManager>> {
        self.tunnels
            .as_ref()
            .ok_or_else(|| ShellError::InvalidArgument("tunnels require an ssh session".to_string()))
    }

    pub async fn tunnel_create_local(
        &self,
        local_host: &str,
        local_port: u16,
        remote_host: &str,
        remote_port: u16,
    ) -> ShellResult<TunnelStatus> {
        self.tunnel_manager()?
            .create_local(local_host, local_port, remote_host, remote_port)
            .await
    }

    pub async fn tunnel_create_reverse(
        &self,
        remote_host: &str,
        remote_port: u16,
        local_host: &str,
        local_port: u16,
    ) -> ShellResult<TunnelStatus> {
        self.tunnel_manager()?
            .create_reverse(remote_host, remote_port, local_host, local_port)
            .await
    }

    pub async fn tunnel_list(&self) -> ShellResult<Vec<TunnelStatus>> {
        Ok(self.tunnel_manager()?.list().await)
    }

    pub async fn tunnel_close(&mut self, id: &str) -> ShellResult<()> {
        let config = {
            let tm = self.tunnel_manager()?;
            tm.list().await.into_iter().find(|t| t.id == id)
        };
        self.tunnel_manager()?.close(id).await?;
        if let Some(status) = config {
            self.saved_tunnels.push(status_to_config(&status));
        }
        Ok(())
    }

    /// Recreate every saved tunnel config (from prior closes or a
    /// disconnect) on the session's current SSH transport.
    pub async fn tunnel_restore(&mut self) -> ShellResult<Vec<TunnelStatus>> {
        let tm = self.tunnel_manager()?.clone();
        let pending = std::mem::take(&mut self.saved_tunnels);
        let mut restored = Vec::with_capacity(pending.len());
        for cfg in pending {
            let status = match cfg.tunnel_type {
                TunnelType::Local => {
                    tm.create_local(&cfg.local_host, cfg.local_port, &cfg.remote_host, cfg.remote_port)
                        .await?
                }
                TunnelType::Reverse => {
                    tm.create_reverse(&cfg.remote_host, cfg.remote_port, &cfg.local_host, cfg.local_port)
                        .await?
                }
            };
            restored.push(status);
        }
        Ok(restored)
    }

    // -- scan loop internals --------------------------------------------

    fn pending_deadline_remaining(&self) -> Duration {
        self.pending_deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::from_secs(30))
    }

    /// Core read loop: scans for the end marker (command complete), a
    /// settled interactive prompt (awaiting input), or a deadline timeout.
    ///
    /// Reads raw bytes rather than lines: a prompt like `password: ` is
    /// never newline-terminated, so line-buffered reads would block past it
    /// until the overall deadline instead of reporting `awaiting_input`
    /// after the settle period. `partial` carries the bytes read since the
    /// last newline -- the prompt classifier scans it alongside `tail_buf`.
    async fn run_scan_loop(
        &mut self,
        markers: &MarkerSet,
        timeout: Duration,
        mut carried_lines: Vec<String>,
        mut carried_partial: String,
    ) -> ShellResult<ExecResult> {
        let start = Instant::now();
        let deadline = start + timeout;
        let mut lines: Vec<String> = std::mem::take(&mut carried_lines);
        let mut partial = std::mem::take(&mut carried_partial);
        let mut tail_buf = String::new();
        let mut settle = SettleTimer::new(Duration::from_millis(*config::PROMPT_SETTLE_MS));
        let mut buf = [0u8; 4096];
        let max_lines = *config::MAX_OUTPUT_LINES;
        let poll_interval = Duration::from_millis(20);

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return self.handle_timeout(lines, partial).await;
            }

            let read = tokio::time::timeout(remaining.min(poll_interval), self.read_raw(&mut buf)).await;

            match read {
                Ok(Ok(0)) => return Err(ShellError::Io("shell process exited unexpectedly".to_string())),
                Ok(Ok(n)) => {
                    settle.note_activity();
                    partial.push_str(&String::from_utf8_lossy(&buf[..n]));

                    while let Some(pos) = partial.find('\n') {
                        let raw_line: String = partial.drain(..=pos).collect();
                        let cleaned = clean_line(&raw_line);

                        if let Some(code) = markers.parse_end(&cleaned) {
                            self.capture_cwd_from_partial(&mut partial, remaining).await;
                            if let Some(recorder) = &self.recorder {
                                recorder.record_output(&lines.join("\n")).await;
                            }
                            self.state = State::Idle;
                            return Ok(ExecResult {
                                session_id: self.id.clone(),
                                status: ExecStatus::Completed,
                                exit_code: Some(code),
                                duration_seconds: start.elapsed().as_secs_f64(),
                                lines,
                                timed_out: false,
                                prompt_type: None,
                                prompt_text: None,
                                sudo_authenticated: false,
                                sudo_expires_in_seconds: None,
                            });
                        }

                        if MarkerSet::looks_like_marker(&cleaned) {
                            continue;
                        }

                        if !cleaned.is_empty() {
                            tail_buf.push_str(&cleaned);
                            tail_buf.push('\n');
                            if lines.len() < max_lines {
                                lines.push(cleaned);
                            }
                        }
                    }

                    if tail_buf.len() > *config::PROMPT_SCAN_WINDOW_BYTES {
                        let cut = tail_buf.len() - *config::PROMPT_SCAN_WINDOW_BYTES;
                        tail_buf.drain(..cut);
                    }
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    // Poll tick with no new bytes this round; fall through to
                    // the settle check below instead of treating it as the
                    // overall deadline (that's handled at the top of the loop).
                }
            }

            if settle.is_settled() {
                let mut scan_window = tail_buf.clone();
                scan_window.push_str(&partial);
                if let Some((kind, text)) = prompt::classify(&scan_window) {
                    return self.handle_prompt(markers, lines, partial, kind, text).await;
                }
            }
        }
    }

    /// The wrapper appends a trailing `pwd` after the end marker; read
    /// forward (best-effort, short timeout) until `partial` has a full line
    /// to keep `cwd` current.
    async fn capture_cwd_from_partial(&mut self, partial: &mut String, remaining_budget: Duration) {
        let deadline = Instant::now() + remaining_budget.min(Duration::from_millis(500));
        let mut buf = [0u8; 1024];
        loop {
            if let Some(pos) = partial.find('\n') {
                let raw_line: String = partial.drain(..=pos).collect();
                let cleaned = clean_line(&raw_line);
                if !cleaned.is_empty() && !MarkerSet::looks_like_marker(&cleaned) {
                    self.cwd = Some(cleaned);
                }
                return;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return;
            }
            match tokio::time::timeout(remaining, self.read_raw(&mut buf)).await {
                Ok(Ok(n)) if n > 0 => partial.push_str(&String::from_utf8_lossy(&buf[..n])),
                _ => return,
            }
        }
    }

    async fn handle_prompt(
        &mut self,
        markers: &MarkerSet,
        mut lines: Vec<String>,
        partial: String,
        kind: PromptType,
        text: String,
    ) -> ShellResult<ExecResult> {
        let prompt_line = clean_line(&partial);
        if !prompt_line.is_empty() {
            lines.push(prompt_line);
        }

        // Auto-inject a cached sudo password for password prompts.
        if kind == PromptType::Password {
            if let Some(cached) = self.sudo_cache.get(&self.id).await {
                let password = String::from_utf8_lossy(cached.as_bytes()).to_string();
                self.write_all(format!("{password}\n").as_bytes()).await?;
                let remaining = self.pending_deadline_remaining();
                let mut result =
                    Box::pin(self.run_scan_loop(markers, remaining, lines, String::new())).await?;
                result.sudo_authenticated = true;
                result.sudo_expires_in_seconds =
                    self.sudo_cache.expires_in_seconds(&self.id).await;
                return Ok(result);
            }
        }

        self.state = State::AwaitingInput;
        self.pending_markers = Some(markers.clone());
        self.pending_lines = lines.clone();
        self.pending_partial = String::new();
        self.pending_deadline = Some(Instant::now() + Duration::from_secs(30));

        Ok(ExecResult {
            session_id: self.id.clone(),
            status: ExecStatus::AwaitingInput,
            exit_code: None,
            duration_seconds: 0.0,
            lines,
            timed_out: false,
            prompt_type: Some(kind),
            prompt_text: Some(text),
            sudo_authenticated: false,
            sudo_expires_in_seconds: None,
        })
    }

    /// A deadline fired. No SIGINT is sent automatically -- the shell is
    /// left exactly as it was, still running
    /// the foreground command, and the session goes back to `Idle` so the
    /// caller can keep using it (including calling `Interrupt` explicitly).
    async fn handle_timeout(&mut self, mut lines: Vec<String>, partial: String) -> ShellResult<ExecResult> {
        let trailing = clean_line(&partial);
        if !trailing.is_empty() {
            lines.push(trailing);
        }
        self.state = State::Idle;
        Ok(ExecResult {
            session_id: self.id.clone(),
            status: ExecStatus::Timeout,
            exit_code: None,
            duration_seconds: 0.0,
            lines,
            timed_out: true,
            prompt_type: None,
            prompt_text: None,
            sudo_authenticated: false,
            sudo_expires_in_seconds: None,
        })
    }
}

fn status_to_config(status: &TunnelStatus) -> TunnelConfig {
    TunnelConfig {
        tunnel_type: status.tunnel_type,
        local_host: status.local_host.clone(),
        local_port: status.local_port,
        remote_host: status.remote_host.clone(),
        remote_port: status.remote_port,
    }
}

fn contains_heredoc(command: &str) -> bool {
    static HEREDOC: std::sync::LazyLock<regex::Regex> =
        std::sync::LazyLock::new(|| regex::Regex::new(r"<<-?\s*['\"]?\w+").unwrap());
    HEREDOC.is_match(command)
}

fn clean_line(raw: &str) -> String {
    output::strip_ansi(raw)
        .trim_end_matches('\n')
        .trim_end_matches('\r')
        .to_string()
}

//! SSH connection setup: authentication, interactive shell channel, SFTP.
//!
//! Uses `russh` directly (not a higher-level wrapper) because the tunnel
//! manager needs `channel_open_direct_tcpip`/`tcpip_forward`, which wrappers
//! like `async-ssh2-tokio` do not expose.

use crate::error::{ShellError, ShellResult};
use crate::ssh::handler::{RemoteForwardMap, ShellSshHandler};
use russh::client::{self, Handle};
use russh::keys::{PrivateKeyWithHashAlg, load_secret_key};
use std::path::Path;
use std::sync::Arc;

/// Authentication method for an outbound SSH connection.
pub enum SshAuth {
    Password(String),
    KeyFile { path: String, passphrase: Option<String> },
}

pub struct SshTransport {
    pub handle: Handle<ShellSshHandler>,
    pub remote_forwards: RemoteForwardMap,
    pub host: String,
    pub user: String,
}

impl SshTransport {
    /// Connect and authenticate. Does not open a shell channel yet -- callers
    /// request one separately via [`SshTransport::open_shell_channel`].
    pub async fn connect(
        host: &str,
        port: u16,
        user: &str,
        auth: SshAuth,
    ) -> ShellResult<Self> {
        let config = Arc::new(client::Config::default());
        let sshhandler = ShellSshHandler::new();
        let remote_forwards = sshhandler.remote_forwards.clone();

        let mut handle = client::connect(config, (host, port), sshhandler)
            .await
            .map_err(|e| ShellError::Transport(format!("connect to {host}:{port} failed: {e}")))?;

        let authenticated = match auth {
            SshAuth::Password(password) => handle
                .authenticate_password(user, password)
                .await
                .map_err(|e| ShellError::Transport(e.to_string()))?,
            SshAuth::KeyFile { path, passphrase } => {
                let key = load_secret_key(Path::new(&path), passphrase.as_deref()).map_err(|e| {
                    ShellError::AuthFailed {
                        host: host.to_string(),
                        user: user.to_string(),
                        reason: format!("failed to load key {path}: {e}"),
                    }
                })?;
                let key_with_hash = PrivateKeyWithHashAlg::new(Arc::new(key), None);
                handle
                    .authenticate_publickey(user, key_with_hash)
                    .await
                    .map_err(|e| ShellError::Transport(e.to_string()))?
            }
        };

        if !authenticated.success() {
            return Err(ShellError::AuthFailed {
                host: host.to_string(),
                user: user.to_string(),
                reason: "rejected by server".to_string(),
            });
        }

        Ok(Self {
            handle,
            remote_forwards,
            host: host.to_string(),
            user: user.to_string(),
        })
    }

    /// Open a channel, request a PTY, and start a login shell on it.
    pub async fn open_shell_channel(&self) -> ShellResult<russh::Channel<client::Msg>> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| ShellError::Transport(format!("channel_open_session: {e}")))?;

        channel
            .request_pty(
                false,
                "xterm-256color",
                250,
                24,
                0,
                0,
                &[],
            )
            .await
            .map_err(|e| ShellError::Transport(format!("request_pty: {e}")))?;

        channel
            .request_shell(false)
            .await
            .map_err(|e| ShellError::Transport(format!("request_shell: {e}")))?;

        Ok(channel)
    }

    /// Open a direct-tcpip channel for a local-tunnel connection.
    pub async fn open_direct_tcpip(
        &self,
        remote_host: &str,
        remote_port: u16,
    ) -> ShellResult<russh::Channel<client::Msg>> {
        self.handle
            .channel_open_direct_tcpip(remote_host, u32::from(remote_port), "127.0.0.1", 0)
            .await
            .map_err(|e| ShellError::Transport(format!("channel_open_direct_tcpip: {e}")))
    }

    /// Ask the server to listen on `(bind_addr, port)` for a reverse tunnel.
    /// Returns the bound port (server-assigned when `port == 0`).
    pub async fn tcpip_forward(&self, bind_addr: &str, port: u16) -> ShellResult<u32> {
        self.handle
            .tcpip_forward(bind_addr, u32::from(port))
            .await
            .map_err(|e| ShellError::Transport(format!("tcpip_forward: {e}")))
    }

    /// Cancel a previously requested reverse-forward listener.
    pub async fn cancel_tcpip_forward(&self, bind_addr: &str, port: u32) -> ShellResult<()> {
        self.handle
            .cancel_tcpip_forward(bind_addr, port)
            .await
            .map_err(|e| ShellError::Transport(format!("cancel_tcpip_forward: {e}")))?;
        Ok(())
    }

    /// Open an SFTP subsystem channel, returning a ready-to-use SFTP client.
    pub async fn open_sftp(&self) -> ShellResult<russh_sftp::client::SftpSession> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| ShellError::Transport(format!("channel_open_session: {e}")))?;

        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| ShellError::Transport(format!("request_subsystem(sftp): {e}")))?;

        russh_sftp::client::SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| ShellError::Transport(format!("sftp session init: {e}")))
    }
}

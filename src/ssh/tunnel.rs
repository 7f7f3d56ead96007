//! Local and reverse TCP tunnels over an SSH transport.
//!
//! Grounded on `other_examples`' sshore `ssh/tunnel.rs`: local forwards bind a
//! listener and splice each accepted connection to a fresh `direct-tcpip`
//! channel; reverse forwards request a server-side listener via
//! `tcpip_forward` and bridge server-pushed forwarded-tcpip channels (handled
//! in [`crate::ssh::handler::ShellSshHandler`]) back to a local destination.
//! Byte and connection counters are plain atomics -- no mutex on the splice
//! hot path.

use crate::error::{ShellError, ShellResult};
use crate::ssh::transport::SshTransport;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelType {
    Local,
    Reverse,
}

/// Saved tunnel configuration, carried across a session close so `Restore`
/// can recreate it.
#[derive(Debug, Clone, Serialize)]
pub struct TunnelConfig {
    pub tunnel_type: TunnelType,
    pub local_host: String,
    pub local_port: u16,
    pub remote_host: String,
    pub remote_port: u16,
}

/// Shared with the reverse-tunnel handler
/// ([`crate::ssh::handler::ShellSshHandler::server_channel_open_forwarded_tcpip`])
/// via [`crate::ssh::handler::RemoteForwardMap`] so a server-pushed forwarded
/// connection updates the same counters a local-tunnel splice does.
pub(crate) struct TunnelCounters {
    pub(crate) active_conn_count: AtomicU64,
    pub(crate) total_conn_count: AtomicU64,
    pub(crate) bytes_sent: AtomicU64,
    pub(crate) bytes_received: AtomicU64,
}

impl TunnelCounters {
    fn new() -> Self {
        Self {
            active_conn_count: AtomicU64::new(0),
            total_conn_count: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
        }
    }
}

pub struct Tunnel {
    pub id: String,
    pub config: TunnelConfig,
    counters: Arc<TunnelCounters>,
    cancel: CancellationToken,
}

#[derive(Debug, Clone, Serialize)]
pub struct TunnelStatus {
    pub id: String,
    pub tunnel_type: TunnelType,
    pub local_host: String,
    pub local_port: u16,
    pub remote_host: String,
    pub remote_port: u16,
    pub active_conn_count: u64,
    pub total_conn_count: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

impl Tunnel {
    pub fn status(&self) -> TunnelStatus {
        TunnelStatus {
            id: self.id.clone(),
            tunnel_type: self.config.tunnel_type,
            local_host: self.config.local_host.clone(),
            local_port: self.config.local_port,
            remote_host: self.config.remote_host.clone(),
            remote_port: self.config.remote_port,
            active_conn_count: self.counters.active_conn_count.load(Ordering::Relaxed),
            total_conn_count: self.counters.total_conn_count.load(Ordering::Relaxed),
            bytes_sent: self.counters.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.counters.bytes_received.load(Ordering::Relaxed),
        }
    }

    fn close(&self) {
        self.cancel.cancel();
    }
}

/// Per-session collection of live tunnels.
pub struct TunnelManager {
    transport: Arc<SshTransport>,
    tunnels: Mutex<Vec<Tunnel>>,
    max_tunnels: usize,
}

impl TunnelManager {
    #[must_use]
    pub fn new(transport: Arc<SshTransport>, max_tunnels: usize) -> Self {
        Self {
            transport,
            tunnels: Mutex::new(Vec::new()),
            max_tunnels,
        }
    }

    pub async fn create_local(
        &self,
        local_host: &str,
        local_port: u16,
        remote_host: &str,
        remote_port: u16,
    ) -> ShellResult<TunnelStatus> {
        let mut tunnels = self.tunnels.lock().await;
        if tunnels.len() >= self.max_tunnels {
            return Err(ShellError::ResourceExhausted(format!(
                "tunnel limit reached ({}/{})",
                tunnels.len(),
                self.max_tunnels
            )));
        }

        let listener = TcpListener::bind((local_host, local_port))
            .await
            .map_err(|e| {
                ShellError::ResourceExhausted(format!("bind {local_host}:{local_port}: {e}"))
            })?;
        let bound_port = listener.local_addr().map_err(ShellError::from)?.port();

        let id = uuid::Uuid::new_v4().to_string();
        let counters = Arc::new(TunnelCounters::new());
        let cancel = CancellationToken::new();

        let transport = self.transport.clone();
        let remote_host_owned = remote_host.to_string();
        let counters_task = counters.clone();
        let cancel_task = cancel.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel_task.cancelled() => break,
                    accepted = listener.accept() => {
                        let Ok((tcp_stream, _peer)) = accepted else { continue };
                        let transport = transport.clone();
                        let remote_host = remote_host_owned.clone();
                        let counters = counters_task.clone();
                        let cancel = cancel_task.clone();

                        tokio::spawn(async move {
                            counters.active_conn_count.fetch_add(1, Ordering::Relaxed);
                            counters.total_conn_count.fetch_add(1, Ordering::Relaxed);

                            match transport.open_direct_tcpip(&remote_host, remote_port).await {
                                Ok(channel) => {
                                    let mut channel_stream = channel.into_stream();
                                    let mut tcp_stream = tcp_stream;
                                    tokio::select! {
                                        _ = cancel.cancelled() => {}
                                        result = splice_counted(&mut tcp_stream, &mut channel_stream, &counters) => {
                                            let _ = result;
                                        }
                                    }
                                }
                                Err(e) => {
                                    tracing::warn!(remote_host, remote_port, error = %e, "local tunnel: direct-tcpip open failed");
                                }
                            }

                            counters.active_conn_count.fetch_sub(1, Ordering::Relaxed);
                        });
                    }
                }
            }
        });

        let tunnel = Tunnel {
            id: id.clone(),
            config: TunnelConfig {
                tunnel_type: TunnelType::Local,
                local_host: local_host.to_string(),
                local_port: bound_port,
                remote_host: remote_host.to_string(),
                remote_port,
            },
            counters,
            cancel,
        };
        let status = tunnel.status();
        tunnels.push(tunnel);
        Ok(status)
    }

    pub async fn create_reverse(
        &self,
        remote_host: &str,
        remote_port: u16,
        local_host: &str,
        local_port: u16,
    ) -> ShellResult<TunnelStatus> {
        let mut tunnels = self.tunnels.lock().await;
        if tunnels.len() >= self.max_tunnels {
            return Err(ShellError::ResourceExhausted(format!(
                "tunnel limit reached ({}/{})",
                tunnels.len(),
                self.max_tunnels
            )));
        }

        let bound = self.transport.tcpip_forward(remote_host, remote_port).await?;
        let actual_port = if bound != 0 { bound as u16 } else { remote_port };

        let id = uuid::Uuid::new_v4().to_string();
        let counters = Arc::new(TunnelCounters::new());
        let cancel = CancellationToken::new();

        {
            let mut map = self.transport.remote_forwards.lock().await;
            map.insert(
                (remote_host.to_string(), u32::from(actual_port)),
                crate::ssh::handler::ReverseForwardTarget {
                    local_host: local_host.to_string(),
                    local_port,
                    counters: counters.clone(),
                },
            );
        }

        let tunnel = Tunnel {
            id: id.clone(),
            config: TunnelConfig {
                tunnel_type: TunnelType::Reverse,
                local_host: local_host.to_string(),
                local_port,
                remote_host: remote_host.to_string(),
                remote_port: actual_port,
            },
            counters,
            cancel,
        };
        let status = tunnel.status();
        tunnels.push(tunnel);
        Ok(status)
    }

    pub async fn list(&self) -> Vec<TunnelStatus> {
        self.tunnels.lock().await.iter().map(Tunnel::status).collect()
    }

    pub async fn close(&self, id: &str) -> ShellResult<()> {
        let mut tunnels = self.tunnels.lock().await;
        let pos = tunnels
            .iter()
            .position(|t| t.id == id)
            .ok_or_else(|| ShellError::TunnelNotFound(id.to_string()))?;
        let tunnel = tunnels.remove(pos);
        if tunnel.config.tunnel_type == TunnelType::Reverse {
            let _ = self
                .transport
                .cancel_tcpip_forward(&tunnel.config.remote_host, u32::from(tunnel.config.remote_port))
                .await;
            self.transport
                .remote_forwards
                .lock()
                .await
                .remove(&(tunnel.config.remote_host.clone(), u32::from(tunnel.config.remote_port)));
        }
        tunnel.close();
        Ok(())
    }

    pub async fn close_all(&self) -> Vec<TunnelConfig> {
        let mut tunnels = self.tunnels.lock().await;
        let configs: Vec<TunnelConfig> = tunnels.iter().map(|t| t.config.clone()).collect();
        for tunnel in tunnels.drain(..) {
            tunnel.close();
        }
        configs
    }
}

/// Bidirectional copy that attributes byte counts to the tunnel's atomic
/// counters, used instead of a plain `copy_bidirectional` so `bytes_sent`
/// and `bytes_received` stay accurate per tunnel.
pub(crate) async fn splice_counted<A, B>(
    a: &mut A,
    b: &mut B,
    counters: &TunnelCounters,
) -> ShellResult<()>
where
    A: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    B: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (sent, received) = tokio::io::copy_bidirectional(a, b)
        .await
        .map_err(ShellError::from)?;
    counters.bytes_sent.fetch_add(sent, Ordering::Relaxed);
    counters.bytes_received.fetch_add(received, Ordering::Relaxed);
    Ok(())
}

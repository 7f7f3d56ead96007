//! `russh::client::Handler` implementation.
//!
//! Accepts any server host key on first use and does not persist a
//! known-hosts file -- see DESIGN.md's Open Question on host-key trust.
//! Also carries the map that lets a forwarded-tcpip channel pushed by the
//! server (for reverse tunnels) find its local bridge target.

use crate::ssh::tunnel::{splice_counted, TunnelCounters};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::sync::Mutex;

/// What a `(bind_addr, bound_port)` the server is forwarding from should
/// bridge traffic to, plus a handle to the owning tunnel's counters so a
/// server-pushed forwarded connection is counted the same way a local
/// tunnel's splice is.
#[derive(Clone)]
pub struct ReverseForwardTarget {
    pub local_host: String,
    pub local_port: u16,
    pub counters: Arc<TunnelCounters>,
}

/// Maps a `(bind_addr, bound_port)` the server is forwarding from to the
/// reverse tunnel that should bridge traffic for it.
pub type RemoteForwardMap = Arc<Mutex<HashMap<(String, u32), ReverseForwardTarget>>>;

pub struct ShellSshHandler {
    pub remote_forwards: RemoteForwardMap,
}

impl ShellSshHandler {
    #[must_use]
    pub fn new() -> Self {
        Self {
            remote_forwards: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl Default for ShellSshHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl russh::client::Handler for ShellSshHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        // Trust-on-first-use, no persisted known_hosts file -- scope excludes
        // persisted state beyond recording files.
        Ok(true)
    }

    async fn server_channel_open_forwarded_tcpip(
        &mut self,
        channel: russh::Channel<russh::client::Msg>,
        connected_address: &str,
        connected_port: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut russh::client::Session,
    ) -> Result<(), Self::Error> {
        let target = {
            let map = self.remote_forwards.lock().await;
            map.get(&(connected_address.to_string(), connected_port))
                .cloned()
        };

        let Some(ReverseForwardTarget {
            local_host,
            local_port,
            counters,
        }) = target
        else {
            tracing::warn!(
                connected_address,
                connected_port,
                "forwarded-tcpip channel with no registered reverse-tunnel target"
            );
            return Ok(());
        };

        tokio::spawn(async move {
            counters.active_conn_count.fetch_add(1, Ordering::Relaxed);
            counters.total_conn_count.fetch_add(1, Ordering::Relaxed);

            let mut channel_stream = channel.into_stream();
            match tokio::net::TcpStream::connect((local_host.as_str(), local_port)).await {
                Ok(mut local_stream) => {
                    // Argument order matches `create_local`'s convention:
                    // the local-side stream goes first so `bytes_sent`
                    // always means "toward the SSH peer" and `bytes_received`
                    // always means "from the SSH peer", regardless of
                    // which direction opened the connection.
                    let _ = splice_counted(&mut local_stream, &mut channel_stream, &counters).await;
                }
                Err(e) => {
                    tracing::warn!(local_host, local_port, error = %e, "reverse tunnel dial failed");
                }
            }

            counters.active_conn_count.fetch_sub(1, Ordering::Relaxed);
        });

        Ok(())
    }
}

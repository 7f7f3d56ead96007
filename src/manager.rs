//! Session registry: create/get/close, keyed by process-unique session id.
//!
//! A single `RwLock<HashMap<String, Arc<Mutex<Session>>>>` holding either local
//! or SSH sessions behind the same `Session` type, plus the process-wide sudo
//! cache and SSH auth rate limiter that every session shares.

use crate::error::{ShellError, ShellResult};
use crate::rate_limiter::AuthRateLimiter;
use crate::recording::Recorder;
use crate::session::{Session, SessionInfo};
use crate::ssh::transport::{SshAuth, SshTransport};
use crate::sudo_cache::SudoCache;
use crate::{config, marker};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{Mutex, RwLock};

fn new_session_id() -> String {
    format!("s_{}", marker::random_hex(8))
}

/// Periodically sweep expired sudo-cache entries so a long-lived server
/// doesn't accumulate zeroed-but-unreleased map slots for closed sessions
/// that never called `close`. Holds only a `Weak` ref so the ticker task
/// doesn't keep the cache (and its process) alive past the manager's drop.
fn spawn_eviction_ticker(cache: std::sync::Weak<SudoCache>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(30));
        loop {
            ticker.tick().await;
            match cache.upgrade() {
                Some(cache) => cache.evict_expired().await,
                None => break,
            }
        }
    });
}

fn unix_ts() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Arguments for creating a new session, mirroring `shell_session_create`'s
/// optional fields.
#[derive(Debug, Default)]
pub struct CreateSessionArgs {
    pub mode: Option<String>,
    pub working_directory: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub key_path: Option<String>,
}

/// Owns every live session plus the process-wide auxiliary state (sudo
/// cache, auth rate limiter) that sessions share. Create/close take the
/// registry write lock; per-session operations take the registry read lock
/// to fetch the session's own mutex, then lock only that session.
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<Mutex<Session>>>>,
    sudo_cache: Arc<SudoCache>,
    rate_limiter: Arc<AuthRateLimiter>,
}

impl SessionManager {
    #[must_use]
    pub fn new() -> Self {
        let sudo_cache = Arc::new(SudoCache::new());
        spawn_eviction_ticker(Arc::downgrade(&sudo_cache));
        Self {
            sessions: RwLock::new(HashMap::new()),
            sudo_cache,
            rate_limiter: Arc::new(AuthRateLimiter::new()),
        }
    }

    pub async fn create(&self, args: CreateSessionArgs) -> ShellResult<SessionInfo> {
        {
            let sessions = self.sessions.read().await;
            if sessions.len() >= *config::MAX_SESSIONS {
                return Err(ShellError::ResourceExhausted(
                    "maximum number of concurrent sessions reached".to_string(),
                ));
            }
        }

        let mode = args.mode.as_deref().unwrap_or("local");
        let id = new_session_id();

        let session = match mode {
            "local" => {
                let cwd = args.working_directory.clone();
                let recorder = Self::make_recorder(cwd.as_deref(), &id).await;
                Session::new_local(id.clone(), cwd, self.sudo_cache.clone(), recorder).await?
            }
            "ssh" => {
                let host = args
                    .host
                    .ok_or_else(|| ShellError::InvalidArgument("ssh mode requires 'host'".to_string()))?;
                let user = args
                    .user
                    .ok_or_else(|| ShellError::InvalidArgument("ssh mode requires 'user'".to_string()))?;
                let port = args.port.unwrap_or(22);

                let (locked, remaining) = self.rate_limiter.is_locked(&host, &user).await;
                if locked {
                    return Err(ShellError::RateLimited {
                        host: host.clone(),
                        user: user.clone(),
                        remaining_secs: remaining,
                    });
                }

                let auth = if let Some(key_path) = args.key_path {
                    SshAuth::KeyFile {
                        path: key_path,
                        passphrase: args.password,
                    }
                } else {
                    SshAuth::Password(args.password.unwrap_or_default())
                };

                let transport = match SshTransport::connect(&host, port, &user, auth).await {
                    Ok(t) => {
                        self.rate_limiter.record_success(&host, &user).await;
                        t
                    }
                    Err(e) => {
                        self.rate_limiter.record_failure(&host, &user).await;
                        return Err(e);
                    }
                };

                let recorder = Self::make_recorder(None, &id).await;
                Session::new_ssh(id.clone(), Arc::new(transport), self.sudo_cache.clone(), recorder).await?
            }
            other => {
                return Err(ShellError::InvalidArgument(format!(
                    "unknown session mode '{other}', expected 'local' or 'ssh'"
                )));
            }
        };

        let info = session.status().await;
        self.sessions
            .write()
            .await
            .insert(id, Arc::new(Mutex::new(session)));
        Ok(info)
    }

    /// Build a recorder rooted at `cwd` (or the process cwd for SSH
    /// sessions, which have no local working directory). Recording failures
    /// are non-fatal -- the session runs unrecorded rather than refusing
    /// to start.
    async fn make_recorder(cwd: Option<&str>, id: &str) -> Option<Recorder> {
        let root = cwd
            .map(ToString::to_string)
            .or_else(|| std::env::current_dir().ok().map(|p| p.display().to_string()))?;
        match Recorder::create(&root, id, unix_ts()).await {
            Ok(r) => Some(r),
            Err(e) => {
                tracing::warn!(session_id = %id, error = %e, "failed to open recording file");
                None
            }
        }
    }

    async fn get(&self, id: &str) -> ShellResult<Arc<Mutex<Session>>> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| ShellError::SessionNotFound(id.to_string()))
    }

    pub async fn exec(&self, id: &str, command: &str, timeout_ms: u64) -> ShellResult<crate::session::ExecResult> {
        let session = self.get(id).await?;
        let mut session = session.lock().await;
        session.exec(command, timeout_ms).await
    }

    pub async fn provide_input(
        &self,
        id: &str,
        input: &str,
        cache_for_sudo: bool,
    ) -> ShellResult<crate::session::ExecResult> {
        let session = self.get(id).await?;
        let mut session = session.lock().await;
        session.provide_input(input, cache_for_sudo).await
    }

    pub async fn interrupt(&self, id: &str) -> ShellResult<()> {
        let session = self.get(id).await?;
        let mut session = session.lock().await;
        session.interrupt().await
    }

    pub async fn status(&self, id: &str) -> ShellResult<SessionInfo> {
        let session = self.get(id).await?;
        let session = session.lock().await;
        Ok(session.status().await)
    }

    pub async fn close(&self, id: &str) -> ShellResult<()> {
        let session = {
            let mut sessions = self.sessions.write().await;
            sessions
                .remove(id)
                .ok_or_else(|| ShellError::SessionNotFound(id.to_string()))?
        };
        let mut session = session.lock().await;
        session.close().await
    }

    pub async fn list(&self) -> Vec<SessionInfo> {
        let sessions = self.sessions.read().await;
        let mut infos = Vec::with_capacity(sessions.len());
        for session in sessions.values() {
            infos.push(session.lock().await.status().await);
        }
        infos
    }

    /// Fetch the session's handle for file-transfer and tunnel tools, which
    /// need access beyond the narrow exec/status surface above.
    pub(crate) async fn handle(&self, id: &str) -> ShellResult<Arc<Mutex<Session>>> {
        self.get(id).await
    }

    pub async fn create_local_tunnel(
        &self,
        id: &str,
        local_host: &str,
        local_port: u16,
        remote_host: &str,
        remote_port: u16,
    ) -> ShellResult<crate::ssh::tunnel::TunnelStatus> {
        let session = self.get(id).await?;
        let session = session.lock().await;
        session
            .tunnel_create_local(local_host, local_port, remote_host, remote_port)
            .await
    }

    pub async fn create_reverse_tunnel(
        &self,
        id: &str,
        remote_host: &str,
        remote_port: u16,
        local_host: &str,
        local_port: u16,
    ) -> ShellResult<crate::ssh::tunnel::TunnelStatus> {
        let session = self.get(id).await?;
        let session = session.lock().await;
        session
            .tunnel_create_reverse(remote_host, remote_port, local_host, local_port)
            .await
    }

    pub async fn list_tunnels(&self, id: &str) -> ShellResult<Vec<crate::ssh::tunnel::TunnelStatus>> {
        let session = self.get(id).await?;
        let session = session.lock().await;
        session.tunnel_list().await
    }

    pub async fn close_tunnel(&self, id: &str, tunnel_id: &str) -> ShellResult<()> {
        let session = self.get(id).await?;
        let mut session = session.lock().await;
        session.tunnel_close(tunnel_id).await
    }

    pub async fn restore_tunnels(&self, id: &str) -> ShellResult<Vec<crate::ssh::tunnel::TunnelStatus>> {
        let session = self.get(id).await?;
        let mut session = session.lock().await;
        session.tunnel_restore().await
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

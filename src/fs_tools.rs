//! File put/get/move tools.
//!
//! These merely stream bytes -- the hard state-machine work lives in
//! [`crate::session`] -- but they still have to coexist with a running
//! shell on the same session without blocking it. Each call here locks the
//! session only long enough to read its mode and clone its SSH transport
//! handle (an `Arc`), then does the actual I/O outside that lock so a
//! large transfer never holds up a concurrent `Exec`.
//!
//! Grounded on the SFTP usage pattern in the sshore tunnel reference code
//! (direct `russh`/`russh-sftp` client use, no higher-level wrapper).
//! `move_file` tries a plain rename and surfaces an unsupported
//! `posix-rename` extension as an ordinary IO error rather than panicking.

use crate::error::{ShellError, ShellResult};
use crate::manager::SessionManager;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

#[derive(Debug, Clone, Serialize)]
pub struct FileOpResult {
    pub path: String,
    pub bytes: u64,
}

/// Resolve `path` against a session's cwd if it isn't already absolute.
fn resolve(cwd: Option<&str>, path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        return p.to_path_buf();
    }
    match cwd {
        Some(cwd) => Path::new(cwd).join(p),
        None => p.to_path_buf(),
    }
}

/// Upload `local_path` (on the machine running shellmcp) to `remote_path`
/// inside the session. For a `local` session this is a same-filesystem
/// copy; for an `ssh` session it streams over SFTP.
pub async fn put_file(
    manager: &SessionManager,
    session_id: &str,
    local_path: &str,
    remote_path: &str,
) -> ShellResult<FileOpResult> {
    let handle = manager.handle(session_id).await?;
    let (mode, cwd, transport) = {
        let session = handle.lock().await;
        (
            session.mode(),
            session.cwd().map(ToString::to_string),
            session.ssh_transport().cloned(),
        )
    };

    match mode {
        "local" => {
            let dest = resolve(cwd.as_deref(), remote_path);
            let bytes = tokio::fs::copy(local_path, &dest).await.map_err(ShellError::from)?;
            Ok(FileOpResult {
                path: dest.display().to_string(),
                bytes,
            })
        }
        "ssh" => {
            let transport = transport.ok_or_else(|| {
                ShellError::Io("ssh session has no transport".to_string())
            })?;
            let sftp = transport.open_sftp().await?;
            let mut src = tokio::fs::File::open(local_path).await.map_err(ShellError::from)?;
            let mut dst = sftp
                .create(remote_path)
                .await
                .map_err(|e| ShellError::Io(format!("sftp create {remote_path}: {e}")))?;

            let mut buf = vec![0u8; 64 * 1024];
            let mut total = 0u64;
            loop {
                let n = src.read(&mut buf).await.map_err(ShellError::from)?;
                if n == 0 {
                    break;
                }
                dst.write_all(&buf[..n]).await.map_err(|e| ShellError::Io(e.to_string()))?;
                total += n as u64;
            }
            dst.shutdown().await.map_err(|e| ShellError::Io(e.to_string()))?;

            Ok(FileOpResult {
                path: remote_path.to_string(),
                bytes: total,
            })
        }
        other => Err(ShellError::InvalidArgument(format!("unknown session mode '{other}'"))),
    }
}

/// Download `remote_path` from inside the session to `local_path` (on the
/// machine running shellmcp).
pub async fn get_file(
    manager: &SessionManager,
    session_id: &str,
    remote_path: &str,
    local_path: &str,
) -> ShellResult<FileOpResult> {
    let handle = manager.handle(session_id).await?;
    let (mode, cwd, transport) = {
        let session = handle.lock().await;
        (
            session.mode(),
            session.cwd().map(ToString::to_string),
            session.ssh_transport().cloned(),
        )
    };

    match mode {
        "local" => {
            let src = resolve(cwd.as_deref(), remote_path);
            let bytes = tokio::fs::copy(&src, local_path).await.map_err(ShellError::from)?;
            Ok(FileOpResult {
                path: local_path.to_string(),
                bytes,
            })
        }
        "ssh" => {
            let transport = transport.ok_or_else(|| {
                ShellError::Io("ssh session has no transport".to_string())
            })?;
            let sftp = transport.open_sftp().await?;
            let mut src = sftp
                .open(remote_path)
                .await
                .map_err(|e| ShellError::Io(format!("sftp open {remote_path}: {e}")))?;
            let mut dst = tokio::fs::File::create(local_path).await.map_err(ShellError::from)?;

            let mut buf = vec![0u8; 64 * 1024];
            let mut total = 0u64;
            loop {
                let n = src.read(&mut buf).await.map_err(|e| ShellError::Io(e.to_string()))?;
                if n == 0 {
                    break;
                }
                dst.write_all(&buf[..n]).await.map_err(ShellError::from)?;
                total += n as u64;
            }

            Ok(FileOpResult {
                path: local_path.to_string(),
                bytes: total,
            })
        }
        other => Err(ShellError::InvalidArgument(format!("unknown session mode '{other}'"))),
    }
}

/// Rename/move a file within the session's filesystem. Tolerates an
/// SFTP peer that doesn't support the `posix-rename` extension by
/// surfacing the rejection as a plain IO error rather than crashing the
/// session.
pub async fn move_file(
    manager: &SessionManager,
    session_id: &str,
    from_path: &str,
    to_path: &str,
) -> ShellResult<FileOpResult> {
    let handle = manager.handle(session_id).await?;
    let (mode, cwd, transport) = {
        let session = handle.lock().await;
        (
            session.mode(),
            session.cwd().map(ToString::to_string),
            session.ssh_transport().cloned(),
        )
    };

    match mode {
        "local" => {
            let from = resolve(cwd.as_deref(), from_path);
            let to = resolve(cwd.as_deref(), to_path);
            tokio::fs::rename(&from, &to).await.map_err(ShellError::from)?;
            let bytes = tokio::fs::metadata(&to).await.map(|m| m.len()).unwrap_or(0);
            Ok(FileOpResult {
                path: to.display().to_string(),
                bytes,
            })
        }
        "ssh" => {
            let transport = transport.ok_or_else(|| {
                ShellError::Io("ssh session has no transport".to_string())
            })?;
            let sftp = transport.open_sftp().await?;
            sftp.rename(from_path, to_path).await.map_err(|e| {
                ShellError::Io(format!(
                    "sftp rename {from_path} -> {to_path} failed (peer may not support \
                     posix-rename): {e}"
                ))
            })?;
            Ok(FileOpResult {
                path: to_path.to_string(),
                bytes: 0,
            })
        }
        other => Err(ShellError::InvalidArgument(format!("unknown session mode '{other}'"))),
    }
}

//! Local-mode channel: a PTY-backed login shell.
//!
//! Extracted from the original single-mode `ShellSession` so the same
//! marker-framed exec/prompt logic in `session.rs` can drive this or an SSH
//! channel interchangeably.

use crate::error::{ShellError, ShellResult};
use crate::process;
use nix::sys::signal::{self, Signal};
use nix::unistd::tcgetpgrp;
use std::os::fd::{AsRawFd, BorrowedFd};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};

pub struct PtyChannel {
    child: tokio::process::Child,
    writer: pty_process::OwnedWritePty,
    reader: BufReader<pty_process::OwnedReadPty>,
}

impl PtyChannel {
    pub async fn spawn(working_directory: Option<&str>) -> ShellResult<Self> {
        let (pty, pts) =
            pty_process::open().map_err(|e| ShellError::Io(format!("failed to open PTY: {e}")))?;

        pty.resize(pty_process::Size::new(24, 250))
            .map_err(|e| ShellError::Io(format!("failed to resize PTY: {e}")))?;

        let mut cmd = pty_process::Command::new("/bin/bash")
            .arg("--norc")
            .arg("--noprofile");

        for (key, _) in std::env::vars() {
            if process::is_sensitive_env(&key) {
                cmd = cmd.env_remove(&key);
            }
        }

        if let Some(dir) = working_directory {
            cmd = cmd.current_dir(dir);
        }

        let child = cmd
            .spawn(pts)
            .map_err(|e| ShellError::Io(format!("failed to spawn bash with PTY: {e}")))?;

        let (read_pty, write_pty) = pty.into_split();

        Ok(Self {
            child,
            writer: write_pty,
            reader: BufReader::new(read_pty),
        })
    }

    pub async fn write_all(&mut self, bytes: &[u8]) -> ShellResult<()> {
        self.writer.write_all(bytes).await.map_err(ShellError::from)?;
        self.writer.flush().await.map_err(ShellError::from)
    }

    pub async fn read_line(&mut self, buf: &mut String) -> ShellResult<usize> {
        use tokio::io::AsyncBufReadExt;
        self.reader.read_line(buf).await.map_err(ShellError::from)
    }

    pub async fn read(&mut self, buf: &mut [u8]) -> ShellResult<usize> {
        self.reader.read(buf).await.map_err(ShellError::from)
    }

    /// Send SIGINT to the foreground process group of the PTY, the way a
    /// terminal's Ctrl-C key does -- not the SSH path's `\x03` byte, since a
    /// local PTY master lets us address the process group directly.
    pub async fn interrupt(&mut self) -> ShellResult<()> {
        let fd = self.writer.as_raw_fd();
        // SAFETY: `fd` is borrowed from `self.writer`, which outlives this
        // call; `tcgetpgrp` only reads the controlling terminal's foreground
        // pgrp and does not take ownership of the fd.
        let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
        let pgrp = tcgetpgrp(borrowed)
            .map_err(|e| ShellError::Io(format!("tcgetpgrp on pty failed: {e}")))?;
        signal::killpg(pgrp, Signal::SIGINT)
            .map_err(|e| ShellError::Io(format!("failed to signal foreground process group: {e}")))?;
        Ok(())
    }

    /// True if the shell process is still alive.
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Send SIGKILL to the shell process (used on forced close).
    pub fn kill(&mut self) {
        let _ = self.child.start_kill();
    }

    pub async fn wait_with_timeout(&mut self, timeout: std::time::Duration) -> ShellResult<()> {
        tokio::time::timeout(timeout, self.child.wait())
            .await
            .map_err(|_| ShellError::Timeout)?
            .map_err(ShellError::from)?;
        Ok(())
    }
}

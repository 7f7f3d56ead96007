//! Append-only per-session recording, in the plain-text format named by the
//! external interface: `"[<ts>] >>> <masked_input>\n"` for input,
//! `"[<ts>] <<< <output>\n"` for output.
//!
//! Grounded on `demohiiiire-rneter`'s `SessionRecorder`/`SessionEvent` shape
//! (an in-memory event log appended to under a lock), adapted to write
//! directly to the documented textual file format rather than a JSON
//! event log.

use crate::config;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

const MASK_CHAR: char = '*';
const MASK_LEN: usize = 8;

fn unix_ts() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Append-only recording writer for one session.
pub struct Recorder {
    file: Mutex<Option<File>>,
    path: PathBuf,
}

impl Recorder {
    /// Open (creating directories as needed) the recording file for
    /// `session_id` rooted at `cwd`.
    pub async fn create(cwd: &str, session_id: &str, created_at_unix: u64) -> std::io::Result<Self> {
        let dir = PathBuf::from(cwd).join(config::RECORDING_DIR_NAME);
        fs::create_dir_all(&dir).await?;
        let path = dir.join(format!("{session_id}_{created_at_unix}.txt"));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        Ok(Self {
            file: Mutex::new(Some(file)),
            path,
        })
    }

    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Record an input line, masking the text if `sensitive` (e.g. a cached
    /// sudo password or a `ProvideInput` the caller flagged as secret).
    pub async fn record_input(&self, text: &str, sensitive: bool) {
        let masked = if sensitive {
            MASK_CHAR.to_string().repeat(MASK_LEN)
        } else {
            text.to_string()
        };
        self.write_line(&format!("[{}] >>> {masked}\n", unix_ts())).await;
    }

    pub async fn record_output(&self, text: &str) {
        self.write_line(&format!("[{}] <<< {text}\n", unix_ts())).await;
    }

    pub async fn record_start(&self) {
        self.write_line(&format!("[{}] >>> session started\n", unix_ts())).await;
    }

    pub async fn record_stop(&self) {
        self.write_line(&format!("[{}] >>> session closed\n", unix_ts())).await;
    }

    async fn write_line(&self, line: &str) {
        let mut guard = self.file.lock().await;
        if let Some(file) = guard.as_mut() {
            if let Err(e) = file.write_all(line.as_bytes()).await {
                tracing::warn!(path = %self.path.display(), error = %e, "recording write failed");
            }
        }
    }

    pub async fn finalize(&self) {
        self.record_stop().await;
        let mut guard = self.file.lock().await;
        *guard = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[tokio::test]
    async fn writes_input_and_output_lines() {
        let dir = tempfile::tempdir().unwrap();
        let cwd = dir.path().to_str().unwrap();
        let recorder = Recorder::create(cwd, "s1", 1_700_000_000).await.unwrap();

        recorder.record_input("echo hi", false).await;
        recorder.record_output("hi").await;
        recorder.finalize().await;

        let mut contents = String::new();
        std::fs::File::open(recorder.path())
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();

        assert!(contents.contains(">>> echo hi\n"));
        assert!(contents.contains("<<< hi\n"));
    }

    #[tokio::test]
    async fn masks_sensitive_input() {
        let dir = tempfile::tempdir().unwrap();
        let cwd = dir.path().to_str().unwrap();
        let recorder = Recorder::create(cwd, "s2", 1_700_000_001).await.unwrap();
        recorder.record_input("hunter2", true).await;

        let mut contents = String::new();
        std::fs::File::open(recorder.path())
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();

        assert!(!contents.contains("hunter2"));
        assert!(contents.contains("********"));
    }

    #[test]
    fn recording_path_layout() {
        let path = PathBuf::from("/tmp/proj")
            .join(config::RECORDING_DIR_NAME)
            .join("s1_1700000000.txt");
        assert_eq!(
            path,
            PathBuf::from("/tmp/proj/.claude-shell-mcp/s1_1700000000.txt")
        );
    }
}

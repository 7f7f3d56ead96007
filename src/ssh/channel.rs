//! I/O over an interactive SSH channel, shaped to match the local PTY
//! channel's interface so [`crate::session::Session`] can drive either
//! backend identically. `read_line` is used only for the one-time startup
//! drain; the marker-framed scan loop reads raw bytes via `read` so it can
//! detect newline-less prompts.

use crate::error::{ShellError, ShellResult};
use russh::ChannelStream;
use russh::client::Msg;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};

pub struct SshChannel {
    writer: WriteHalf<ChannelStream<Msg>>,
    reader: BufReader<ReadHalf<ChannelStream<Msg>>>,
}

impl SshChannel {
    #[must_use]
    pub fn new(channel: russh::Channel<Msg>) -> Self {
        let stream = channel.into_stream();
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            writer: write_half,
            reader: BufReader::new(read_half),
        }
    }

    pub async fn write_all(&mut self, bytes: &[u8]) -> ShellResult<()> {
        self.writer.write_all(bytes).await.map_err(ShellError::from)?;
        self.writer.flush().await.map_err(ShellError::from)
    }

    /// Read a single line (up to and including `\n`) into `buf`, returning the
    /// number of bytes read (0 on EOF), mirroring `AsyncBufReadExt::read_line`.
    pub async fn read_line(&mut self, buf: &mut String) -> ShellResult<usize> {
        use tokio::io::AsyncBufReadExt;
        self.reader.read_line(buf).await.map_err(ShellError::from)
    }

    /// Read raw bytes -- used by the marker-framed scan loop and by
    /// interactive `send`, neither of which can assume output is newline-terminated.
    pub async fn read(&mut self, buf: &mut [u8]) -> ShellResult<usize> {
        self.reader.read(buf).await.map_err(ShellError::from)
    }

    /// Write a Ctrl-C byte to interrupt the remote foreground process.
    pub async fn interrupt(&mut self) -> ShellResult<()> {
        self.write_all(b"\x03").await
    }
}

//! SSH transport, interactive-channel, and tunnel-manager glue.

pub mod channel;
pub mod handler;
pub mod transport;
pub mod tunnel;

pub use transport::{SshAuth, SshTransport};

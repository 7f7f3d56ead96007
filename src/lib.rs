//! `shellmcp`: an MCP server exposing interactive local and SSH shell
//! sessions to LLM agents, with file transfer and TCP tunneling.
//!
//! The session state machine (marker-framed exec, prompt detection, sudo
//! auto-injection) lives in [`session`]; [`manager`] is the process-wide
//! session registry. [`server`] wires both onto the MCP tool surface.

pub mod config;
pub mod error;
pub mod fs_tools;
pub mod manager;
pub mod marker;
pub mod output;
pub mod process;
pub mod prompt;
pub mod pty_channel;
pub mod rate_limiter;
pub mod recording;
pub mod recovery;
pub mod server;
pub mod session;
pub mod ssh;
pub mod sudo_cache;

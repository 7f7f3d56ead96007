//! End-marker generation and parsing for marker-framed command execution.
//!
//! A marker is a random per-command token written into the shell so the
//! reader can recognize exactly where a command's output begins and ends,
//! and recover its exit status without parsing the shell's prompt. Tokens
//! are drawn from the OS RNG via `rand`, not `Uuid::new_v4`, so the marker
//! carries a full 128 bits of entropy rather than a UUID's 122 usable bits.

use rand::RngCore;

const PREFIX: &str = "__MK_";
pub const END_SUFFIX: &str = "__END__";

/// A fresh, unique marker pair for one command invocation.
#[derive(Clone)]
pub struct MarkerSet {
    pub start: String,
    end_prefix: String,
}

impl MarkerSet {
    /// Generate a new marker set with 128 bits of randomness hex-encoded
    /// into the token.
    #[must_use]
    pub fn new() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
        Self {
            start: format!("{PREFIX}{hex}__START__"),
            end_prefix: format!("{PREFIX}{hex}__"),
        }
    }

    /// The prefix half of the end marker, to be echoed single-quoted before
    /// a double-quoted shell variable expansion carrying the exit status
    /// (see `session::exec`'s wrapper construction).
    #[must_use]
    pub fn end_prefix(&self) -> &str {
        &self.end_prefix
    }

    /// Try to parse a cleaned output line as this marker set's end marker,
    /// returning the carried exit status on success.
    #[must_use]
    pub fn parse_end(&self, line: &str) -> Option<i32> {
        let pos = line.find(&self.end_prefix)?;
        let after = &line[pos + self.end_prefix.len()..];
        let code_str = after.strip_suffix(END_SUFFIX)?;
        code_str.parse::<i32>().ok()
    }

    /// True if `line` contains any marker-looking token, ours or otherwise --
    /// used to strip stray marker echoes from returned output.
    #[must_use]
    pub fn looks_like_marker(line: &str) -> bool {
        line.contains(PREFIX)
    }
}

impl Default for MarkerSet {
    fn default() -> Self {
        Self::new()
    }
}

/// `n_bytes` random bytes, hex-encoded. Used for session/tunnel ids so the
/// whole process draws its unique tokens from one RNG idiom.
#[must_use]
pub fn random_hex(n_bytes: usize) -> String {
    let mut bytes = vec![0u8; n_bytes];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_marker_roundtrip() {
        let m = MarkerSet::new();
        let line = format!("{}0{}", m.end_prefix(), END_SUFFIX);
        assert_eq!(m.parse_end(&line), Some(0));
    }

    #[test]
    fn end_marker_nonzero_status() {
        let m = MarkerSet::new();
        let line = format!("{}127{}", m.end_prefix(), END_SUFFIX);
        assert_eq!(m.parse_end(&line), Some(127));
    }

    #[test]
    fn unrelated_line_does_not_parse() {
        let m = MarkerSet::new();
        assert_eq!(m.parse_end("hello world"), None);
    }

    #[test]
    fn markers_are_unique() {
        let a = MarkerSet::new();
        let b = MarkerSet::new();
        assert_ne!(a.start, b.start);
    }
}

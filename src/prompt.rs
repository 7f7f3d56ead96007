//! Interactive-prompt classification.
//!
//! Scans the tail of a session's accumulated output buffer for text that
//! looks like a shell waiting on input (password prompt, y/n confirmation,
//! generic prompt) and reports that *only* after the stream has been idle
//! for the configured settle period -- a prompt-shaped string that keeps
//! scrolling by is not a prompt, it's output.

use regex::Regex;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptType {
    Password,
    Confirmation,
    Generic,
}

struct PromptPattern {
    regex: Regex,
    kind: PromptType,
}

static PROMPT_PATTERNS: LazyLock<Vec<PromptPattern>> = LazyLock::new(|| {
    vec![
        PromptPattern {
            regex: Regex::new(r"(?i)\[sudo\] password for [^:]+:\s*$").unwrap(),
            kind: PromptType::Password,
        },
        PromptPattern {
            regex: Regex::new(r"(?i)\bpassword:\s*$").unwrap(),
            kind: PromptType::Password,
        },
        PromptPattern {
            regex: Regex::new(r"(?i)passphrase for key[^:]*:\s*$").unwrap(),
            kind: PromptType::Password,
        },
        PromptPattern {
            regex: Regex::new(r"(?i)enter passphrase[^:]*:\s*$").unwrap(),
            kind: PromptType::Password,
        },
        PromptPattern {
            regex: Regex::new(r"\(y/n\)\s*$").unwrap(),
            kind: PromptType::Confirmation,
        },
        PromptPattern {
            regex: Regex::new(r"\[[Yy]/[Nn]\]\s*$").unwrap(),
            kind: PromptType::Confirmation,
        },
        PromptPattern {
            regex: Regex::new(r"(?i)are you sure\?\s*$").unwrap(),
            kind: PromptType::Confirmation,
        },
        PromptPattern {
            regex: Regex::new(r"(?i)continue\?\s*(\[[Yy]/[Nn]\])?\s*$").unwrap(),
            kind: PromptType::Confirmation,
        },
        PromptPattern {
            regex: Regex::new(r"(?i)enter value:\s*$").unwrap(),
            kind: PromptType::Generic,
        },
        PromptPattern {
            regex: Regex::new(r">\?\s*$").unwrap(),
            kind: PromptType::Generic,
        },
    ]
});

/// Classify the tail of an output buffer as a prompt, if any pattern matches.
#[must_use]
pub fn classify(tail: &str) -> Option<(PromptType, String)> {
    for pattern in PROMPT_PATTERNS.iter() {
        if let Some(m) = pattern.regex.find(tail) {
            return Some((pattern.kind, m.as_str().trim().to_string()));
        }
    }
    None
}

/// Tracks whether the output stream has been idle long enough, after a
/// prompt-shaped match, to treat it as a real prompt rather than mid-output
/// noise that merely looks like one.
pub struct SettleTimer {
    settle: Duration,
    last_byte_at: Instant,
}

impl SettleTimer {
    #[must_use]
    pub fn new(settle: Duration) -> Self {
        Self {
            settle,
            last_byte_at: Instant::now(),
        }
    }

    /// Call whenever new bytes arrive.
    pub fn note_activity(&mut self) {
        self.last_byte_at = Instant::now();
    }

    /// True once the stream has been quiet for at least the settle period.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.last_byte_at.elapsed() >= self.settle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_sudo_password_prompt() {
        let (kind, _) = classify("[sudo] password for alice: ").unwrap();
        assert_eq!(kind, PromptType::Password);
    }

    #[test]
    fn matches_confirmation_prompt() {
        let (kind, _) = classify("Remove all files? [y/N] ").unwrap();
        assert_eq!(kind, PromptType::Confirmation);
    }

    #[test]
    fn no_match_for_plain_output() {
        assert!(classify("build succeeded\n").is_none());
    }

    #[test]
    fn settle_timer_not_settled_immediately() {
        let timer = SettleTimer::new(Duration::from_millis(150));
        assert!(!timer.is_settled());
    }
}

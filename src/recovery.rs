//! Stateless rule-based recovery analyzer.
//!
//! Grounded on `process.rs`'s static `LazyLock`-compiled regex-table idiom
//! (`DANGEROUS_PATTERNS`, `ERROR_PATTERNS`): a fixed table of rules, each a
//! pattern plus a suggestion constructor and confidence score. Matching
//! rules are returned sorted by confidence, descending.

use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Permission,
    Package,
    Network,
    NotFound,
    Syntax,
    Resource,
}

#[derive(Debug, Clone, Serialize)]
pub struct Suggestion {
    pub category: Category,
    pub message: String,
    pub confidence: f64,
}

struct Rule {
    pattern: Regex,
    category: Category,
    confidence: f64,
    suggest: fn(&str) -> String,
}

static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        Rule {
            pattern: Regex::new(r"(?i)permission denied").unwrap(),
            category: Category::Permission,
            confidence: 0.9,
            suggest: |_| "retry with sudo, or check file/directory ownership".to_string(),
        },
        Rule {
            pattern: Regex::new(r"(?i)command not found").unwrap(),
            category: Category::NotFound,
            confidence: 0.85,
            suggest: |_| "the binary isn't on PATH; install it or check for a typo".to_string(),
        },
        Rule {
            pattern: Regex::new(r"(?i)no such file or directory").unwrap(),
            category: Category::NotFound,
            confidence: 0.8,
            suggest: |_| "check the path exists and the working directory is correct".to_string(),
        },
        Rule {
            pattern: Regex::new(r"(?i)package .* (not found|does not exist)").unwrap(),
            category: Category::Package,
            confidence: 0.75,
            suggest: |_| "the package may need to be installed or the registry refreshed".to_string(),
        },
        Rule {
            pattern: Regex::new(r"(?i)(connection refused|could not resolve host|network is unreachable|timed out)").unwrap(),
            category: Category::Network,
            confidence: 0.7,
            suggest: |_| "check network connectivity and that the target host/port is reachable".to_string(),
        },
        Rule {
            pattern: Regex::new(r"(?i)syntax error").unwrap(),
            category: Category::Syntax,
            confidence: 0.6,
            suggest: |_| "re-check quoting and command syntax".to_string(),
        },
        Rule {
            pattern: Regex::new(r"(?i)(disk quota exceeded|no space left on device)").unwrap(),
            category: Category::Resource,
            confidence: 0.85,
            suggest: |_| "free disk space before retrying".to_string(),
        },
    ]
});

static ERROR_INDICATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(error|failed|failure|fatal|denied|exception)\b").unwrap());

/// Analyze a failed command's output and return confidence-sorted
/// suggestions. Skips analysis entirely when `exit_status == 0` and no
/// error-keyword indicator is present in the output.
#[must_use]
pub fn analyze(output: &str, exit_status: i32) -> Vec<Suggestion> {
    if exit_status == 0 && !ERROR_INDICATOR.is_match(output) {
        return Vec::new();
    }

    let mut suggestions: Vec<Suggestion> = RULES
        .iter()
        .filter(|rule| rule.pattern.is_match(output))
        .map(|rule| Suggestion {
            category: rule.category,
            message: (rule.suggest)(output),
            confidence: rule.confidence,
        })
        .collect();

    suggestions.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap());
    suggestions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successful_clean_output_yields_nothing() {
        assert!(analyze("build succeeded\n", 0).is_empty());
    }

    #[test]
    fn permission_denied_is_flagged() {
        let suggestions = analyze("bash: /etc/shadow: Permission denied\n", 1);
        assert_eq!(suggestions[0].category, Category::Permission);
    }

    #[test]
    fn suggestions_sorted_by_confidence_descending() {
        let suggestions = analyze(
            "Permission denied\nno space left on device\n",
            1,
        );
        assert!(suggestions.len() >= 2);
        assert!(suggestions[0].confidence >= suggestions[1].confidence);
    }

    #[test]
    fn exit_nonzero_with_no_known_pattern_yields_nothing() {
        assert!(analyze("custom application error code 42\n", 1).is_empty());
    }
}

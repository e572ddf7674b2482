//! Execution outcome classification

use crate::types::ExecutionOutcome;

/// Exit code recorded when the execution failed before any process ran.
pub const CLIENT_FAILURE_EXIT_CODE: i32 = -200;

/// Decides whether clean-exit output nevertheless reads like an error.
///
/// Approximate by nature; only ever downgrades a success to
/// [`ExecutionOutcome::SucceededWithIssues`].
pub trait OutputHeuristic: Send + Sync {
    fn looks_like_error(&self, output: &str) -> bool;
}

/// Case-insensitive substring match against a keyword list.
#[derive(Debug, Clone)]
pub struct KeywordHeuristic {
    keywords: Vec<String>,
}

impl KeywordHeuristic {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            keywords: keywords
                .into_iter()
                .map(|k| k.as_ref().trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }
}

impl Default for KeywordHeuristic {
    fn default() -> Self {
        Self::new(crate::config::default_error_keywords())
    }
}

impl OutputHeuristic for KeywordHeuristic {
    fn looks_like_error(&self, output: &str) -> bool {
        let output = output.trim();
        if output.is_empty() {
            return false;
        }
        let lower = output.to_lowercase();
        self.keywords.iter().any(|k| lower.contains(k.as_str()))
    }
}

/// Classify a finished execution.
///
/// A non-zero exit code (including [`CLIENT_FAILURE_EXIT_CODE`]) or any
/// stderr output is a failure. Otherwise stdout decides between a clean
/// success and a success with possible issues.
pub fn classify(
    exit_code: i32,
    stdout: &str,
    stderr: &str,
    heuristic: &dyn OutputHeuristic,
) -> ExecutionOutcome {
    if exit_code != 0 || !stderr.trim().is_empty() {
        ExecutionOutcome::Failed
    } else if heuristic.looks_like_error(stdout) {
        ExecutionOutcome::SucceededWithIssues
    } else {
        ExecutionOutcome::Succeeded
    }
}

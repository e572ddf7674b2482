//! User-facing notifications
//!
//! Fire-and-forget status messages. Notifiers never fail and never affect
//! control flow; the orchestrator calls them after each transition.

use std::sync::{Arc, Mutex};

/// How a notification should be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Success => "success",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A recorded notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub severity: Severity,
    pub message: String,
}

/// Presentation boundary for status messages.
pub trait Notifier: Send + Sync {
    fn notify(&self, severity: Severity, message: &str);
}

/// Sends notifications to the log only.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Error => tracing::warn!(severity = %severity, "{}", message),
            _ => tracing::info!(severity = %severity, "{}", message),
        }
    }
}

/// Keeps every notification in memory.
#[derive(Debug, Default, Clone)]
pub struct NotificationLog {
    entries: Arc<Mutex<Vec<Notification>>>,
}

impl NotificationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything recorded so far.
    pub fn entries(&self) -> Vec<Notification> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    pub fn last(&self) -> Option<Notification> {
        self.entries().pop()
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.entries()
            .iter()
            .filter(|n| n.severity == severity)
            .count()
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }
}

impl Notifier for NotificationLog {
    fn notify(&self, severity: Severity, message: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(Notification {
                severity,
                message: message.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_log_records_in_order() {
        let log = NotificationLog::new();
        log.notify(Severity::Info, "started");
        log.notify(Severity::Error, "failed");

        assert_eq!(log.entries().len(), 2);
        assert_eq!(log.count(Severity::Error), 1);
        assert_eq!(
            log.last(),
            Some(Notification {
                severity: Severity::Error,
                message: "failed".to_string()
            })
        );

        log.clear();
        assert!(log.entries().is_empty());
    }

    #[test]
    fn test_clones_share_entries() {
        let log = NotificationLog::new();
        let handle: Arc<dyn Notifier> = Arc::new(log.clone());
        handle.notify(Severity::Success, "done");
        assert_eq!(log.count(Severity::Success), 1);
    }
}

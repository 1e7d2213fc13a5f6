//! Diagnostic notices emitted during reconciliation.
//!
//! The reconciler never logs directly. It reports through a
//! [`DiagnosticSink`] supplied by the caller.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
}

impl Severity {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One diagnostic message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub severity: Severity,
    pub message: String,
}

/// Receives notices from a reconciliation pass.
pub trait DiagnosticSink {
    fn notice(&mut self, severity: Severity, message: String);
}

/// Collects notices in order.
#[derive(Debug, Clone, Default)]
pub struct NoticeLog {
    notices: Vec<Notice>,
}

impl NoticeLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    pub fn into_notices(self) -> Vec<Notice> {
        self.notices
    }

    /// True if any notice is at least `severity`.
    pub fn any_at_least(&self, severity: Severity) -> bool {
        self.notices.iter().any(|n| n.severity >= severity)
    }

    /// Forwards every collected notice to another sink.
    pub fn replay(&self, sink: &mut dyn DiagnosticSink) {
        for n in &self.notices {
            sink.notice(n.severity, n.message.clone());
        }
    }
}

impl DiagnosticSink for NoticeLog {
    fn notice(&mut self, severity: Severity, message: String) {
        self.notices.push(Notice { severity, message });
    }
}

/// Forwards notices to `tracing`, tagged with the client name.
#[derive(Debug, Clone)]
pub struct TracingSink {
    client: String,
}

impl TracingSink {
    pub fn new(client: impl Into<String>) -> Self {
        Self {
            client: client.into(),
        }
    }
}

impl DiagnosticSink for TracingSink {
    fn notice(&mut self, severity: Severity, message: String) {
        let client = self.client.as_str();
        match severity {
            Severity::Debug => tracing::debug!(client, "{message}"),
            Severity::Info => tracing::info!(client, "{message}"),
            Severity::Warning => tracing::warn!(client, "{message}"),
            Severity::Error => tracing::error!(client, "{message}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notice_log_keeps_order() {
        let mut log = NoticeLog::new();
        log.notice(Severity::Debug, "first".to_string());
        log.notice(Severity::Warning, "second".to_string());

        let messages: Vec<&str> = log.notices().iter().map(|n| n.message.as_str()).collect();
        assert_eq!(messages, ["first", "second"]);
        assert!(log.any_at_least(Severity::Warning));
        assert!(!log.any_at_least(Severity::Error));
    }

    #[test]
    fn replay_forwards_everything() {
        let mut source = NoticeLog::new();
        source.notice(Severity::Info, "a".to_string());
        source.notice(Severity::Error, "b".to_string());

        let mut target = NoticeLog::new();
        source.replay(&mut target);
        assert_eq!(target.notices(), source.notices());
    }

    #[test]
    fn severity_orders_by_importance() {
        assert!(Severity::Debug < Severity::Info);
        assert!(Severity::Warning < Severity::Error);
        assert_eq!(Severity::Warning.to_string(), "warning");
    }
}

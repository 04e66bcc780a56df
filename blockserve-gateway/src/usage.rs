//! Usage statistics
//!
//! One event per completed, non-`view` transfer. The default sink writes a
//! JSON line to the `usage` tracing target, which a subscriber can route to
//! a file or collector.

use blockserve_core::catalog::Operation;
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::info;

/// How a transfer was initiated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum UsageKind {
    WebFileDownload,
    LinkFileDownload,
}

impl UsageKind {
    pub fn for_operation(op: Operation) -> Self {
        if op.is_link() {
            UsageKind::LinkFileDownload
        } else {
            UsageKind::WebFileDownload
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UsageKind::WebFileDownload => "web-file-download",
            UsageKind::LinkFileDownload => "link-file-download",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageEvent {
    /// Store ID for file and block transfers, repo ID for archives
    pub subject_id: String,
    pub username: String,
    pub kind: UsageKind,
    pub bytes: u64,
}

impl UsageEvent {
    /// Build the event for a transfer, or `None` when `view` transfers are
    /// not counted
    pub fn for_transfer(
        op: Operation,
        subject_id: impl Into<String>,
        username: impl Into<String>,
        bytes: u64,
    ) -> Option<Self> {
        if op == Operation::View {
            return None;
        }
        Some(Self {
            subject_id: subject_id.into(),
            username: username.into(),
            kind: UsageKind::for_operation(op),
            bytes,
        })
    }
}

/// Fire-and-forget usage event consumer
pub trait UsageSink: Send + Sync {
    fn emit(&self, event: UsageEvent);
}

#[derive(Serialize)]
struct UsageLogEntry<'a> {
    timestamp: String,
    #[serde(flatten)]
    event: &'a UsageEvent,
}

/// Emits usage events as structured JSON via tracing
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingUsageSink;

impl UsageSink for TracingUsageSink {
    fn emit(&self, event: UsageEvent) {
        crate::metrics::record_usage_event(event.kind.as_str(), event.bytes);

        let entry = UsageLogEntry {
            timestamp: Utc::now().to_rfc3339(),
            event: &event,
        };
        if let Ok(json) = serde_json::to_string(&entry) {
            info!(target: "usage", "{}", json);
        }
    }
}

/// Collects events in memory. Used for testing.
#[derive(Debug, Default)]
pub struct MemoryUsageSink {
    events: Mutex<Vec<UsageEvent>>,
}

impl MemoryUsageSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<UsageEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl UsageSink for MemoryUsageSink {
    fn emit(&self, event: UsageEvent) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_per_operation() {
        assert_eq!(
            UsageKind::for_operation(Operation::Download),
            UsageKind::WebFileDownload
        );
        assert_eq!(
            UsageKind::for_operation(Operation::DownloadBlocks),
            UsageKind::WebFileDownload
        );
        for op in [
            Operation::DownloadLink,
            Operation::DownloadDirLink,
            Operation::DownloadMultiLink,
        ] {
            assert_eq!(UsageKind::for_operation(op), UsageKind::LinkFileDownload);
        }
    }

    #[test]
    fn test_view_is_not_counted() {
        assert!(UsageEvent::for_transfer(Operation::View, "s", "u", 10).is_none());
        let event = UsageEvent::for_transfer(Operation::DownloadLink, "s", "u", 10).unwrap();
        assert_eq!(event.kind.as_str(), "link-file-download");
    }

    #[test]
    fn test_usage_serialization() {
        let event = UsageEvent::for_transfer(Operation::Download, "store-1", "alice", 42).unwrap();
        let entry = UsageLogEntry {
            timestamp: "now".to_string(),
            event: &event,
        };

        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"kind\":\"web-file-download\""));
        assert!(json.contains("\"subject_id\":\"store-1\""));
        assert!(json.contains("\"bytes\":42"));
    }
}

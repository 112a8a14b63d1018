//! Append-only authentication activity log.
//!
//! Every session-lifecycle event is recorded as an [`ActivityEntry`] in a
//! single JSON array under one store key, insertion order, oldest first. The
//! log is unbounded by design; [`ActivityFilter`] gives readers a bounded
//! query path.

use crate::store::{StateStore, KEY_ACTIVITY_LOG};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityAction {
    Login,
    Logout,
    LoginFailed,
    LockoutTriggered,
    SessionExpired,
    SessionRefreshed,
}

impl ActivityAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Logout => "logout",
            Self::LoginFailed => "login_failed",
            Self::LockoutTriggered => "lockout_triggered",
            Self::SessionExpired => "session_expired",
            Self::SessionRefreshed => "session_refreshed",
        }
    }
}

/// Who the event concerned, and any extra context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActivityDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ActivityDetails {
    /// Details carrying just the acting user.
    pub fn user(username: &str, role: &str) -> Self {
        Self {
            username: Some(username.to_string()),
            role: Some(role.to_string()),
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// A single recorded authentication event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub action: ActivityAction,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub details: ActivityDetails,
}

/// Optional constraints for [`ActivityLog::query_filtered`].
#[derive(Debug, Clone, Default)]
pub struct ActivityFilter {
    /// Only entries with this action.
    pub action: Option<ActivityAction>,
    /// Only entries at or after this timestamp.
    pub since: Option<DateTime<Utc>>,
    /// Keep at most this many entries, newest retained.
    pub limit: Option<usize>,
}

/// Append-only event log persisted through the state store.
pub struct ActivityLog {
    store: Arc<dyn StateStore>,
}

impl ActivityLog {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Append one entry. Read-modify-write of the stored array.
    pub fn append(&self, entry: ActivityEntry) -> Result<()> {
        let mut entries = self.query()?;
        entries.push(entry);
        let encoded =
            serde_json::to_string(&entries).context("Failed to encode activity log")?;
        self.store.set(KEY_ACTIVITY_LOG, &encoded)
    }

    /// Build and append an entry stamped now.
    pub fn record(&self, action: ActivityAction, details: ActivityDetails) -> Result<()> {
        self.append(ActivityEntry {
            action,
            timestamp: Utc::now(),
            details,
        })
    }

    /// Full history, oldest first.
    pub fn query(&self) -> Result<Vec<ActivityEntry>> {
        match self.store.get(KEY_ACTIVITY_LOG)? {
            Some(raw) => serde_json::from_str(&raw).context("Failed to decode activity log"),
            None => Ok(Vec::new()),
        }
    }

    /// History restricted by `filter`, oldest first.
    pub fn query_filtered(&self, filter: &ActivityFilter) -> Result<Vec<ActivityEntry>> {
        let mut entries = self.query()?;
        if let Some(action) = filter.action {
            entries.retain(|e| e.action == action);
        }
        if let Some(since) = filter.since {
            entries.retain(|e| e.timestamp >= since);
        }
        if let Some(limit) = filter.limit {
            if entries.len() > limit {
                entries.drain(..entries.len() - limit);
            }
        }
        Ok(entries)
    }

    /// Number of recorded entries.
    pub fn count(&self) -> Result<usize> {
        Ok(self.query()?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStateStore;
    use chrono::Duration;

    fn test_log() -> ActivityLog {
        ActivityLog::new(Arc::new(MemoryStateStore::new()))
    }

    #[test]
    fn empty_log_queries_empty() {
        let log = test_log();
        assert!(log.query().unwrap().is_empty());
        assert_eq!(log.count().unwrap(), 0);
    }

    #[test]
    fn append_preserves_insertion_order() {
        let log = test_log();
        log.record(ActivityAction::Login, ActivityDetails::user("ops@example.com", "admin"))
            .unwrap();
        log.record(ActivityAction::Logout, ActivityDetails::user("ops@example.com", "admin"))
            .unwrap();

        let entries = log.query().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, ActivityAction::Login);
        assert_eq!(entries[1].action, ActivityAction::Logout);
        assert!(entries[0].timestamp <= entries[1].timestamp);
    }

    #[test]
    fn details_roundtrip() {
        let log = test_log();
        log.record(
            ActivityAction::LoginFailed,
            ActivityDetails::user("ops@example.com", "editor").with_message("bad password"),
        )
        .unwrap();

        let entries = log.query().unwrap();
        let details = &entries[0].details;
        assert_eq!(details.username.as_deref(), Some("ops@example.com"));
        assert_eq!(details.role.as_deref(), Some("editor"));
        assert_eq!(details.message.as_deref(), Some("bad password"));
    }

    #[test]
    fn filter_by_action() {
        let log = test_log();
        log.record(ActivityAction::Login, ActivityDetails::default()).unwrap();
        log.record(ActivityAction::LoginFailed, ActivityDetails::default()).unwrap();
        log.record(ActivityAction::Login, ActivityDetails::default()).unwrap();

        let logins = log
            .query_filtered(&ActivityFilter {
                action: Some(ActivityAction::Login),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(logins.len(), 2);
    }

    #[test]
    fn filter_by_limit_keeps_newest() {
        let log = test_log();
        for _ in 0..5 {
            log.record(ActivityAction::Login, ActivityDetails::default()).unwrap();
        }
        log.record(ActivityAction::Logout, ActivityDetails::default()).unwrap();

        let tail = log
            .query_filtered(&ActivityFilter {
                limit: Some(2),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[1].action, ActivityAction::Logout);
    }

    #[test]
    fn filter_by_since() {
        let log = test_log();
        log.record(ActivityAction::Login, ActivityDetails::default()).unwrap();

        let future = Utc::now() + Duration::hours(1);
        let entries = log
            .query_filtered(&ActivityFilter {
                since: Some(future),
                ..Default::default()
            })
            .unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn survives_log_recreation() {
        let store = Arc::new(MemoryStateStore::new());
        ActivityLog::new(store.clone())
            .record(ActivityAction::Login, ActivityDetails::default())
            .unwrap();

        let log = ActivityLog::new(store);
        assert_eq!(log.count().unwrap(), 1);
    }

    #[test]
    fn action_labels() {
        assert_eq!(ActivityAction::Login.as_str(), "login");
        assert_eq!(ActivityAction::SessionExpired.as_str(), "session_expired");
    }
}

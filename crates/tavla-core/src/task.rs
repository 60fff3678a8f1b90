use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{IdentityId, TaskId};

/// A long-lived background work item. A `None` time means "never".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistentTask {
    pub id: TaskId,
    pub owner: IdentityId,
    /// Name of the handler that processes this task.
    pub kind: String,
    pub next_processing_time: Option<DateTime<Utc>>,
    pub next_display_time: Option<DateTime<Utc>>,
    pub delete_time: Option<DateTime<Utc>>,
    pub payload: serde_json::Value,
}

impl PersistentTask {
    pub fn new(owner: IdentityId, kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: TaskId::new(),
            owner,
            kind: kind.into(),
            next_processing_time: None,
            next_display_time: None,
            delete_time: None,
            payload,
        }
    }

    pub fn process_at(mut self, at: DateTime<Utc>) -> Self {
        self.next_processing_time = Some(at);
        self
    }

    pub fn display_at(mut self, at: DateTime<Utc>) -> Self {
        self.next_display_time = Some(at);
        self
    }

    pub fn delete_at(mut self, at: DateTime<Utc>) -> Self {
        self.delete_time = Some(at);
        self
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_processing_time.is_some_and(|t| t < now)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.delete_time.is_some_and(|t| t < now)
    }

    /// Displayed from `next_display_time` until the task expires.
    pub fn is_visible(&self, now: DateTime<Utc>) -> bool {
        self.next_display_time.is_some_and(|t| t < now)
            && self.delete_time.map_or(true, |t| t > now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn task() -> PersistentTask {
        PersistentTask::new(IdentityId::new("alice").unwrap(), "reminder", serde_json::json!({}))
    }

    #[test]
    fn test_never_times() {
        let now = Utc::now();
        let t = task();
        assert!(!t.is_due(now));
        assert!(!t.is_expired(now));
        assert!(!t.is_visible(now));
    }

    #[test]
    fn test_visibility_window() {
        let now = Utc::now();
        let t = task()
            .display_at(now - Duration::minutes(1))
            .delete_at(now + Duration::minutes(1));
        assert!(t.is_visible(now));
        assert!(!t.is_visible(now + Duration::minutes(2)));
        assert!(t.is_expired(now + Duration::minutes(2)));
    }

    #[test]
    fn test_due_is_strictly_before_now() {
        let now = Utc::now();
        let t = task().process_at(now);
        assert!(!t.is_due(now));
        assert!(t.is_due(now + Duration::seconds(1)));
    }
}

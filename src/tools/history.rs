//! Per-user record of recent tool executions.

use std::collections::{HashMap, VecDeque};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{ToolId, ToolResponse};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolAction {
    pub tool: ToolId,
    pub success: bool,
    pub summary: String,
    pub at: DateTime<Utc>,
}

impl ToolAction {
    pub fn from_response(tool: ToolId, response: &ToolResponse) -> Self {
        let mut summary = response.message();
        if summary.len() > 200 {
            let cut = (0..=200)
                .rev()
                .find(|i| summary.is_char_boundary(*i))
                .unwrap_or(0);
            summary.truncate(cut);
            summary.push('…');
        }
        Self {
            tool,
            success: response.success,
            summary,
            at: Utc::now(),
        }
    }
}

/// Bounded history cache: at most `per_user` entries per user, each kept
/// for `ttl`.
#[derive(Debug)]
pub struct ToolHistory {
    ttl: chrono::Duration,
    per_user: usize,
    entries: RwLock<HashMap<String, VecDeque<ToolAction>>>,
}

impl ToolHistory {
    pub fn new(ttl: Duration, per_user: usize) -> Self {
        Self {
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(365)),
            per_user: per_user.max(1),
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn cutoff(&self) -> DateTime<Utc> {
        Utc::now() - self.ttl
    }

    pub fn record(&self, user_id: &str, action: ToolAction) {
        let cutoff = self.cutoff();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let queue = entries.entry(user_id.to_string()).or_default();
        queue.push_back(action);
        queue.retain(|a| a.at >= cutoff);
        while queue.len() > self.per_user {
            queue.pop_front();
        }
        // Drop users whose history has fully expired.
        entries.retain(|_, q| q.back().is_some_and(|a| a.at >= cutoff));
    }

    /// Live entries for a user, newest first.
    pub fn recent(&self, user_id: &str) -> Vec<ToolAction> {
        let cutoff = self.cutoff();
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(user_id)
            .map(|q| q.iter().rev().filter(|a| a.at >= cutoff).cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action(tool: ToolId, summary: &str) -> ToolAction {
        ToolAction {
            tool,
            success: true,
            summary: summary.to_string(),
            at: Utc::now(),
        }
    }

    #[test]
    fn keeps_newest_entries_up_to_cap() {
        let history = ToolHistory::new(Duration::from_secs(60), 2);
        history.record("u1", action(ToolId::Zoom, "one"));
        history.record("u1", action(ToolId::Slack, "two"));
        history.record("u1", action(ToolId::GoogleDocs, "three"));

        let recent = history.recent("u1");
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].summary, "three");
        assert_eq!(recent[1].summary, "two");
        assert!(history.recent("u2").is_empty());
    }

    #[test]
    fn expired_entries_are_hidden_and_purged() {
        let history = ToolHistory::new(Duration::from_secs(60), 10);
        let mut old = action(ToolId::Zoom, "old");
        old.at = Utc::now() - chrono::Duration::minutes(5);
        history.record("u1", old);
        history.record("u1", action(ToolId::Zoom, "fresh"));

        let recent = history.recent("u1");
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].summary, "fresh");
    }

    #[test]
    fn long_summaries_are_truncated() {
        let resp = ToolResponse::error("x".repeat(500));
        let action = ToolAction::from_response(ToolId::Slack, &resp);
        assert!(!action.success);
        assert!(action.summary.chars().count() <= 201);
    }
}

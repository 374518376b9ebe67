//! Catalogue of the user's conversation sessions
//!
//! Read-mostly projection of the backend's session list. Refreshes replace
//! the whole list rather than patching it in place, so there is never a
//! partially-reconciled view. Deletion is backend-first: local state only
//! changes once the server confirms.

use crate::backend::{ChatBackend, SessionSummary};
use crate::error::ChatError;
use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex};

pub struct SessionDirectory {
    backend: Arc<dyn ChatBackend>,
    sessions: Mutex<Vec<SessionSummary>>,
}

impl SessionDirectory {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self {
            backend,
            sessions: Mutex::new(Vec::new()),
        }
    }

    /// Re-fetch the catalogue and replace the list wholesale, most recent
    /// first. On failure the list degrades to empty and the error propagates
    /// for notification.
    pub async fn refresh(&self) -> Result<(), ChatError> {
        match self.backend.user_sessions().await {
            Ok(mut list) => {
                list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
                tracing::debug!(count = list.len(), "session catalogue refreshed");
                *self.sessions.lock().unwrap() = list;
                Ok(())
            }
            Err(e) => {
                tracing::warn!("session catalogue refresh failed: {}", e);
                self.sessions.lock().unwrap().clear();
                Err(e)
            }
        }
    }

    pub fn list(&self) -> Vec<SessionSummary> {
        self.sessions.lock().unwrap().clone()
    }

    /// Most recent session other than `excluding`, used to pick a
    /// replacement after the active session is deleted.
    pub fn most_recent_excluding(&self, excluding: &str) -> Option<SessionSummary> {
        self.sessions
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.session_id != excluding)
            .cloned()
    }

    /// Hard delete. The backend delete must succeed before any local
    /// mutation happens.
    pub async fn delete_session(&self, session_id: &str) -> Result<(), ChatError> {
        self.backend.delete_history(session_id).await?;
        self.sessions
            .lock()
            .unwrap()
            .retain(|s| s.session_id != session_id);
        Ok(())
    }
}

/// The four display buckets. Disjoint and exhaustive; each preserves the
/// relative order of its input.
#[derive(Debug, Default, Clone)]
pub struct GroupedSessions {
    pub today: Vec<SessionSummary>,
    pub last_7_days: Vec<SessionSummary>,
    pub last_30_days: Vec<SessionSummary>,
    pub earlier: Vec<SessionSummary>,
}

/// Pure bucket assignment from `created_at` and `now`; recomputed on every
/// render, no session owns its bucket.
pub fn group(sessions: &[SessionSummary], now: DateTime<Utc>) -> GroupedSessions {
    let mut grouped = GroupedSessions::default();
    let week_ago = now - Duration::days(7);
    let month_ago = now - Duration::days(30);

    for session in sessions {
        let created = session.created_at;
        if created.date_naive() == now.date_naive() {
            grouped.today.push(session.clone());
        } else if created >= week_ago && created < now {
            grouped.last_7_days.push(session.clone());
        } else if created >= month_ago && created < week_ago {
            grouped.last_30_days.push(session.clone());
        } else {
            grouped.earlier.push(session.clone());
        }
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(id: &str, created_at: DateTime<Utc>) -> SessionSummary {
        SessionSummary {
            session_id: id.to_string(),
            question: format!("question from {}", id),
            created_at,
        }
    }

    #[test]
    fn buckets_partition_by_age() {
        let now = Utc::now();
        let sessions = vec![
            summary("now", now),
            summary("3d", now - Duration::days(3)),
            summary("10d", now - Duration::days(10)),
            summary("40d", now - Duration::days(40)),
        ];

        let grouped = group(&sessions, now);
        assert_eq!(grouped.today[0].session_id, "now");
        assert_eq!(grouped.last_7_days[0].session_id, "3d");
        assert_eq!(grouped.last_30_days[0].session_id, "10d");
        assert_eq!(grouped.earlier[0].session_id, "40d");
    }

    #[test]
    fn buckets_are_disjoint_and_exhaustive() {
        let now = Utc::now();
        let sessions: Vec<_> = (0..50)
            .map(|i| summary(&format!("s{}", i), now - Duration::hours(i * 20)))
            .collect();

        let grouped = group(&sessions, now);
        let total = grouped.today.len()
            + grouped.last_7_days.len()
            + grouped.last_30_days.len()
            + grouped.earlier.len();
        assert_eq!(total, sessions.len());

        let mut ids: Vec<_> = grouped
            .today
            .iter()
            .chain(&grouped.last_7_days)
            .chain(&grouped.last_30_days)
            .chain(&grouped.earlier)
            .map(|s| s.session_id.clone())
            .collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), sessions.len());
    }

    #[test]
    fn earlier_today_is_today_not_last_7_days() {
        // 01:00 with a session from 00:30 the same day: within now-7d but
        // on today's calendar day, so it belongs to `today`.
        let now: DateTime<Utc> = "2026-08-23T01:00:00Z".parse().unwrap();
        let sessions = vec![summary("midnight", "2026-08-23T00:30:00Z".parse().unwrap())];

        let grouped = group(&sessions, now);
        assert_eq!(grouped.today.len(), 1);
        assert!(grouped.last_7_days.is_empty());
    }

    #[test]
    fn seven_day_boundary_is_inclusive() {
        let now: DateTime<Utc> = "2026-08-23T12:00:00Z".parse().unwrap();
        let sessions = vec![
            summary("exactly-7d", now - Duration::days(7)),
            summary("just-over-7d", now - Duration::days(7) - Duration::seconds(1)),
        ];

        let grouped = group(&sessions, now);
        assert_eq!(grouped.last_7_days[0].session_id, "exactly-7d");
        assert_eq!(grouped.last_30_days[0].session_id, "just-over-7d");
    }

    #[test]
    fn recency_order_is_preserved_within_buckets() {
        let now = Utc::now();
        let sessions = vec![
            summary("newer", now - Duration::days(2)),
            summary("older", now - Duration::days(5)),
        ];

        let grouped = group(&sessions, now);
        let ids: Vec<_> = grouped
            .last_7_days
            .iter()
            .map(|s| s.session_id.as_str())
            .collect();
        assert_eq!(ids, vec!["newer", "older"]);
    }
}

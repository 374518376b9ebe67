//! Conversation entities: history entries and sessions
//!
//! Entries store the *raw* streamed answer, think-tags included; the
//! reasoning/final split is derived at render time via [`answer_view`].
//! Keeping the raw text means the split can be re-derived after an
//! abort-triggered reconciliation without touching the network layer.
//!
//! All mutation goes through the [`ConversationEngine`](crate::engine);
//! while an entry is streaming its answer only ever grows, and once
//! finalized it never changes again short of whole-entry deletion.
//!
//! [`answer_view`]: ChatHistoryEntry::answer_view

use crate::core::reasoning::{self, ReasoningSplit};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Reserved answer value meaning "the turn is pending, render a loading
/// indicator". Never fed to the reasoning splitter.
pub const THINKING_DOTS: &str = "THINKING_DOTS";

/// Terminal-state-exhaustive turn lifecycle. Wire name `isStop` is the
/// backend's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TurnState {
    Running,
    Completed,
    Aborted,
}

/// One question/answer pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatHistoryEntry {
    pub id: u64,
    pub session_id: String,
    pub request_id: String,
    /// Empty set means general (non-knowledge-grounded) mode.
    #[serde(default)]
    pub knowledge_base_ids: BTreeSet<i64>,
    pub question: String,
    /// Raw accumulated answer text; may contain think-tags or the
    /// [`THINKING_DOTS`] sentinel.
    pub answer: String,
    #[serde(default)]
    pub is_streaming: bool,
    #[serde(rename = "isStop", default = "TurnState::completed")]
    pub state: TurnState,
    #[serde(default)]
    pub tokens_used: u64,
    #[serde(default)]
    pub process_time_ms: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TurnState {
    fn completed() -> Self {
        TurnState::Completed
    }
}

/// Render-time view of an entry's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerView<'a> {
    /// No content yet; show a loading indicator.
    Pending,
    Split(ReasoningSplit<'a>),
}

impl ChatHistoryEntry {
    pub fn answer_view(&self) -> AnswerView<'_> {
        if self.answer == THINKING_DOTS {
            AnswerView::Pending
        } else {
            AnswerView::Split(reasoning::split(&self.answer))
        }
    }
}

/// Ordered sequence of turns sharing a session id, plus the UI's current
/// knowledge-base and model selection. An empty session is a valid,
/// displayable state.
#[derive(Debug, Clone)]
pub struct ChatSession {
    pub session_id: String,
    pub entries: Vec<ChatHistoryEntry>,
    pub selected_knowledge_base_ids: BTreeSet<i64>,
    pub selected_model_id: Option<String>,
}

impl ChatSession {
    /// Fresh empty session with a generated id.
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4().to_string())
    }

    pub fn with_id(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            entries: Vec::new(),
            selected_knowledge_base_ids: BTreeSet::new(),
            selected_model_id: None,
        }
    }

    /// Whole-list replacement with the server's authoritative history.
    pub fn replace_entries(&mut self, entries: Vec<ChatHistoryEntry>) {
        self.entries = entries;
    }

    pub fn entry_by_request_mut(&mut self, request_id: &str) -> Option<&mut ChatHistoryEntry> {
        self.entries
            .iter_mut()
            .find(|e| e.request_id == request_id)
    }
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(answer: &str) -> ChatHistoryEntry {
        ChatHistoryEntry {
            id: 1,
            session_id: "s".into(),
            request_id: "r".into(),
            knowledge_base_ids: BTreeSet::new(),
            question: "q".into(),
            answer: answer.into(),
            is_streaming: false,
            state: TurnState::Completed,
            tokens_used: 0,
            process_time_ms: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn sentinel_answer_renders_as_pending() {
        assert_eq!(entry(THINKING_DOTS).answer_view(), AnswerView::Pending);
    }

    #[test]
    fn raw_answer_is_split_at_render_time() {
        let e = entry("<think>why</think>because");
        match e.answer_view() {
            AnswerView::Split(split) => {
                assert_eq!(split.reasoning, "why");
                assert_eq!(split.final_answer, "because");
            }
            AnswerView::Pending => panic!("expected split"),
        }
    }

    #[test]
    fn deserializes_backend_history_shape() {
        let json = r#"{
            "id": 3,
            "sessionId": "abc",
            "requestId": "req-1",
            "knowledgeBaseIds": [2, 5],
            "question": "What is X?",
            "answer": "X is Y",
            "isStop": "ABORTED",
            "tokensUsed": 42,
            "processTimeMs": 1200,
            "createdAt": "2026-08-01T10:00:00Z",
            "updatedAt": "2026-08-01T10:00:02Z"
        }"#;
        let e: ChatHistoryEntry = serde_json::from_str(json).unwrap();
        assert_eq!(e.session_id, "abc");
        assert_eq!(e.state, TurnState::Aborted);
        assert_eq!(e.tokens_used, 42);
        assert!(!e.is_streaming);
        assert!(e.knowledge_base_ids.contains(&5));
    }

    #[test]
    fn new_sessions_get_distinct_ids() {
        assert_ne!(ChatSession::new().session_id, ChatSession::new().session_id);
    }
}

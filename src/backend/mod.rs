//! REST collaborators of the conversation engine
//!
//! The engine talks to the console backend for everything that is not the
//! live stream: authoritative history, the user's session catalogue, hard
//! deletes, and the model / knowledge-base lookups. The trait keeps the
//! backend swappable; tests drive the engine against an in-memory fake.

mod http;

pub use http::HttpBackend;

use crate::error::ChatError;
use crate::session::ChatHistoryEntry;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Summary row in the user's session catalogue: the latest question stands
/// in as the session title.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub question: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeBaseInfo {
    pub id: i64,
    pub name: String,
    pub status: String,
}

#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Ordered authoritative history for one session.
    async fn history(&self, session_id: &str) -> Result<Vec<ChatHistoryEntry>, ChatError>;

    /// All sessions belonging to the current user.
    async fn user_sessions(&self) -> Result<Vec<SessionSummary>, ChatError>;

    /// Hard delete of a session and all of its entries.
    async fn delete_history(&self, session_id: &str) -> Result<(), ChatError>;

    /// Delete a single turn by its request id.
    async fn delete_entry(&self, request_id: &str) -> Result<(), ChatError>;

    async fn enabled_models(&self) -> Result<Vec<ModelInfo>, ChatError>;

    async fn user_knowledge_bases(&self) -> Result<Vec<KnowledgeBaseInfo>, ChatError>;
}

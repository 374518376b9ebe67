//! kbchat - streaming Q&A conversation engine for a knowledge-base console
//!
//! The engine opens one server-sent-event stream per conversation turn,
//! incrementally reconstructs answers that embed `<think>`-tagged reasoning
//! segments, supports cooperative mid-stream cancellation with server-side
//! reconciliation, and catalogues past sessions into relative time buckets.

pub mod backend;
mod config;
pub mod core;
pub mod directory;
pub mod engine;
pub mod error;
pub mod session;

pub mod cli;
pub mod utils;

pub use backend::{ChatBackend, HttpBackend, KnowledgeBaseInfo, ModelInfo, SessionSummary};
pub use config::{BackendConfig, ChatConfig, LoggingConfig, Settings};
pub use directory::{group, GroupedSessions, SessionDirectory};
pub use engine::{ConversationEngine, SendOutcome};
pub use error::ChatError;
pub use session::{AnswerView, ChatHistoryEntry, ChatSession, TurnState, THINKING_DOTS};

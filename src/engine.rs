//! Conversation engine: one streaming turn at a time
//!
//! Orchestrates the stream transport, the session state, and the directory.
//! The engine is a cheap-clone handle so that `abort` can race a live
//! `send` from another task. All session mutation happens here, behind one
//! lock that is only ever held for synchronous state application — never
//! across an await.
//!
//! Turn lifecycle: a pending entry enters the session *before* the request
//! is dispatched, streams through `Running`, and settles in exactly one of
//! the terminal states `Completed` or `Aborted`. An aborted turn always
//! reconciles against the server's authoritative history, because the
//! prefix the server flushed can differ from the locally accumulated
//! buffer.

use crate::backend::ChatBackend;
use crate::config::ChatConfig;
use crate::core::transport::{StreamEvent, StreamRequest, StreamTransport};
use crate::directory::SessionDirectory;
use crate::error::ChatError;
use crate::session::{ChatHistoryEntry, ChatSession, TurnState, THINKING_DOTS};
use chrono::Utc;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Admission result of a `send` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The turn ran to a terminal state (completed or aborted).
    Started,
    /// Question was empty after trimming; nothing happened.
    RejectedEmpty,
    /// A turn is already streaming; the caller must `abort` first.
    /// History is unchanged.
    RejectedBusy,
}

#[derive(Clone)]
pub struct ConversationEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    backend: Arc<dyn ChatBackend>,
    directory: Arc<SessionDirectory>,
    transport: StreamTransport,
    base_url: String,
    token: String,
    chat: ChatConfig,
    state: Mutex<EngineState>,
    streaming: watch::Sender<bool>,
}

struct EngineState {
    session: ChatSession,
    active: Option<ActiveTurn>,
    next_entry_id: u64,
    turn_seq: u64,
}

struct ActiveTurn {
    seq: u64,
    request_id: String,
    cancel: CancellationToken,
}

/// Everything `run_turn` needs without touching the lock.
struct TurnContext {
    seq: u64,
    session_id: String,
    request_id: String,
    knowledge_base_ids: BTreeSet<i64>,
    model_id: Option<String>,
    cancel: CancellationToken,
}

enum TurnEnd {
    Completed,
    Aborted,
}

impl ConversationEngine {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        directory: Arc<SessionDirectory>,
        base_url: impl Into<String>,
        token: impl Into<String>,
        chat: ChatConfig,
    ) -> Self {
        // No long-lived receiver: observers borrow the current value, and
        // `abort` subscribes on demand. `send_replace` keeps updates working
        // with zero receivers attached.
        let streaming = watch::Sender::new(false);
        Self {
            inner: Arc::new(EngineInner {
                backend,
                directory,
                transport: StreamTransport::new(),
                base_url: base_url.into().trim_end_matches('/').to_string(),
                token: token.into(),
                chat,
                state: Mutex::new(EngineState {
                    session: ChatSession::new(),
                    active: None,
                    next_entry_id: 1,
                    turn_seq: 0,
                }),
                streaming,
            }),
        }
    }

    /// Snapshot of the active session.
    pub fn session(&self) -> ChatSession {
        self.inner.state.lock().unwrap().session.clone()
    }

    pub fn session_id(&self) -> String {
        self.inner.state.lock().unwrap().session.session_id.clone()
    }

    pub fn history(&self) -> Vec<ChatHistoryEntry> {
        self.inner.state.lock().unwrap().session.entries.clone()
    }

    pub fn is_streaming(&self) -> bool {
        *self.inner.streaming.borrow()
    }

    pub fn set_knowledge_bases(&self, ids: BTreeSet<i64>) {
        self.inner
            .state
            .lock()
            .unwrap()
            .session
            .selected_knowledge_base_ids = ids;
    }

    pub fn set_model(&self, model_id: Option<String>) {
        self.inner.state.lock().unwrap().session.selected_model_id = model_id;
    }

    /// Install a fresh empty session. Returns its id, or `None` while a
    /// turn is streaming. No backend contact until the first message.
    pub fn new_session(&self) -> Option<String> {
        let mut state = self.inner.state.lock().unwrap();
        if state.active.is_some() {
            tracing::warn!("new_session refused while streaming");
            return None;
        }
        state.session = ChatSession::new();
        Some(state.session.session_id.clone())
    }

    /// Load a past session's authoritative history and make it active.
    /// Returns `Ok(false)` without side effects while a turn is streaming.
    pub async fn activate_session(&self, session_id: &str) -> Result<bool, ChatError> {
        if self.is_streaming() {
            tracing::warn!("activate_session refused while streaming");
            return Ok(false);
        }
        let entries = self.inner.backend.history(session_id).await?;

        let mut state = self.inner.state.lock().unwrap();
        if state.active.is_some() {
            return Ok(false);
        }
        let max_id = entries.iter().map(|e| e.id).max().unwrap_or(0);
        state.next_entry_id = state.next_entry_id.max(max_id + 1);
        let mut session = ChatSession::with_id(session_id);
        session.entries = entries;
        state.session = session;
        Ok(true)
    }

    /// Hard-delete a session. If it is the active one, the most recent
    /// remaining session is activated, or a fresh empty session is created
    /// — the engine never keeps pointing at a deleted session.
    pub async fn delete_session(&self, session_id: &str) -> Result<(), ChatError> {
        if self.is_streaming() {
            self.abort().await;
        }
        self.inner.directory.delete_session(session_id).await?;

        let was_active = self.session_id() == session_id;
        if was_active {
            match self.inner.directory.most_recent_excluding(session_id) {
                Some(next) => {
                    self.activate_session(&next.session_id).await?;
                }
                None => {
                    self.new_session();
                }
            }
        }
        if let Err(e) = self.inner.directory.refresh().await {
            tracing::warn!("directory refresh after delete failed: {}", e);
        }
        Ok(())
    }

    /// Delete a single past turn by request id. Backend-first: local state
    /// only changes once the server confirms. Refused while streaming.
    pub async fn delete_turn(&self, request_id: &str) -> Result<bool, ChatError> {
        if self.is_streaming() {
            tracing::warn!("delete_turn refused while streaming");
            return Ok(false);
        }
        self.inner.backend.delete_entry(request_id).await?;
        let mut state = self.inner.state.lock().unwrap();
        state.session.entries.retain(|e| e.request_id != request_id);
        Ok(true)
    }

    /// Send one question and drive the turn to its terminal state,
    /// streaming raw deltas to `progress` as they are applied.
    ///
    /// Cancellation (via [`abort`](Self::abort)) is not an error: the call
    /// still returns `Ok(Started)` once reconciliation finishes.
    pub async fn send(
        &self,
        question: &str,
        mut progress: impl FnMut(&str),
    ) -> Result<SendOutcome, ChatError> {
        let question = question.trim();
        if question.is_empty() {
            return Ok(SendOutcome::RejectedEmpty);
        }

        // Admission and pending entry, strictly before any network work:
        // the question must be visible in the session when the request
        // goes out.
        let turn = {
            let mut state = self.inner.state.lock().unwrap();
            if state.active.is_some() {
                tracing::warn!("send refused: a turn is already streaming");
                return Ok(SendOutcome::RejectedBusy);
            }
            let turn = state.begin_turn(question);
            // Flipped inside the same critical section as admission, so an
            // abort that sees the active turn also sees the flag.
            self.inner.streaming.send_replace(true);
            turn
        };

        tracing::info!(
            session_id = %turn.session_id,
            request_id = %turn.request_id,
            grounded = !turn.knowledge_base_ids.is_empty(),
            "starting turn"
        );

        let started = Instant::now();
        let result = self.run_turn(&turn, &mut progress).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let outcome = match result {
            Ok(TurnEnd::Completed) => {
                self.finalize(&turn, TurnState::Completed, elapsed_ms);
                Ok(SendOutcome::Started)
            }
            Ok(TurnEnd::Aborted) => {
                self.finalize(&turn, TurnState::Aborted, elapsed_ms);
                self.reconcile(&turn).await;
                Ok(SendOutcome::Started)
            }
            Err(e) if e.is_cancelled() => {
                self.finalize(&turn, TurnState::Aborted, elapsed_ms);
                self.reconcile(&turn).await;
                Ok(SendOutcome::Started)
            }
            Err(e) => {
                // Best effort: never leave the entry streaming forever, and
                // keep whatever partial answer accumulated.
                self.finalize(&turn, TurnState::Completed, elapsed_ms);
                Err(e)
            }
        };

        self.settle(&turn);
        if let Err(e) = self.inner.directory.refresh().await {
            tracing::warn!("directory refresh after turn failed: {}", e);
        }
        outcome
    }

    /// Cancel the in-flight turn, if any, and wait until it has fully
    /// settled — including the post-abort history reconciliation.
    pub async fn abort(&self) {
        let active = {
            let state = self.inner.state.lock().unwrap();
            state
                .active
                .as_ref()
                .map(|a| (a.request_id.clone(), a.cancel.clone()))
        };
        let Some((request_id, cancel)) = active else {
            return;
        };

        tracing::info!(request_id = %request_id, "aborting in-flight turn");
        cancel.cancel();

        let mut rx = self.inner.streaming.subscribe();
        let _ = rx.wait_for(|streaming| !*streaming).await;
    }

    async fn run_turn(
        &self,
        turn: &TurnContext,
        progress: &mut impl FnMut(&str),
    ) -> Result<TurnEnd, ChatError> {
        // Knowledge-grounded and general chat are distinct URL paths, not a
        // request flag.
        let url = if turn.knowledge_base_ids.is_empty() {
            format!("{}/general/stream", self.inner.base_url)
        } else {
            let kb_ids = turn
                .knowledge_base_ids
                .iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(",");
            format!("{}/chat/stream?kbIds={}", self.inner.base_url, kb_ids)
        };

        let mut body = json!({
            "question": self.question_of(turn),
            "sessionId": turn.session_id,
            "requestId": turn.request_id,
            "temperature": self.inner.chat.temperature,
            "maxTokens": self.inner.chat.max_tokens,
        });
        if let Some(llm_id) = turn.model_id.as_deref() {
            body["llmId"] = json!(llm_id);
        }

        let request = StreamRequest {
            url,
            bearer_token: self.inner.token.clone(),
            body,
        };

        let mut subscription = self
            .inner
            .transport
            .open(request, turn.cancel.clone())
            .await?;

        let mut accumulator = String::new();
        while let Some(event) = subscription.next_event().await {
            match event {
                StreamEvent::Delta(text) => {
                    accumulator.push_str(&text);
                    if self.apply_delta(turn, &accumulator) {
                        progress(&text);
                    }
                }
                StreamEvent::Done => return Ok(TurnEnd::Completed),
                StreamEvent::Closed => {
                    return if turn.cancel.is_cancelled() {
                        Ok(TurnEnd::Aborted)
                    } else {
                        // Clean close without a terminal frame counts as a
                        // normal completion.
                        Ok(TurnEnd::Completed)
                    };
                }
                StreamEvent::Failed(e) => return Err(e),
            }
        }
        // Reader task gone without a terminal event.
        Ok(TurnEnd::Completed)
    }

    fn question_of(&self, turn: &TurnContext) -> String {
        let state = self.inner.state.lock().unwrap();
        state
            .session
            .entries
            .iter()
            .find(|e| e.request_id == turn.request_id)
            .map(|e| e.question.clone())
            .unwrap_or_default()
    }

    /// Store the raw accumulated buffer as the entry's answer. Returns
    /// false when this turn is no longer the active generation, in which
    /// case the frame is dropped.
    fn apply_delta(&self, turn: &TurnContext, accumulator: &str) -> bool {
        let mut state = self.inner.state.lock().unwrap();
        if state.active.as_ref().map(|a| a.seq) != Some(turn.seq) {
            tracing::debug!(request_id = %turn.request_id, "dropping frame from stale turn");
            return false;
        }
        if let Some(entry) = state.session.entry_by_request_mut(&turn.request_id) {
            entry.answer = accumulator.to_string();
            entry.updated_at = Utc::now();
            true
        } else {
            false
        }
    }

    fn finalize(&self, turn: &TurnContext, terminal: TurnState, elapsed_ms: u64) {
        let mut state = self.inner.state.lock().unwrap();
        if let Some(entry) = state.session.entry_by_request_mut(&turn.request_id) {
            entry.is_streaming = false;
            entry.state = terminal;
            entry.process_time_ms = elapsed_ms;
            entry.updated_at = Utc::now();
            if entry.answer == THINKING_DOTS {
                // No frame ever arrived; clear the loading sentinel.
                entry.answer = String::new();
            }
        }
        tracing::info!(request_id = %turn.request_id, state = ?terminal, elapsed_ms, "turn finished");
    }

    /// Replace local state with the server's record after an abort. The
    /// locally accumulated buffer is not trusted as final truth: the prefix
    /// the server flushed may differ.
    async fn reconcile(&self, turn: &TurnContext) {
        match self.inner.backend.history(&turn.session_id).await {
            Ok(mut entries) => {
                for entry in &mut entries {
                    if entry.request_id == turn.request_id {
                        entry.state = TurnState::Aborted;
                        entry.is_streaming = false;
                    }
                }
                let mut state = self.inner.state.lock().unwrap();
                let max_id = entries.iter().map(|e| e.id).max().unwrap_or(0);
                state.next_entry_id = state.next_entry_id.max(max_id + 1);
                state.session.replace_entries(entries);
                tracing::info!(request_id = %turn.request_id, "aborted turn reconciled with server history");
            }
            Err(e) => {
                // Local state already holds the aborted entry with its
                // partial answer; keep it.
                tracing::warn!("post-abort reconciliation failed: {}", e);
            }
        }
    }

    fn settle(&self, turn: &TurnContext) {
        let mut state = self.inner.state.lock().unwrap();
        if state.active.as_ref().map(|a| a.seq) == Some(turn.seq) {
            state.active = None;
        }
        drop(state);
        self.inner.streaming.send_replace(false);
    }
}

impl EngineState {
    fn begin_turn(&mut self, question: &str) -> TurnContext {
        let now = Utc::now();
        let request_id = Uuid::new_v4().to_string();
        let entry = ChatHistoryEntry {
            id: self.next_entry_id,
            session_id: self.session.session_id.clone(),
            request_id: request_id.clone(),
            knowledge_base_ids: self.session.selected_knowledge_base_ids.clone(),
            question: question.to_string(),
            answer: THINKING_DOTS.to_string(),
            is_streaming: true,
            state: TurnState::Running,
            tokens_used: 0,
            process_time_ms: 0,
            created_at: now,
            updated_at: now,
        };
        self.next_entry_id += 1;
        self.turn_seq += 1;
        self.session.entries.push(entry);

        let cancel = CancellationToken::new();
        self.active = Some(ActiveTurn {
            seq: self.turn_seq,
            request_id: request_id.clone(),
            cancel: cancel.clone(),
        });

        TurnContext {
            seq: self.turn_seq,
            session_id: self.session.session_id.clone(),
            request_id,
            knowledge_base_ids: self.session.selected_knowledge_base_ids.clone(),
            model_id: self.session.selected_model_id.clone(),
            cancel,
        }
    }
}

//! HTTP implementation of [`ChatBackend`]

use super::{ChatBackend, KnowledgeBaseInfo, ModelInfo, SessionSummary};
use crate::error::ChatError;
use crate::session::ChatHistoryEntry;
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;

pub struct HttpBackend {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ChatError> {
        let response = self
            .client
            .get(self.url(path))
            .header("Authorization", format!("Bearer {}", self.token))
            .send()
            .await?;
        let response = check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| ChatError::Parse(e.to_string()))
    }

    async fn delete(&self, path: &str) -> Result<(), ChatError> {
        let response = self
            .client
            .delete(self.url(path))
            .header("Authorization", format!("Bearer {}", self.token))
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}

async fn check_status(response: Response) -> Result<Response, ChatError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ChatError::Server {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl ChatBackend for HttpBackend {
    async fn history(&self, session_id: &str) -> Result<Vec<ChatHistoryEntry>, ChatError> {
        self.get_json(&format!("/chat/history/{}", session_id)).await
    }

    async fn user_sessions(&self) -> Result<Vec<SessionSummary>, ChatError> {
        self.get_json("/chat/sessions").await
    }

    async fn delete_history(&self, session_id: &str) -> Result<(), ChatError> {
        tracing::info!(session_id, "deleting session history");
        self.delete(&format!("/chat/history/{}", session_id)).await
    }

    async fn delete_entry(&self, request_id: &str) -> Result<(), ChatError> {
        tracing::info!(request_id, "deleting history entry");
        self.delete(&format!("/chat/history/entry/{}", request_id))
            .await
    }

    async fn enabled_models(&self) -> Result<Vec<ModelInfo>, ChatError> {
        self.get_json("/llm/models/enabled").await
    }

    async fn user_knowledge_bases(&self) -> Result<Vec<KnowledgeBaseInfo>, ChatError> {
        self.get_json("/kb/user").await
    }
}

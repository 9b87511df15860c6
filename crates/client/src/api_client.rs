//! HTTP client for the history endpoints used to bootstrap a feature after
//! (re)connecting.

use std::fmt;
use std::sync::Arc;

use haven_shared::{AgentTurn, ApiError, ChatMessage, HistoryPage};
use reqwest::Client;
use serde::de::DeserializeOwned;
use url::Url;

use crate::auth_session::TokenSource;
use crate::error::{ClientError, ClientResult};

/// Bearer-authenticated client for `api/rooms/{id}/messages` and
/// `api/chat/{id}/messages`.
#[derive(Clone)]
pub struct HistoryClient {
    client: Client,
    base_url: Url,
    tokens: Arc<dyn TokenSource>,
}

impl fmt::Debug for HistoryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistoryClient")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl HistoryClient {
    pub fn new(base_url: Url, tokens: Arc<dyn TokenSource>) -> Self {
        Self {
            client: Client::new(),
            base_url,
            tokens,
        }
    }

    /// Latest `limit` messages of a room, oldest first.
    pub async fn room_messages(&self, room_id: &str, limit: u32) -> ClientResult<HistoryPage<ChatMessage>> {
        let path = format!("api/rooms/{}/messages", urlencoding::encode(room_id));
        self.get_page(&path, limit).await
    }

    /// Latest `limit` turns of a chat agent session, oldest first.
    pub async fn agent_history(&self, session_id: &str, limit: u32) -> ClientResult<HistoryPage<AgentTurn>> {
        let path = format!("api/chat/{}/messages", urlencoding::encode(session_id));
        self.get_page(&path, limit).await
    }

    pub(crate) fn url(&self, path: &str, limit: u32) -> ClientResult<Url> {
        let mut url = self.base_url.join(path)?;
        url.query_pairs_mut()
            .append_pair("limit", &limit.to_string());
        Ok(url)
    }

    async fn get_page<T: DeserializeOwned>(&self, path: &str, limit: u32) -> ClientResult<T> {
        let token = self
            .tokens
            .token()
            .filter(|t| !t.is_empty())
            .ok_or(ClientError::MissingCredential)?;
        let url = self.url(path, limit)?;
        tracing::debug!(%url, "Fetching history");
        Ok(self.get_json(url, &token).await?)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url, token: &str) -> Result<T, ApiError> {
        let resp = self
            .client
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let status = resp.status().as_u16();
        let is_success = resp.status().is_success();
        let text = resp
            .text()
            .await
            .map_err(|e| ApiError::Network(format!("failed to read body: {e}")))?;

        if !is_success {
            return Err(ApiError::Http { status, body: text });
        }

        serde_json::from_str(&text).map_err(|e| ApiError::Deserialize(e.to_string()))
    }
}

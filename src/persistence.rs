//! Persistence client — durable writes behind the room REST API.
//!
//! ERROR HANDLING
//! ==============
//! Callers treat every write as best-effort: a failed `put` is logged by the
//! session and never retried or surfaced.

use reqwest::header::{COOKIE, HeaderMap, HeaderValue};
use serde_json::Value;
use tracing::debug;

use crate::model::Room;

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),
    #[error("server returned HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// Partial-update writes to server-owned collections.
#[async_trait::async_trait]
pub trait PersistenceClient: Send + Sync {
    /// Apply `body` as a partial update to `collection/id`.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError`] if the write did not succeed.
    async fn put(&self, collection: &str, id: &str, body: Value) -> Result<Value, PersistenceError>;
}

// =============================================================================
// HTTP CLIENT
// =============================================================================

#[derive(Debug, Clone)]
pub struct HttpPersistence {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPersistence {
    /// Build a client for `base_url`, authenticating with an optional
    /// session cookie.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError`] if the token is not a valid header value
    /// or the HTTP client cannot be built.
    pub fn new(base_url: &str, session_token: Option<&str>) -> Result<Self, PersistenceError> {
        let mut headers = HeaderMap::new();
        if let Some(token) = session_token {
            headers.insert(COOKIE, HeaderValue::from_str(&format!("session_token={token}"))?);
        }
        let client = reqwest::Client::builder().default_headers(headers).build()?;
        Ok(Self { client, base_url: base_url.trim_end_matches('/').to_owned() })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Load a room with its tabs, log, and roster populated.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError`] on transport, status, or decode failure.
    pub async fn fetch_room(&self, room_id: &str) -> Result<Room, PersistenceError> {
        let url = self.url(&format!("/api/rooms/{room_id}/populated"));
        debug!(%url, "fetching room");
        let response = self.client.get(&url).send().await?;
        let value = read_json(response).await?;
        let room = value.get("result").cloned().unwrap_or(value);
        Ok(serde_json::from_value(room)?)
    }
}

#[async_trait::async_trait]
impl PersistenceClient for HttpPersistence {
    async fn put(&self, collection: &str, id: &str, body: Value) -> Result<Value, PersistenceError> {
        let url = self.url(&format!("/api/{collection}/{id}"));
        debug!(%url, "persisting partial update");
        let response = self.client.put(&url).json(&body).send().await?;
        read_json(response).await
    }
}

async fn read_json(response: reqwest::Response) -> Result<Value, PersistenceError> {
    let status = response.status();
    let value = response.json::<Value>().await.unwrap_or(Value::Null);
    if !status.is_success() {
        return Err(PersistenceError::Status { status: status.as_u16(), message: value.to_string() });
    }
    Ok(value)
}

// =============================================================================
// TEST HELPERS
// =============================================================================

//! HTTP document store client.

use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::DocumentStore;
use crate::error::StoreError;
use crate::session::{Draft, SessionId, Snapshot};

/// `reqwest`-backed [`DocumentStore`] talking to `{base_url}/sessions`.
#[derive(Debug, Clone)]
pub struct HttpStore {
    base_url: String,
    client: reqwest::Client,
}

impl HttpStore {
    /// Build a store client with the given timeouts.
    pub fn new(base_url: impl Into<String>, connect_timeout: Duration, request_timeout: Duration) -> Self {
        // The builder only fails when the TLS backend cannot initialize.
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .unwrap_or_default();
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn session_url(&self, id: &SessionId) -> String {
        format!("{}/sessions/{}", self.base_url, id)
    }

    async fn send(&self, request: reqwest::RequestBuilder, url: &str) -> Result<reqwest::Response, StoreError> {
        let resp = request.send().await.map_err(|e| StoreError::Connect {
            url: url.to_string(),
            detail: e.to_string(),
        })?;
        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::GONE {
            return Err(StoreError::NotFound);
        }
        if !status.is_success() {
            return Err(StoreError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(resp)
    }

    async fn read_snapshot(resp: reqwest::Response) -> Result<Snapshot, StoreError> {
        let bytes = resp.bytes().await.map_err(|e| StoreError::Json {
            detail: e.to_string(),
        })?;
        parse_snapshot(&bytes)
    }
}

/// Accept both the bare document and a `{ "session": {...} }` envelope.
pub(crate) fn parse_snapshot(bytes: &[u8]) -> Result<Snapshot, StoreError> {
    if let Ok(snapshot) = serde_json::from_slice::<Snapshot>(bytes) {
        return Ok(snapshot);
    }

    #[derive(Deserialize)]
    struct Wrapped {
        session: Snapshot,
    }

    serde_json::from_slice::<Wrapped>(bytes)
        .map(|w| w.session)
        .map_err(|e| StoreError::Json {
            detail: e.to_string(),
        })
}

impl DocumentStore for HttpStore {
    async fn fetch(&self, id: &SessionId) -> Result<Snapshot, StoreError> {
        let url = self.session_url(id);
        debug!(%url, "fetching session snapshot");
        let resp = self.send(self.client.get(&url), &url).await?;
        Self::read_snapshot(resp).await
    }

    async fn create(&self, draft: &Draft) -> Result<Snapshot, StoreError> {
        let url = format!("{}/sessions", self.base_url);
        debug!(%url, bytes = draft.content.len(), "creating session");
        let resp = self.send(self.client.post(&url).json(draft), &url).await?;
        Self::read_snapshot(resp).await
    }

    async fn update(&self, id: &SessionId, draft: &Draft) -> Result<(), StoreError> {
        let url = self.session_url(id);
        debug!(%url, bytes = draft.content.len(), "publishing session snapshot");
        self.send(self.client.put(&url).json(draft), &url).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_slash_is_trimmed() {
        let store = HttpStore::new("http://localhost:5000/api/", Duration::from_secs(1), Duration::from_secs(1));
        assert_eq!(store.base_url(), "http://localhost:5000/api");
        let id = SessionId::parse("AB12CD").unwrap();
        assert_eq!(store.session_url(&id), "http://localhost:5000/api/sessions/AB12CD");
    }

    #[test]
    fn test_parse_snapshot_bare() {
        let snap = parse_snapshot(br#"{"id":"AB12CD","content":"x","language":"go"}"#).unwrap();
        assert_eq!(snap.content, "x");
    }

    #[test]
    fn test_parse_snapshot_wrapped() {
        let snap = parse_snapshot(br#"{"session":{"id":"AB12CD","content":"y","language":"go"}}"#).unwrap();
        assert_eq!(snap.content, "y");
    }

    #[test]
    fn test_parse_snapshot_garbage_is_json_error() {
        assert!(matches!(parse_snapshot(b"<html>"), Err(StoreError::Json { .. })));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_connect_error() {
        let addr = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let store = HttpStore::new(format!("http://{addr}"), Duration::from_millis(200), Duration::from_millis(500));
        let id = SessionId::parse("AB12CD").unwrap();
        let err = store.fetch(&id).await.unwrap_err();
        assert!(matches!(err, StoreError::Connect { .. }), "{err:?}");
    }
}

//! Error types for the sync engine and its collaborators.
//!
//! Only [`SyncError`] ever reaches callers of [`crate::engine::CodeShare`].
//! [`TransportError`] is absorbed by the engine and shows up solely as a
//! change in `connection_status`.

use std::time::Duration;

use crate::session::SessionId;

/// Caller-visible failures of lifecycle and publish operations.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The session id is unknown to the store or has expired.
    #[error("session '{0}' not found or expired")]
    SessionNotFound(SessionId),

    /// Persisting the current content to the store failed. Live sync is unaffected.
    #[error("publishing session '{session}' failed: {source}")]
    PublishFailed {
        session: SessionId,
        #[source]
        source: StoreError,
    },

    /// The operation needs an Active session and there is none.
    #[error("no active session")]
    NoActiveSession,

    /// A later lifecycle request replaced this one before it completed.
    #[error("request superseded by a later session change")]
    Superseded,

    #[error("invalid session id '{0}'")]
    InvalidSessionId(String),

    /// The store failed for a reason other than not-found.
    #[error("document store error: {0}")]
    Store(#[from] StoreError),

    /// The engine task is no longer running.
    #[error("sync engine stopped")]
    EngineStopped,
}

/// Failures of the one-shot document store round-trips.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("document not found")]
    NotFound,

    /// The server replied with a non-2xx status other than not-found.
    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    #[error("connection failed to {url}: {detail}")]
    Connect { url: String, detail: String },

    #[error("malformed response body: {detail}")]
    Json { detail: String },
}

/// Failures of the live channel. Never surfaced to callers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed to {url}: {detail}")]
    Connect { url: String, detail: String },

    #[error("connect timed out after {0:?}")]
    Timeout(Duration),

    #[error("channel closed")]
    Closed,
}

/// Failures loading or validating [`crate::config::SyncConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("parsing config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_not_found_mentions_id() {
        let err = SyncError::SessionNotFound(SessionId::parse("AB12CD").unwrap());
        assert!(err.to_string().contains("AB12CD"), "{err}");
    }

    #[test]
    fn test_publish_failed_exposes_source() {
        use std::error::Error as _;
        let err = SyncError::PublishFailed {
            session: SessionId::parse("AB12CD").unwrap(),
            source: StoreError::Http { status: 503, url: "http://x/sessions/AB12CD".into() },
        };
        let source = err.source().expect("source should be set");
        assert!(source.to_string().contains("503"));
    }

    #[test]
    fn test_store_error_converts_into_sync_error() {
        let err: SyncError = StoreError::Json { detail: "eof".into() }.into();
        assert!(matches!(err, SyncError::Store(StoreError::Json { .. })));
    }

    #[test]
    fn test_transport_timeout_display() {
        let err = TransportError::Timeout(Duration::from_secs(5));
        assert!(err.to_string().contains("5s"), "{err}");
    }
}

//! # Document Store
//!
//! One-shot request/response collaborator that owns session persistence.
//!
//! - [`DocumentStore`]: the three round-trips the engine needs
//! - [`http::HttpStore`]: the real backend over `reqwest`
//! - [`memory::MemoryStore`]: in-process store for tests and offline demos

use std::future::Future;

use crate::error::StoreError;
use crate::session::{Draft, SessionId, Snapshot};

pub mod http;
pub mod memory;

pub use http::HttpStore;
pub use memory::MemoryStore;

/// Snapshot fetch, creation and update against the server-held document.
///
/// Implementations must map an unknown or expired id to [`StoreError::NotFound`].
pub trait DocumentStore: Send + Sync + 'static {
    /// `GET /sessions/{id}`
    fn fetch(&self, id: &SessionId) -> impl Future<Output = Result<Snapshot, StoreError>> + Send;

    /// `POST /sessions`; the server assigns the id.
    fn create(&self, draft: &Draft) -> impl Future<Output = Result<Snapshot, StoreError>> + Send;

    /// `PUT /sessions/{id}`
    fn update(
        &self,
        id: &SessionId,
        draft: &Draft,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

//! Client-side sync engine for live CodeShare sessions.
//!
//! A [`CodeShare`] handle drives one engine task that keeps a local text
//! buffer and its language tag in sync with every peer in the same session:
//! the document is fetched over HTTP, then whole-document updates flow over a
//! WebSocket, debounced on the way out and echo-filtered on the way in.
//!
//! ```no_run
//! # async fn demo() -> Result<(), codeshare_sync::SyncError> {
//! use codeshare_sync::{CodeShare, SyncConfig};
//!
//! let share = CodeShare::connect(SyncConfig::default());
//! share.join_session("AB12CD").await?;
//! share.set_content("fn main() {}")?;
//! println!("{:?}", share.share_link());
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod cli;
pub mod config;
pub mod debounce;
pub mod engine;
pub mod error;
pub mod protocol;
pub mod reconcile;
pub mod session;
pub mod store;
pub mod transport;

pub use backoff::{ReconnectPolicy, ReconnectTimer};
pub use config::{SyncConfig, SyncConfigBuilder};
pub use engine::{CodeShare, ConnectionStatus, SessionPhase, SyncState};
pub use error::{ConfigError, StoreError, SyncError, TransportError};
pub use protocol::{CloseCode, WireMessage};
pub use session::{Draft, SessionId, Snapshot};
pub use store::{DocumentStore, HttpStore, MemoryStore};
pub use transport::{Connector, HubEvent, MemoryHub, WsConnector};

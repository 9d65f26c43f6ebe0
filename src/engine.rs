//! Session lifecycle controller and the public [`CodeShare`] handle.
//!
//! ## Design
//! - One engine task exclusively owns the session phase, the
//!   [`TransportChannel`], the [`Debouncer`] slot and the [`ReconnectTimer`].
//! - [`CodeShare`] handles talk to it over an unbounded mpsc channel; requests
//!   that produce a result carry a oneshot reply.
//! - Observable state goes out through a `watch` channel and is only sent
//!   when a field actually changed.
//! - Store round-trips run in their own tasks and report back with a load
//!   ticket. A newer lifecycle request aborts the in-flight load and answers
//!   its caller with [`SyncError::Superseded`].
//!
//! ## Phases
//! `NoSession -> Loading -> Active(id) -> Terminated`, plus
//! `Active -> NoSession` on leave and `Active -> Loading` on a switch.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

use crate::backoff::ReconnectTimer;
use crate::config::SyncConfig;
use crate::debounce::Debouncer;
use crate::error::{StoreError, SyncError};
use crate::protocol::{CloseCode, WireMessage};
use crate::reconcile::Reconciler;
use crate::session::{Draft, PendingEdit, SessionId, Snapshot};
use crate::store::{DocumentStore, HttpStore};
use crate::transport::{Connector, EventKind, TransportChannel, TransportEvent, WsConnector};

/// Live channel status as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
        };
        write!(f, "{s}")
    }
}

/// Session lifecycle phase as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    NoSession,
    Loading,
    Active,
    Terminated,
}

/// Everything a UI re-renders from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncState {
    pub session_id: Option<SessionId>,
    pub content: String,
    pub language: String,
    pub connection: ConnectionStatus,
    pub phase: SessionPhase,
}

type LoadReply = oneshot::Sender<Result<Snapshot, SyncError>>;

enum Request {
    SetContent(String),
    SetLanguage(String),
    Create { reply: LoadReply },
    Join { id: SessionId, reply: LoadReply },
    Leave { reply: oneshot::Sender<()> },
    Publish { reply: oneshot::Sender<Result<(), SyncError>> },
    Shutdown { reply: oneshot::Sender<()> },
}

enum Completion {
    Loaded {
        ticket: u64,
        result: Result<Snapshot, StoreError>,
    },
    Published {
        session: SessionId,
        result: Result<(), StoreError>,
        reply: oneshot::Sender<Result<(), SyncError>>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum LoadKind {
    Join(SessionId),
    Create,
}

enum Phase {
    NoSession,
    Loading {
        ticket: u64,
        kind: LoadKind,
        reply: LoadReply,
        task: JoinHandle<()>,
    },
    Active(SessionId),
    Terminated(Option<SessionId>),
}

struct Engine<S, C> {
    config: SyncConfig,
    store: Arc<S>,
    channel: TransportChannel<C>,
    transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
    completion_tx: mpsc::UnboundedSender<Completion>,
    completion_rx: mpsc::UnboundedReceiver<Completion>,
    debouncer: Debouncer,
    reconnect: ReconnectTimer,
    doc: Reconciler,
    phase: Phase,
    connection: ConnectionStatus,
    next_ticket: u64,
    /// A flush was dropped while the channel was not Open.
    unsent: bool,
    state_tx: watch::Sender<SyncState>,
}

impl<S: DocumentStore, C: Connector> Engine<S, C> {
    async fn run(mut self, mut requests: mpsc::UnboundedReceiver<Request>) {
        loop {
            tokio::select! {
                req = requests.recv() => match req {
                    Some(Request::Shutdown { reply }) => {
                        self.teardown();
                        let _ = reply.send(());
                        break;
                    }
                    Some(req) => self.on_request(req),
                    None => {
                        self.teardown();
                        break;
                    }
                },
                Some(event) = self.transport_rx.recv() => self.on_transport(event),
                Some(done) = self.completion_rx.recv() => self.on_completion(done),
                edit = self.debouncer.expired() => self.flush(edit),
                attempt = self.reconnect.fired() => self.retry(attempt),
            }
        }
        info!("sync engine stopped");
    }

    // -- requests ------------------------------------------------------------

    fn on_request(&mut self, req: Request) {
        match req {
            Request::SetContent(text) => {
                self.doc.set_content(&text);
                self.after_local_edit();
            }
            Request::SetLanguage(tag) => {
                self.doc.set_language(&tag);
                self.after_local_edit();
            }
            Request::Join { id, reply } => {
                self.teardown();
                info!(session = %id, "joining session");
                let store = Arc::clone(&self.store);
                let fetch_id = id.clone();
                self.begin_load(LoadKind::Join(id), reply, async move { store.fetch(&fetch_id).await });
            }
            Request::Create { reply } => {
                self.teardown();
                let draft = Draft::new(self.doc.content(), self.doc.language());
                info!(bytes = draft.content.len(), language = %draft.language, "creating session");
                let store = Arc::clone(&self.store);
                self.begin_load(LoadKind::Create, reply, async move { store.create(&draft).await });
            }
            Request::Leave { reply } => {
                self.teardown();
                if let Phase::Active(id) = &self.phase {
                    info!(session = %id, "leaving session");
                }
                self.phase = Phase::NoSession;
                let language = self.config.default_language.clone();
                self.doc.reset("", &language);
                self.publish_state();
                let _ = reply.send(());
            }
            Request::Publish { reply } => {
                let Phase::Active(id) = &self.phase else {
                    let _ = reply.send(Err(SyncError::NoActiveSession));
                    return;
                };
                let session = id.clone();
                let draft = Draft::new(self.doc.content(), self.doc.language());
                let store = Arc::clone(&self.store);
                let done = self.completion_tx.clone();
                debug!(session = %session, "publishing snapshot");
                tokio::spawn(async move {
                    let result = store.update(&session, &draft).await;
                    let _ = done.send(Completion::Published { session, result, reply });
                });
            }
            // Handled in `run`.
            Request::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    fn after_local_edit(&mut self) {
        if matches!(self.phase, Phase::Active(_)) {
            self.debouncer.schedule(self.doc.content(), self.doc.language());
        }
        self.publish_state();
    }

    fn begin_load<F>(&mut self, kind: LoadKind, reply: LoadReply, request: F)
    where
        F: std::future::Future<Output = Result<Snapshot, StoreError>> + Send + 'static,
    {
        self.next_ticket += 1;
        let ticket = self.next_ticket;
        let done = self.completion_tx.clone();
        let task = tokio::spawn(async move {
            let result = request.await;
            let _ = done.send(Completion::Loaded { ticket, result });
        });
        self.phase = Phase::Loading { ticket, kind, reply, task };
        self.publish_state();
    }

    // -- completions ---------------------------------------------------------

    fn on_completion(&mut self, done: Completion) {
        match done {
            Completion::Loaded { ticket, result } => self.on_loaded(ticket, result),
            Completion::Published { session, result, reply } => {
                let outcome = match result {
                    Ok(()) => Ok(()),
                    Err(StoreError::NotFound) => {
                        if matches!(&self.phase, Phase::Active(id) if *id == session) {
                            warn!(session = %session, "store no longer knows this session");
                            self.terminate();
                        }
                        Err(SyncError::SessionNotFound(session))
                    }
                    Err(source) => {
                        warn!(session = %session, error = %source, "publish failed");
                        Err(SyncError::PublishFailed { session, source })
                    }
                };
                let _ = reply.send(outcome);
            }
        }
    }

    fn on_loaded(&mut self, ticket: u64, result: Result<Snapshot, StoreError>) {
        let current = matches!(&self.phase, Phase::Loading { ticket: t, .. } if *t == ticket);
        if !current {
            debug!(ticket, "discarding stale store completion");
            return;
        }
        let Phase::Loading { kind, reply, .. } = std::mem::replace(&mut self.phase, Phase::NoSession) else {
            return;
        };

        match result {
            Ok(mut snapshot) => {
                if snapshot.language.is_empty() {
                    snapshot.language = self.config.default_language.clone();
                }
                match &kind {
                    LoadKind::Join(_) => {
                        self.doc.reset(&snapshot.content, &snapshot.language);
                    }
                    LoadKind::Create => {
                        // Keep anything typed during the round-trip; push it live.
                        if self.doc.content() != snapshot.content || self.doc.language() != snapshot.language {
                            self.debouncer.schedule(self.doc.content(), self.doc.language());
                        }
                    }
                }
                info!(session = %snapshot.id, "session active");
                self.phase = Phase::Active(snapshot.id.clone());
                self.channel.open(snapshot.id.clone());
                self.connection = ConnectionStatus::Connecting;
                self.publish_state();
                let _ = reply.send(Ok(snapshot));
            }
            Err(StoreError::NotFound) => {
                let err = match kind {
                    LoadKind::Join(id) => {
                        warn!(session = %id, "session not found or expired");
                        self.phase = Phase::Terminated(Some(id.clone()));
                        SyncError::SessionNotFound(id)
                    }
                    LoadKind::Create => {
                        self.phase = Phase::NoSession;
                        SyncError::Store(StoreError::NotFound)
                    }
                };
                self.publish_state();
                let _ = reply.send(Err(err));
            }
            Err(e) => {
                warn!(error = %e, "store request failed");
                self.phase = Phase::NoSession;
                self.publish_state();
                let _ = reply.send(Err(SyncError::Store(e)));
            }
        }
    }

    // -- transport -----------------------------------------------------------

    fn on_transport(&mut self, event: TransportEvent) {
        let Some(kind) = self.channel.accept(event) else {
            return;
        };
        let Phase::Active(session) = &self.phase else {
            return;
        };
        let session = session.clone();

        match kind {
            EventKind::Opened => {
                self.reconnect.reset_attempts();
                self.connection = ConnectionStatus::Connected;
                if self.unsent && !self.debouncer.is_pending() {
                    debug!(session = %session, "resending state dropped while offline");
                    let edit = PendingEdit {
                        content: self.doc.content().to_string(),
                        language: self.doc.language().to_string(),
                    };
                    self.flush(edit);
                }
                self.publish_state();
            }
            EventKind::Message(text) => {
                let msg = match WireMessage::decode(&text) {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!(session = %session, error = %e, "ignoring malformed live message");
                        return;
                    }
                };
                if self.debouncer.is_pending() {
                    // The pending local edit will be the later write.
                    debug!(session = %session, "remote update superseded by pending local edit");
                    return;
                }
                if self.doc.apply_message(&msg, &self.config.default_language).changed() {
                    debug!(session = %session, bytes = msg.content.len(), "applied remote update");
                    self.publish_state();
                }
            }
            EventKind::Closed(code) if code.is_deliberate() => {
                info!(session = %session, %code, "live channel closed deliberately");
                self.connection = ConnectionStatus::Disconnected;
                self.publish_state();
            }
            EventKind::Closed(code) => {
                warn!(session = %session, %code, "live channel closed abnormally");
                self.schedule_reconnect(&session);
            }
            EventKind::Failed(e) => {
                warn!(session = %session, error = %e, "live channel failed");
                self.schedule_reconnect(&session);
            }
        }
    }

    fn schedule_reconnect(&mut self, session: &SessionId) {
        self.connection = ConnectionStatus::Disconnected;
        match self.reconnect.schedule(&self.config.reconnect) {
            Some(delay) => {
                info!(session = %session, attempt = self.reconnect.attempt(), ?delay, "reconnect scheduled");
                self.publish_state();
            }
            None => {
                warn!(session = %session, attempts = self.reconnect.attempt(), "giving up on live channel");
                self.terminate();
            }
        }
    }

    fn retry(&mut self, attempt: u32) {
        let Phase::Active(session) = &self.phase else {
            return;
        };
        let session = session.clone();
        info!(session = %session, attempt, "reconnecting");
        self.channel.open(session);
        self.connection = ConnectionStatus::Connecting;
        self.publish_state();
    }

    fn flush(&mut self, edit: PendingEdit) {
        let Phase::Active(session) = &self.phase else {
            return;
        };
        let text = match WireMessage::new(edit.content, edit.language).encode() {
            Ok(text) => text,
            Err(e) => {
                warn!(session = %session, error = %e, "could not encode update");
                return;
            }
        };
        if self.channel.send(text) {
            self.unsent = false;
        } else {
            // Dropped on purpose: the next open resends current state.
            debug!(session = %session, "send dropped, channel not open");
            self.unsent = true;
        }
    }

    // -- teardown ------------------------------------------------------------

    /// Cancel the pending flush, close the channel deliberately, cancel any
    /// scheduled reconnect and abandon an in-flight load.
    fn teardown(&mut self) {
        self.debouncer.cancel();
        self.channel.close(CloseCode::NORMAL);
        self.reconnect.cancel();
        self.unsent = false;
        self.connection = ConnectionStatus::Disconnected;
        if matches!(self.phase, Phase::Loading { .. }) {
            if let Phase::Loading { reply, task, .. } = std::mem::replace(&mut self.phase, Phase::NoSession) {
                task.abort();
                let _ = reply.send(Err(SyncError::Superseded));
            }
        }
    }

    fn terminate(&mut self) {
        let id = match &self.phase {
            Phase::Active(id) => Some(id.clone()),
            _ => None,
        };
        self.teardown();
        self.phase = Phase::Terminated(id);
        self.publish_state();
    }

    // -- observable state ----------------------------------------------------

    fn current_state(&self) -> SyncState {
        let (session_id, phase) = match &self.phase {
            Phase::NoSession => (None, SessionPhase::NoSession),
            Phase::Loading { kind: LoadKind::Join(id), .. } => (Some(id.clone()), SessionPhase::Loading),
            Phase::Loading { kind: LoadKind::Create, .. } => (None, SessionPhase::Loading),
            Phase::Active(id) => (Some(id.clone()), SessionPhase::Active),
            Phase::Terminated(id) => (id.clone(), SessionPhase::Terminated),
        };
        SyncState {
            session_id,
            content: self.doc.content().to_string(),
            language: self.doc.language().to_string(),
            connection: self.connection,
            phase,
        }
    }

    fn publish_state(&self) {
        let next = self.current_state();
        self.state_tx.send_if_modified(|state| {
            if *state == next {
                false
            } else {
                *state = next;
                true
            }
        });
    }
}

/// Cloneable handle to a running sync engine.
///
/// Dropping every handle tears the session down and stops the engine.
#[derive(Clone)]
pub struct CodeShare {
    requests: mpsc::UnboundedSender<Request>,
    state: watch::Receiver<SyncState>,
    share_base_url: String,
}

impl CodeShare {
    /// Start an engine on the current tokio runtime.
    pub fn spawn<S: DocumentStore, C: Connector>(config: SyncConfig, store: S, connector: C) -> Self {
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();

        let doc = Reconciler::new("", config.default_language.clone());
        let initial = SyncState {
            session_id: None,
            content: String::new(),
            language: config.default_language.clone(),
            connection: ConnectionStatus::Disconnected,
            phase: SessionPhase::NoSession,
        };
        let (state_tx, state_rx) = watch::channel(initial);
        let share_base_url = config.share_base_url.trim_end_matches('/').to_string();

        let engine = Engine {
            debouncer: Debouncer::new(config.debounce()),
            channel: TransportChannel::new(Arc::new(connector), transport_tx),
            store: Arc::new(store),
            config,
            transport_rx,
            completion_tx,
            completion_rx,
            reconnect: ReconnectTimer::new(),
            doc,
            phase: Phase::NoSession,
            connection: ConnectionStatus::Disconnected,
            next_ticket: 0,
            unsent: false,
            state_tx,
        };
        let span = tracing::info_span!("codeshare", client = %uuid::Uuid::new_v4());
        tokio::spawn(engine.run(requests_rx).instrument(span));

        Self {
            requests: requests_tx,
            state: state_rx,
            share_base_url,
        }
    }

    /// Start an engine backed by the HTTP store and the WebSocket live channel.
    pub fn connect(config: SyncConfig) -> Self {
        let store = HttpStore::new(
            config.api_base_url.clone(),
            config.connect_timeout(),
            config.request_timeout(),
        );
        let connector = WsConnector::new(config.ws_base_url.clone(), config.connect_timeout());
        Self::spawn(config, store, connector)
    }

    fn send(&self, req: Request) -> Result<(), SyncError> {
        self.requests.send(req).map_err(|_| SyncError::EngineStopped)
    }

    async fn call<T>(&self, req: Request, rx: oneshot::Receiver<T>) -> Result<T, SyncError> {
        self.send(req)?;
        rx.await.map_err(|_| SyncError::EngineStopped)
    }

    // -- observable state ----------------------------------------------------

    /// Current state.
    pub fn state(&self) -> SyncState {
        self.state.borrow().clone()
    }

    /// A receiver woken whenever any observable field changes.
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state.clone()
    }

    pub fn content(&self) -> String {
        self.state.borrow().content.clone()
    }

    pub fn language(&self) -> String {
        self.state.borrow().language.clone()
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.state.borrow().session_id.clone()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.state.borrow().connection
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.borrow().phase
    }

    /// Shareable URL of the active session.
    pub fn share_link(&self) -> Option<String> {
        let state = self.state.borrow();
        match (&state.session_id, state.phase) {
            (Some(id), SessionPhase::Active) => Some(format!("{}/{}", self.share_base_url, id)),
            _ => None,
        }
    }

    // -- local edits ---------------------------------------------------------

    /// Replace the local buffer. Sent to peers after the debounce delay.
    pub fn set_content(&self, text: impl Into<String>) -> Result<(), SyncError> {
        self.send(Request::SetContent(text.into()))
    }

    pub fn set_language(&self, tag: impl Into<String>) -> Result<(), SyncError> {
        self.send(Request::SetLanguage(tag.into()))
    }

    // -- lifecycle -----------------------------------------------------------

    /// Create a session holding the current local content and join it.
    pub async fn create_session(&self) -> Result<SessionId, SyncError> {
        let (reply, rx) = oneshot::channel();
        let snapshot = self.call(Request::Create { reply }, rx).await??;
        Ok(snapshot.id)
    }

    /// Load `id` from the store and go live on it, leaving any current session.
    pub async fn join_session(&self, id: &str) -> Result<Snapshot, SyncError> {
        let id = SessionId::parse(id)?;
        let (reply, rx) = oneshot::channel();
        self.call(Request::Join { id, reply }, rx).await?
    }

    /// Leave the current session and clear the local document.
    pub async fn leave_session(&self) -> Result<(), SyncError> {
        let (reply, rx) = oneshot::channel();
        self.call(Request::Leave { reply }, rx).await
    }

    /// Persist the current content to the store. Live sync is unaffected.
    pub async fn publish_snapshot(&self) -> Result<(), SyncError> {
        let (reply, rx) = oneshot::channel();
        self.call(Request::Publish { reply }, rx).await?
    }

    /// Tear down any session and stop the engine.
    pub async fn shutdown(&self) -> Result<(), SyncError> {
        let (reply, rx) = oneshot::channel();
        self.call(Request::Shutdown { reply }, rx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::transport::MemoryHub;

    fn engine() -> CodeShare {
        CodeShare::spawn(SyncConfig::default(), MemoryStore::new(), MemoryHub::new())
    }

    #[tokio::test]
    async fn test_initial_state_is_idle() {
        let cs = engine();
        let state = cs.state();
        assert_eq!(state.phase, SessionPhase::NoSession);
        assert_eq!(state.connection, ConnectionStatus::Disconnected);
        assert_eq!(state.language, "javascript");
        assert!(cs.share_link().is_none());
    }

    #[tokio::test]
    async fn test_local_edit_without_session_updates_state() {
        let cs = engine();
        let mut rx = cs.subscribe();
        cs.set_content("draft").unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().content, "draft");
        assert_eq!(rx.borrow().phase, SessionPhase::NoSession);
    }

    #[tokio::test]
    async fn test_publish_without_session_is_rejected() {
        let cs = engine();
        assert!(matches!(cs.publish_snapshot().await, Err(SyncError::NoActiveSession)));
    }

    #[tokio::test]
    async fn test_invalid_join_id_is_rejected_before_any_request() {
        let cs = engine();
        assert!(matches!(
            cs.join_session("bad id").await,
            Err(SyncError::InvalidSessionId(_))
        ));
        assert_eq!(cs.phase(), SessionPhase::NoSession);
    }

    #[tokio::test]
    async fn test_calls_after_shutdown_report_stopped() {
        let cs = engine();
        cs.shutdown().await.unwrap();
        // The engine task has exited; its receiver is gone.
        tokio::task::yield_now().await;
        assert!(matches!(cs.set_content("x"), Err(SyncError::EngineStopped)));
        assert!(matches!(cs.leave_session().await, Err(SyncError::EngineStopped)));
    }

    #[test]
    fn test_connection_status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&ConnectionStatus::Connected).unwrap(), "\"connected\"");
        assert_eq!(ConnectionStatus::Connecting.to_string(), "connecting");
    }
}

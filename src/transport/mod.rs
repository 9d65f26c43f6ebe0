//! # Transport Channel
//!
//! Owns the single live connection bound to one session.
//!
//! ## Design
//! - A [`Connector`] produces a [`Link`]: a pair of unbounded frame channels
//!   to one physical connection. [`ws::WsConnector`] bridges a WebSocket,
//!   [`hub::MemoryHub`] an in-process room.
//! - Each [`TransportChannel::open`] spawns one pump task and bumps the
//!   channel's generation. Every [`TransportEvent`] carries the generation
//!   that produced it, and [`TransportChannel::accept`] drops stale ones.
//! - A new pump first awaits the previous pump, so the old connection is
//!   fully closed before the new one is attempted.
//! - [`TransportChannel::send`] is a no-op unless the channel is Open.
//!   Nothing is buffered.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::protocol::{CloseCode, Frame};
use crate::session::SessionId;

pub mod hub;
pub mod ws;

pub use hub::{HubEvent, MemoryHub};
pub use ws::WsConnector;

/// How long a closing side waits for the peer to finish the close handshake.
pub const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// One end of a physical connection.
///
/// The connection is over once `inbound` yields `None`; if that happens
/// without a [`Frame::Close`] first, the close was abnormal.
#[derive(Debug)]
pub struct Link {
    pub outbound: mpsc::UnboundedSender<Frame>,
    pub inbound: mpsc::UnboundedReceiver<Frame>,
}

impl Link {
    /// Two ends wired to each other: what one sends, the other receives.
    pub fn pair() -> (Link, Link) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (
            Link { outbound: a_tx, inbound: b_rx },
            Link { outbound: b_tx, inbound: a_rx },
        )
    }
}

/// Establishes physical connections for a session.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, session: &SessionId) -> impl Future<Output = Result<Link, TransportError>> + Send;
}

/// Lifecycle states of a [`TransportChannel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Connecting,
    Open,
    Closed,
    Errored,
}

/// What happened on a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Opened,
    Message(String),
    Closed(CloseCode),
    /// The connection could not be established.
    Failed(TransportError),
}

/// A connection event tagged with the generation that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportEvent {
    pub generation: u64,
    pub kind: EventKind,
}

#[derive(Debug)]
enum Command {
    Send(String),
    Close(CloseCode),
}

/// At most one live connection at a time.
pub struct TransportChannel<C> {
    connector: Arc<C>,
    events: mpsc::UnboundedSender<TransportEvent>,
    generation: u64,
    state: ChannelState,
    session: Option<SessionId>,
    commands: Option<mpsc::UnboundedSender<Command>>,
    pump: Option<JoinHandle<()>>,
}

impl<C: Connector> TransportChannel<C> {
    /// Events from every connection this channel opens are delivered to `events`.
    pub fn new(connector: Arc<C>, events: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self {
            connector,
            events,
            generation: 0,
            state: ChannelState::Idle,
            session: None,
            commands: None,
            pump: None,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn session(&self) -> Option<&SessionId> {
        self.session.as_ref()
    }

    /// Close whatever is open and start connecting to `session`.
    ///
    /// Readiness is reported later through [`EventKind::Opened`].
    pub fn open(&mut self, session: SessionId) -> u64 {
        self.close(CloseCode::NORMAL);
        self.generation += 1;
        self.state = ChannelState::Connecting;

        let (tx, rx) = mpsc::unbounded_channel();
        self.commands = Some(tx);
        self.session = Some(session.clone());

        debug!(session = %session, generation = self.generation, "opening live channel");
        let pump = run_pump(
            Arc::clone(&self.connector),
            session,
            self.generation,
            self.pump.take(),
            rx,
            self.events.clone(),
        );
        self.pump = Some(tokio::spawn(pump));
        self.generation
    }

    /// Transmit a text frame. Returns `false`, without buffering, unless Open.
    pub fn send(&self, text: String) -> bool {
        if self.state != ChannelState::Open {
            return false;
        }
        match &self.commands {
            Some(tx) => tx.send(Command::Send(text)).is_ok(),
            None => false,
        }
    }

    /// Close the current connection with `code`. Idempotent.
    ///
    /// Events the old connection emits afterwards are discarded by [`accept`](Self::accept).
    pub fn close(&mut self, code: CloseCode) {
        if let Some(tx) = self.commands.take() {
            debug!(session = ?self.session, generation = self.generation, %code, "closing live channel");
            let _ = tx.send(Command::Close(code));
            self.generation += 1;
        }
        if matches!(self.state, ChannelState::Connecting | ChannelState::Open) {
            self.state = ChannelState::Closed;
        }
        self.session = None;
    }

    /// Filter an event through the channel: `None` for stale generations,
    /// otherwise the event after updating the channel state.
    pub fn accept(&mut self, event: TransportEvent) -> Option<EventKind> {
        if event.generation != self.generation || self.commands.is_none() {
            debug!(
                event_generation = event.generation,
                current_generation = self.generation,
                "dropping stale transport event"
            );
            return None;
        }
        match &event.kind {
            EventKind::Opened => self.state = ChannelState::Open,
            EventKind::Message(_) => {}
            EventKind::Closed(_) => {
                self.state = ChannelState::Closed;
                self.commands = None;
            }
            EventKind::Failed(_) => {
                self.state = ChannelState::Errored;
                self.commands = None;
            }
        }
        Some(event.kind)
    }
}

impl<C> Drop for TransportChannel<C> {
    fn drop(&mut self) {
        if let Some(tx) = self.commands.take() {
            let _ = tx.send(Command::Close(CloseCode::NORMAL));
        }
    }
}

/// Drive one connection from connect to close.
async fn run_pump<C: Connector>(
    connector: Arc<C>,
    session: SessionId,
    generation: u64,
    previous: Option<JoinHandle<()>>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    if let Some(previous) = previous {
        let _ = previous.await;
    }

    let emit = |kind: EventKind| {
        let _ = events.send(TransportEvent { generation, kind });
    };

    let connect = connector.connect(&session);
    tokio::pin!(connect);
    let mut link = loop {
        tokio::select! {
            result = &mut connect => match result {
                Ok(link) => break link,
                Err(e) => {
                    warn!(session = %session, generation, error = %e, "live channel connect failed");
                    emit(EventKind::Failed(e));
                    return;
                }
            },
            cmd = commands.recv() => match cmd {
                // Sends are refused before Open; nothing to deliver.
                Some(Command::Send(_)) => continue,
                Some(Command::Close(_)) | None => {
                    debug!(session = %session, generation, "connect abandoned");
                    return;
                }
            },
        }
    };

    info!(session = %session, generation, "live channel open");
    emit(EventKind::Opened);

    loop {
        tokio::select! {
            cmd = commands.recv() => match cmd {
                Some(Command::Send(text)) => {
                    if link.outbound.send(Frame::Text(text)).is_err() {
                        emit(EventKind::Closed(CloseCode::ABNORMAL));
                        return;
                    }
                }
                Some(Command::Close(code)) => {
                    finish(&mut link, code).await;
                    return;
                }
                None => {
                    finish(&mut link, CloseCode::NORMAL).await;
                    return;
                }
            },
            frame = link.inbound.recv() => match frame {
                Some(Frame::Text(text)) => emit(EventKind::Message(text)),
                Some(Frame::Close(code)) => {
                    info!(session = %session, generation, %code, "live channel closed by peer");
                    emit(EventKind::Closed(code));
                    return;
                }
                None => {
                    warn!(session = %session, generation, "live channel dropped");
                    emit(EventKind::Closed(CloseCode::ABNORMAL));
                    return;
                }
            },
        }
    }
}

/// Send a close frame and wait, bounded, for the peer side to wind down.
/// Frames still in flight are discarded.
async fn finish(link: &mut Link, code: CloseCode) {
    if link.outbound.send(Frame::Close(code)).is_err() {
        return;
    }
    let drained = tokio::time::timeout(CLOSE_GRACE, async {
        while link.inbound.recv().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        debug!(%code, "peer did not finish close handshake in time");
    }
}

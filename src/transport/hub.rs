//! In-process live channel: one broadcast room per session.
//!
//! ## Design
//! - Rooms: `Arc<Mutex<HashMap<SessionId, Room>>>` shared by every clone of the hub
//! - Each room has a `tokio::sync::broadcast` channel for fan-out
//! - Every text frame a connection sends is broadcast to all connections of
//!   the room, the sender included, the way a relay server echoes updates
//! - Connections can be dropped from the outside to simulate network loss
//!
//! The hub keeps an ordered log of connects and disconnects so callers can
//! check lifecycle ordering.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, oneshot};
use tracing::debug;

use super::{Connector, Link};
use crate::error::TransportError;
use crate::protocol::{CloseCode, Frame};
use crate::session::SessionId;

/// Broadcast capacity per room.
pub const ROOM_CHANNEL_CAP: usize = 256;

/// Lifecycle record of one hub connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubEvent {
    Connected(SessionId),
    /// The client closed with the given code.
    Disconnected(SessionId, CloseCode),
    /// The hub closed the connection with the given code.
    ServerClosed(SessionId, CloseCode),
    /// The hub severed the connection without a close frame.
    Dropped(SessionId),
}

/// Sent through a connection's kill switch: `None` severs it silently.
type Kill = Option<CloseCode>;

struct Room {
    broadcast_tx: broadcast::Sender<String>,
    kill_switches: HashMap<u64, oneshot::Sender<Kill>>,
}

#[derive(Default)]
struct Inner {
    rooms: HashMap<SessionId, Room>,
    log: Vec<HubEvent>,
    next_conn: u64,
    refuse: bool,
}

/// Cloneable handle to a shared set of rooms.
#[derive(Clone, Default)]
pub struct MemoryHub {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse (or accept again) new connections.
    pub fn set_refuse(&self, refuse: bool) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.refuse = refuse;
        }
    }

    /// Ordered connect/disconnect history.
    pub fn log(&self) -> Vec<HubEvent> {
        self.inner.lock().map(|g| g.log.clone()).unwrap_or_default()
    }

    /// Live connections currently attached to `session`.
    pub fn connection_count(&self, session: &SessionId) -> usize {
        self.inner
            .lock()
            .ok()
            .and_then(|g| g.rooms.get(session).map(|r| r.kill_switches.len()))
            .unwrap_or(0)
    }

    /// Sever every connection of `session` abruptly. Returns how many were cut.
    pub fn drop_connections(&self, session: &SessionId) -> usize {
        self.kill_all(session, None)
    }

    /// Close every connection of `session` with a close frame carrying `code`.
    pub fn close_connections(&self, session: &SessionId, code: CloseCode) -> usize {
        self.kill_all(session, Some(code))
    }

    fn kill_all(&self, session: &SessionId, kill: Kill) -> usize {
        let switches: Vec<oneshot::Sender<Kill>> = match self.inner.lock() {
            Ok(mut guard) => match guard.rooms.get_mut(session) {
                Some(room) => room.kill_switches.drain().map(|(_, tx)| tx).collect(),
                None => Vec::new(),
            },
            Err(_) => Vec::new(),
        };
        let count = switches.len();
        for tx in switches {
            let _ = tx.send(kill);
        }
        count
    }

    /// Broadcast a server-originated text frame to every connection of `session`.
    pub fn publish(&self, session: &SessionId, text: impl Into<String>) {
        if let Ok(guard) = self.inner.lock() {
            if let Some(room) = guard.rooms.get(session) {
                let _ = room.broadcast_tx.send(text.into());
            }
        }
    }

    fn record(&self, event: HubEvent) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.log.push(event);
        }
    }

    fn detach(&self, session: &SessionId, conn_id: u64) {
        if let Ok(mut guard) = self.inner.lock() {
            if let Some(room) = guard.rooms.get_mut(session) {
                room.kill_switches.remove(&conn_id);
            }
        }
    }
}

impl Connector for MemoryHub {
    async fn connect(&self, session: &SessionId) -> Result<Link, TransportError> {
        let (kill_tx, kill_rx) = oneshot::channel();
        let (conn_id, room_tx, room_rx) = {
            let mut guard = self.inner.lock().map_err(|_| TransportError::Closed)?;
            if guard.refuse {
                return Err(TransportError::Connect {
                    url: format!("mem://{session}"),
                    detail: "connection refused".into(),
                });
            }
            guard.next_conn += 1;
            let conn_id = guard.next_conn;
            let room = guard.rooms.entry(session.clone()).or_insert_with(|| Room {
                broadcast_tx: broadcast::channel(ROOM_CHANNEL_CAP).0,
                kill_switches: HashMap::new(),
            });
            room.kill_switches.insert(conn_id, kill_tx);
            let room_tx = room.broadcast_tx.clone();
            let room_rx = room.broadcast_tx.subscribe();
            guard.log.push(HubEvent::Connected(session.clone()));
            (conn_id, room_tx, room_rx)
        };

        let (client, server) = Link::pair();
        tokio::spawn(serve_connection(
            self.clone(),
            session.clone(),
            conn_id,
            server,
            room_tx,
            room_rx,
            kill_rx,
        ));
        Ok(client)
    }
}

async fn serve_connection(
    hub: MemoryHub,
    session: SessionId,
    conn_id: u64,
    mut end: Link,
    room_tx: broadcast::Sender<String>,
    mut room_rx: broadcast::Receiver<String>,
    mut kill: oneshot::Receiver<Kill>,
) {
    let outcome = loop {
        tokio::select! {
            frame = end.inbound.recv() => match frame {
                Some(Frame::Text(text)) => {
                    let _ = room_tx.send(text);
                }
                Some(Frame::Close(code)) => break HubEvent::Disconnected(session.clone(), code),
                None => break HubEvent::Disconnected(session.clone(), CloseCode::ABNORMAL),
            },
            msg = room_rx.recv() => match msg {
                Ok(text) => {
                    if end.outbound.send(Frame::Text(text)).is_err() {
                        break HubEvent::Disconnected(session.clone(), CloseCode::ABNORMAL);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(session = %session, conn_id, skipped, "hub connection lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    break HubEvent::Dropped(session.clone());
                }
            },
            signal = &mut kill => match signal {
                Ok(Some(code)) => {
                    let _ = end.outbound.send(Frame::Close(code));
                    break HubEvent::ServerClosed(session.clone(), code);
                }
                Ok(None) | Err(_) => break HubEvent::Dropped(session.clone()),
            },
        }
    };
    hub.detach(&session, conn_id);
    hub.record(outcome);
    // `end` drops here; the client sees its inbound stream end.
}

//! WebSocket connector: bridges a `tokio-tungstenite` stream onto a [`Link`].

use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};

use super::{Connector, Link, CLOSE_GRACE};
use crate::error::TransportError;
use crate::protocol::{CloseCode, Frame};
use crate::session::SessionId;

/// Connects to `{base_url}/{session_id}`.
#[derive(Debug, Clone)]
pub struct WsConnector {
    base_url: String,
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(base_url: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            connect_timeout,
        }
    }

    pub fn session_url(&self, session: &SessionId) -> String {
        format!("{}/{}", self.base_url, session)
    }
}

impl Connector for WsConnector {
    async fn connect(&self, session: &SessionId) -> Result<Link, TransportError> {
        let url = self.session_url(session);
        let (ws, _response) = tokio::time::timeout(
            self.connect_timeout,
            tokio_tungstenite::connect_async(url.as_str()),
        )
        .await
        .map_err(|_| TransportError::Timeout(self.connect_timeout))?
        .map_err(|e| TransportError::Connect {
            url: url.clone(),
            detail: e.to_string(),
        })?;

        let (client, bridge_end) = Link::pair();
        tokio::spawn(bridge(ws, bridge_end, url));
        Ok(client)
    }
}

fn close_message(code: CloseCode) -> WsMessage {
    WsMessage::Close(Some(CloseFrame {
        code: WsCloseCode::from(code.0),
        reason: "".into(),
    }))
}

/// Shuttle frames between the socket and the link until either side ends.
///
/// Dropping `end` without forwarding a close frame is how an abnormal
/// disconnect is reported upstream.
async fn bridge<S>(ws: tokio_tungstenite::WebSocketStream<S>, mut end: Link, url: String)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            frame = end.inbound.recv() => match frame {
                Some(Frame::Text(text)) => {
                    if let Err(e) = sink.send(WsMessage::Text(text)).await {
                        warn!(%url, error = %e, "websocket send failed");
                        break;
                    }
                }
                Some(Frame::Close(code)) => {
                    let _ = sink.send(close_message(code)).await;
                    // Wait, bounded, for the server's close reply.
                    let _ = tokio::time::timeout(CLOSE_GRACE, async {
                        while let Some(Ok(msg)) = stream.next().await {
                            if msg.is_close() {
                                break;
                            }
                        }
                    })
                    .await;
                    debug!(%url, %code, "websocket closed locally");
                    break;
                }
                None => {
                    let _ = sink.send(close_message(CloseCode::NORMAL)).await;
                    break;
                }
            },
            msg = stream.next() => match msg {
                Some(Ok(WsMessage::Text(text))) => {
                    if end.outbound.send(Frame::Text(text)).is_err() {
                        break;
                    }
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    let code = frame
                        .map(|f| CloseCode(u16::from(f.code)))
                        .unwrap_or(CloseCode::NO_STATUS);
                    debug!(%url, %code, "websocket closed by server");
                    let _ = end.outbound.send(Frame::Close(code));
                    // Flush the queued close reply to finish the handshake.
                    let _ = tokio::time::timeout(CLOSE_GRACE, sink.close()).await;
                    break;
                }
                // Binary / ping / pong frames carry nothing for us.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(%url, error = %e, "websocket read failed");
                    break;
                }
                None => break,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn id(raw: &str) -> SessionId {
        SessionId::parse(raw).unwrap()
    }

    #[test]
    fn test_session_url_joins_base_and_id() {
        let c = WsConnector::new("ws://localhost:5000/ws/", Duration::from_secs(1));
        assert_eq!(c.session_url(&id("AB12CD")), "ws://localhost:5000/ws/AB12CD");
    }

    #[test]
    fn test_close_message_carries_code() {
        match close_message(CloseCode::NORMAL) {
            WsMessage::Close(Some(frame)) => assert_eq!(u16::from(frame.code), 1000),
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_refused_connection_is_connect_error() {
        let addr = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let c = WsConnector::new(format!("ws://{addr}/ws"), Duration::from_secs(2));
        let err = c.connect(&id("AB12CD")).await.unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn test_text_round_trip_and_server_close_code() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let msg = ws.next().await.unwrap().unwrap();
            // Echo, then hang up with a non-normal code.
            ws.send(msg).await.unwrap();
            ws.send(close_message(CloseCode(4001))).await.unwrap();
            ws.next().await
        });

        let c = WsConnector::new(format!("ws://{addr}/ws"), Duration::from_secs(2));
        let mut link = c.connect(&id("AB12CD")).await.unwrap();
        link.outbound.send(Frame::Text("ping".into())).unwrap();

        assert_eq!(link.inbound.recv().await, Some(Frame::Text("ping".into())));
        assert_eq!(link.inbound.recv().await, Some(Frame::Close(CloseCode(4001))));

        // The client answers the server's close frame before hanging up.
        let reply = server.await.unwrap();
        assert!(matches!(reply, Some(Ok(WsMessage::Close(_)))), "{reply:?}");
    }
}

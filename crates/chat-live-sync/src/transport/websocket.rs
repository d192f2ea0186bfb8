use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{COOKIE, ORIGIN};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

use super::{RealtimeConnector, SocketLink};
use crate::config::{RoomEndpoints, SyncConfig};
use crate::error::{SyncError, SyncResult};

/// Opens the room socket at `ws(s)://<host>/ws/chat/<room>/`.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    endpoints: RoomEndpoints,
    session_cookie: Option<String>,
}

impl WebSocketConnector {
    pub fn new(config: &SyncConfig) -> SyncResult<Self> {
        Ok(Self {
            endpoints: config.endpoints()?,
            session_cookie: config.session_cookie.clone(),
        })
    }
}

#[async_trait]
impl RealtimeConnector for WebSocketConnector {
    async fn connect(&self) -> SyncResult<SocketLink> {
        let url = self.endpoints.socket()?;
        let mut request = url.as_str().into_client_request()?;
        let headers = request.headers_mut();
        // The server authenticates the handshake from the session cookie and
        // checks the origin.
        if let Some(cookie) = &self.session_cookie {
            let value =
                HeaderValue::from_str(cookie).map_err(|_| SyncError::InvalidHeader("Cookie"))?;
            headers.insert(COOKIE, value);
        }
        let origin = HeaderValue::from_str(&self.endpoints.origin())
            .map_err(|_| SyncError::InvalidHeader("Origin"))?;
        headers.insert(ORIGIN, origin);

        let (ws_stream, _) = connect_async(request).await?;
        debug!(
            target: "chat.socket",
            room = self.endpoints.room_id(),
            url = %url,
            "socket connected"
        );

        let (tx_out, rx_out) = mpsc::unbounded_channel::<String>();
        let (tx_in, rx_in) = mpsc::unbounded_channel::<String>();
        let task = tokio::spawn(pump(ws_stream, rx_out, tx_in));
        Ok(SocketLink::new(tx_out, rx_in).with_task(task))
    }
}

/// Moves frames between the socket and the link channels until either side
/// goes away. Dropping `tx_in` is how the link learns the socket closed.
async fn pump(
    ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut rx_out: mpsc::UnboundedReceiver<String>,
    tx_in: mpsc::UnboundedSender<String>,
) {
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    loop {
        tokio::select! {
            outgoing = rx_out.recv() => {
                let Some(text) = outgoing else {
                    let _ = ws_sender.send(WsMessage::Close(None)).await;
                    break;
                };
                if let Err(err) = ws_sender.send(WsMessage::Text(text)).await {
                    debug!(target: "chat.socket", error = %err, "socket write failed");
                    break;
                }
            }
            incoming = ws_receiver.next() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        if tx_in.send(text).is_err() {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Binary(data))) => match String::from_utf8(data) {
                        Ok(text) => {
                            if tx_in.send(text).is_err() {
                                break;
                            }
                        }
                        Err(_) => trace!(target: "chat.socket", "ignoring non-utf8 binary frame"),
                    },
                    Some(Ok(WsMessage::Close(frame))) => {
                        debug!(target: "chat.socket", ?frame, "socket closed by server");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        debug!(target: "chat.socket", error = %err, "socket read failed");
                        break;
                    }
                    None => break,
                }
            }
        }
    }
}

//! The WebSocket session (§4.5): completes the server-side RFC 6455
//! handshake by hand (so tungstenite never has to re-parse the HTTP request
//! the HTTP session already consumed), then drives one `tokio::select!`
//! strand per connection — a send queue, the registry's broadcast channel,
//! and the frame read loop all share one writer so at most one write is ever
//! in flight, mirroring the single `write_active` flag described for the
//! HTTP session's own send queue.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::protocol::{Message, Role};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, warn};

use crate::error::WsError;
use crate::registry::{Registry, SessionId, WsBroadcast, WsKind};
use crate::request::Request;
use crate::ws::handshake::sec_websocket_accept;

/// Kind of a WebSocket payload, mirroring `registry::WsKind` at the session
/// API boundary so callers outside this crate never need to import the
/// registry's internal broadcast type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsMessageKind {
    Text,
    Binary,
}

impl From<WsMessageKind> for WsKind {
    fn from(kind: WsMessageKind) -> Self {
        match kind {
            WsMessageKind::Text => WsKind::Text,
            WsMessageKind::Binary => WsKind::Binary,
        }
    }
}

/// Result handed to a `send()` completion callback: byte count on success.
pub type SendResult = Result<usize, WsError>;

struct Outbound {
    payload: Vec<u8>,
    kind: WsMessageKind,
    completion: Option<oneshot::Sender<SendResult>>,
}

/// A cheap, cloneable handle for submitting frames into one session's send
/// queue — handed to `on_open`/`on_msg` and usable from any task.
#[derive(Clone)]
pub struct WsHandle {
    id: SessionId,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl WsHandle {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Enqueues `payload` for transmission. `completion`, if given, fires
    /// exactly once: with the byte count on success, or the write error.
    /// Submission order into this queue is preserved on the wire
    /// (Invariant 7); the queue never reorders around a slow send.
    pub fn send(
        &self,
        payload: Vec<u8>,
        kind: WsMessageKind,
        completion: Option<oneshot::Sender<SendResult>>,
    ) {
        let outbound = Outbound {
            payload,
            kind,
            completion,
        };
        if let Err(mpsc::error::SendError(outbound)) = self.tx.send(outbound) {
            if let Some(completion) = outbound.completion {
                let _ = completion.send(Err(WsError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotConnected,
                    "session writer has already stopped",
                ))));
            }
        }
    }
}

/// Callbacks a `Server` wires up for every WebSocket session (§6).
pub struct WsCallbacks {
    pub on_open: Arc<dyn Fn(WsHandle, bool) + Send + Sync>,
    pub on_msg: Arc<dyn Fn(WsHandle, Vec<u8>, WsMessageKind) + Send + Sync>,
    pub on_close: Arc<dyn Fn(SessionId) + Send + Sync>,
}

/// Completes the server-side handshake: computes `Sec-WebSocket-Accept` from
/// the already-parsed upgrade request, writes the 101 response by hand, then
/// wraps `stream` directly with tungstenite via `from_raw_socket` — it never
/// sees (and so never re-parses) the original HTTP request line.
pub async fn upgrade<S>(mut stream: S, request: &Request) -> Result<WebSocketStream<S>, WsError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let key = request
        .header("sec-websocket-key")
        .ok_or(WsError::MissingKey)?;
    let accept = sec_websocket_accept(key);

    let response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Connection: Upgrade\r\n\
         Upgrade: websocket\r\n\
         Sec-WebSocket-Accept: {accept}\r\n\
         Server: netrt\r\n\
         \r\n"
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await?;

    Ok(WebSocketStream::from_raw_socket(stream, Role::Server, None).await)
}

/// Drives one upgraded connection until the peer closes it, the session is
/// asked to shut down, or a protocol error occurs. Registers with `registry`
/// for the duration so `Registry::broadcast` and server-wide shutdown can
/// both reach it.
pub async fn run<S>(stream: WebSocketStream<S>, is_tls: bool, registry: Registry, callbacks: Arc<WsCallbacks>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (id, mut control_rx, mut broadcast_rx, _guard) = registry.register_ws();
    let (tx, mut outbound_rx) = mpsc::unbounded_channel::<Outbound>();
    let handle = WsHandle { id, tx };

    (callbacks.on_open)(handle.clone(), is_tls);

    let (mut sink, mut source) = stream.split();

    loop {
        tokio::select! {
            biased;

            _ = control_rx.recv() => {
                debug!(?id, "ws session received shutdown");
                break;
            }

            outbound = outbound_rx.recv() => {
                let Some(frame) = outbound else {
                    // Every WsHandle has been dropped; nothing can be sent,
                    // but the connection is still readable until the peer
                    // closes it or it's told to shut down.
                    continue;
                };
                let len = frame.payload.len();
                let message = to_tungstenite_message(frame.payload, frame.kind);
                let result = sink
                    .send(message)
                    .await
                    .map(|_| len)
                    .map_err(WsError::from);
                let failed = result.is_err();
                if let Some(completion) = frame.completion {
                    let _ = completion.send(result);
                }
                if failed {
                    break;
                }
            }

            broadcast = broadcast_rx.recv() => {
                let Some(WsBroadcast { payload, kind }) = broadcast else {
                    continue;
                };
                let message = to_tungstenite_message((*payload).clone(), match kind {
                    WsKind::Text => WsMessageKind::Text,
                    WsKind::Binary => WsMessageKind::Binary,
                });
                if sink.send(message).await.is_err() {
                    break;
                }
            }

            incoming = source.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        (callbacks.on_msg)(handle.clone(), text.as_bytes().to_vec(), WsMessageKind::Text);
                    }
                    Some(Ok(Message::Binary(data))) => {
                        (callbacks.on_msg)(handle.clone(), data.to_vec(), WsMessageKind::Binary);
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {
                        // Ping/Pong/raw Frame: tungstenite answers pings itself.
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "ws read error");
                        break;
                    }
                }
            }
        }
    }

    let _ = sink.close().await;
    (callbacks.on_close)(id);
}

fn to_tungstenite_message(payload: Vec<u8>, kind: WsMessageKind) -> Message {
    match kind {
        WsMessageKind::Text => Message::Text(String::from_utf8_lossy(&payload).into_owned().into()),
        WsMessageKind::Binary => Message::Binary(payload.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt};

    #[tokio::test]
    async fn upgrade_writes_a_valid_101_response() {
        let mut request = Request::new("GET".into(), "/ws".into(), (1, 1));
        request.push_header("Upgrade".into(), "websocket".into());
        request.push_header("Connection".into(), "Upgrade".into());
        request.push_header(
            "Sec-WebSocket-Key".into(),
            "dGhlIHNhbXBsZSBub25jZQ==".into(),
        );

        let (mut client, server) = duplex(4096);
        let upgrade_task = tokio::spawn(async move { upgrade(server, &request).await.map(|_| ()) });

        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = client.read(&mut chunk).await.unwrap();
            buf.extend_from_slice(&chunk[..n]);
            if buf.ends_with(b"\r\n\r\n") {
                break;
            }
        }
        let response = String::from_utf8(buf).unwrap();
        assert!(response.starts_with("HTTP/1.1 101 Switching Protocols"));
        assert!(response.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));

        drop(client);
        let _ = upgrade_task.await;
    }

    #[tokio::test]
    async fn upgrade_without_key_header_fails() {
        let request = Request::new("GET".into(), "/ws".into(), (1, 1));
        let (_client, server) = duplex(1024);
        let result = upgrade(server, &request).await;
        assert!(matches!(result, Err(WsError::MissingKey)));
    }
}

//! WebSocket Secure client (§4.9): resolve → TCP connect → TLS handshake →
//! WS handshake, then a reader loop and a serialized send queue mirroring
//! `ws::session`'s, grounded directly on `wss_client::impl::loop`'s four
//! `yield` stages and its `on_fail`/`on_msg`/`send_next` trio — collapsed
//! from Boost.Asio coroutine resumption into one `tokio::select!` strand.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::WebSocketStream;

use crate::error::WssClientError;
use crate::ws::WsMessageKind;

use super::connect::connect_tls;

pub type SendResult = Result<usize, WssClientError>;

struct Outbound {
    payload: Vec<u8>,
    kind: WsMessageKind,
    completion: Option<oneshot::Sender<SendResult>>,
}

/// A cheap, cloneable handle for submitting frames into the client's send
/// queue (same one-writer-at-a-time contract as `ws::session::WsHandle`).
#[derive(Clone)]
pub struct WssHandle {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl WssHandle {
    pub fn send(&self, payload: Vec<u8>, kind: WsMessageKind, completion: Option<oneshot::Sender<SendResult>>) {
        let outbound = Outbound { payload, kind, completion };
        if let Err(mpsc::error::SendError(outbound)) = self.tx.send(outbound) {
            if let Some(completion) = outbound.completion {
                let _ = completion.send(Err(WssClientError::Protocol(
                    tokio_tungstenite::tungstenite::Error::ConnectionClosed,
                )));
            }
        }
    }
}

/// Connects to `wss://host:port{path}` and spawns the session driver.
/// `on_msg` is invoked for every inbound frame; `on_fail` fires exactly once,
/// and only for a failure in the read loop or an unacknowledged write
/// failure (a write failure with a `completion` channel is reported there
/// instead, per-call, the same split the original's `send_next` glosses
/// over by not checking `ec` at all).
pub async fn connect<FMsg, FFail>(
    host: &str,
    port: u16,
    path: &str,
    deadline: Duration,
    connector: &TlsConnector,
    on_msg: FMsg,
    on_fail: FFail,
) -> Result<WssHandle, WssClientError>
where
    FMsg: Fn(Vec<u8>, WsMessageKind) + Send + Sync + 'static,
    FFail: FnOnce(WssClientError) + Send + 'static,
{
    let tls_stream = connect_tls(host, port, deadline, connector).await?;

    let url = format!("wss://{host}:{port}{path}");
    let request = url
        .into_client_request()
        .map_err(WssClientError::Protocol)?;
    let (ws_stream, _response) = tokio_tungstenite::client_async(request, tls_stream)
        .await
        .map_err(WssClientError::Protocol)?;

    let (tx, rx) = mpsc::unbounded_channel();
    let handle = WssHandle { tx };
    tokio::spawn(run(ws_stream, rx, Arc::new(on_msg), on_fail));
    Ok(handle)
}

async fn run(
    stream: WebSocketStream<TlsStream<TcpStream>>,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    on_msg: Arc<dyn Fn(Vec<u8>, WsMessageKind) + Send + Sync>,
    on_fail: impl FnOnce(WssClientError) + Send + 'static,
) {
    let (mut sink, mut source) = stream.split();
    let mut failure: Option<WssClientError> = None;

    loop {
        tokio::select! {
            biased;

            outbound = outbound_rx.recv() => {
                let Some(frame) = outbound else { continue; };
                let len = frame.payload.len();
                let message = to_message(frame.payload, frame.kind);
                match sink.send(message).await {
                    Ok(()) => {
                        if let Some(completion) = frame.completion {
                            let _ = completion.send(Ok(len));
                        }
                    }
                    Err(e) => {
                        match frame.completion {
                            Some(completion) => {
                                let _ = completion.send(Err(WssClientError::Protocol(e)));
                            }
                            None => failure = Some(WssClientError::Protocol(e)),
                        }
                        break;
                    }
                }
            }

            incoming = source.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => on_msg(text.as_bytes().to_vec(), WsMessageKind::Text),
                    Some(Ok(Message::Binary(data))) => on_msg(data.to_vec(), WsMessageKind::Binary),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        failure = Some(WssClientError::Protocol(e));
                        break;
                    }
                }
            }
        }
    }

    let _ = sink.close().await;
    if let Some(e) = failure {
        on_fail(e);
    }
}

fn to_message(payload: Vec<u8>, kind: WsMessageKind) -> Message {
    match kind {
        WsMessageKind::Text => Message::Text(String::from_utf8_lossy(&payload).into_owned().into()),
        WsMessageKind::Binary => Message::Binary(payload.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_frames_round_trip_through_to_message() {
        let message = to_message(b"hi".to_vec(), WsMessageKind::Text);
        assert!(matches!(message, Message::Text(t) if t == "hi"));
    }

    #[test]
    fn binary_frames_round_trip_through_to_message() {
        let message = to_message(vec![1, 2, 3], WsMessageKind::Binary);
        assert!(matches!(message, Message::Binary(b) if b.as_ref() == [1, 2, 3]));
    }
}

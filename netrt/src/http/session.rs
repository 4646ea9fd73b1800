//! The HTTP session (§4.4): reads pipelined requests, dispatches each to the
//! Router under the configured Executor, and writes responses strictly in
//! request-arrival order regardless of handler completion order.
//!
//! The ordering invariant (§3 Invariant 1, §4.4.3) falls out of the data
//! structure rather than being a rule we have to remember to follow: the
//! write side only ever looks at the *front* of `pending`, and a slot can
//! only leave the front once it has been filled and written. Two
//! concurrently-running concerns — reading the next request, and writing the
//! head of the queue once it's ready — share one `tokio::select!` loop, which
//! is this connection's single strand (§4.1).

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::error::ProtocolError;
use crate::executor::Executor;
use crate::http::parse::{body_framing, parse_head, BodyFraming, ParseOutcome};
use crate::request::Request;
use crate::response::{Body, Response};
use crate::router::Router;
use crate::settings::Settings;

/// A slot in the write queue: empty until the dispatched handler (running
/// under whichever Executor was chosen) fills it in, in any order.
struct PendingSlot {
    value: Mutex<Option<Response>>,
    notify: Notify,
}

impl PendingSlot {
    fn new() -> Arc<Self> {
        Arc::new(PendingSlot {
            value: Mutex::new(None),
            notify: Notify::new(),
        })
    }

    fn fill(&self, response: Response) {
        *self.value.lock().expect("pending slot mutex poisoned") = Some(response);
        self.notify.notify_one();
    }
}

/// What an HTTP session ends up doing with its stream.
pub enum SessionOutcome<S> {
    /// The connection closed normally (or on error) after draining its queue.
    Closed,
    /// The session matched a WebSocket upgrade request; ownership of the
    /// stream, any unconsumed buffered bytes, and the upgrade request are
    /// handed back to the caller to build a WebSocket session from.
    Upgraded {
        stream: S,
        buffered: Vec<u8>,
        request: Request,
    },
}

pub struct HttpSession<S> {
    stream: S,
    buf: Vec<u8>,
    settings: Settings,
    router: Arc<Router>,
    executor: Executor,
    is_tls: bool,
}

impl<S> HttpSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(
        stream: S,
        buffered_prefix: Vec<u8>,
        settings: Settings,
        router: Arc<Router>,
        executor: Executor,
        is_tls: bool,
    ) -> Self {
        HttpSession {
            stream,
            buf: buffered_prefix,
            settings,
            router,
            executor,
            is_tls,
        }
    }

    pub async fn run(mut self) -> SessionOutcome<S> {
        let mut pending: VecDeque<Arc<PendingSlot>> = VecDeque::new();
        let mut reading_done = false;
        let mut close_after_drain = false;

        loop {
            let can_read = !reading_done && pending.len() < self.settings.request_queue_limit;
            let can_write = !pending.is_empty();

            if !can_read && !can_write {
                break;
            }

            tokio::select! {
                biased;

                response = wait_for_head(&pending), if can_write => {
                    // `pending` is only ever popped here, right after the
                    // head's response has actually been written — this is
                    // Invariant 2 (at most one in-flight write) by
                    // construction, since this branch runs to completion
                    // before the loop can reconsider writing again.
                    if let Err(e) = write_response(&mut self.stream, &response).await {
                        warn!(error = %e, "failed writing response");
                        break;
                    }
                    pending.pop_front();
                    if close_after_drain && pending.is_empty() {
                        break;
                    }
                }

                outcome = read_one(&mut self.stream, &mut self.buf, &self.settings), if can_read => {
                    match outcome {
                        Ok(Some(request)) => {
                            if request.is_websocket_upgrade() {
                                reading_done = true;
                                if pending.is_empty() {
                                    return SessionOutcome::Upgraded {
                                        stream: self.stream,
                                        buffered: std::mem::take(&mut self.buf),
                                        request,
                                    };
                                }
                                // Pipelined requests are still in flight ahead of
                                // the upgrade; drain them first, then upgrade.
                                // (Rare in practice — browsers upgrade on a
                                // fresh connection — but correctness shouldn't
                                // depend on that.)
                                close_after_drain = true;
                                continue;
                            }
                            let slot = PendingSlot::new();
                            pending.push_back(slot.clone());
                            dispatch(self.router.clone(), self.executor.clone(), request, self.is_tls, slot);
                        }
                        Ok(None) => {
                            // graceful EOF with nothing pending: nothing left to do
                            reading_done = true;
                            if pending.is_empty() {
                                break;
                            }
                        }
                        Err(e) => {
                            debug!(error = %e, "ending read loop");
                            reading_done = true;
                            if let Some(status) = e.status_code() {
                                let slot = PendingSlot::new();
                                slot.fill(Response::json_error(status, &e.to_string()));
                                pending.push_back(slot);
                            }
                            close_after_drain = true;
                            if pending.is_empty() {
                                break;
                            }
                        }
                    }
                }
            }
        }

        let _ = shutdown_stream(&mut self.stream, self.is_tls).await;
        SessionOutcome::Closed
    }
}

async fn wait_for_head(pending: &VecDeque<Arc<PendingSlot>>) -> Response {
    let slot = pending.front().expect("caller guarantees non-empty queue").clone();
    loop {
        if let Some(response) = slot.value.lock().expect("pending slot mutex poisoned").take() {
            return response;
        }
        slot.notify.notified().await;
    }
}

fn dispatch(
    router: Arc<Router>,
    executor: Executor,
    request: Request,
    is_tls: bool,
    slot: Arc<PendingSlot>,
) {
    tokio::spawn(async move {
        let response = router.dispatch(request, &executor, is_tls).await;
        slot.fill(response);
    });
}

/// Reads one complete request (head + body) from `stream`/`buf`, respecting
/// the configured idle timeout and body limit (§4.4.2).
async fn read_one<S>(
    stream: &mut S,
    buf: &mut Vec<u8>,
    settings: &Settings,
) -> Result<Option<Request>, ProtocolError>
where
    S: AsyncRead + Unpin,
{
    tokio::time::timeout(settings.idle_timeout, read_one_inner(stream, buf, settings))
        .await
        .unwrap_or(Err(ProtocolError::IdleTimeout))
}

async fn read_one_inner<S>(
    stream: &mut S,
    buf: &mut Vec<u8>,
    settings: &Settings,
) -> Result<Option<Request>, ProtocolError>
where
    S: AsyncRead + Unpin,
{
    let (mut request, head_len) = loop {
        match parse_head(buf)? {
            ParseOutcome::Complete { request, consumed } => break (request, consumed),
            ParseOutcome::Incomplete => {
                let had_bytes = !buf.is_empty();
                let n = read_more(stream, buf).await?;
                if n == 0 {
                    if had_bytes {
                        return Err(ProtocolError::Malformed(
                            "connection closed mid-request".into(),
                        ));
                    }
                    return Ok(None);
                }
            }
        }
    };
    buf.drain(..head_len);

    match body_framing(&request)? {
        BodyFraming::ContentLength(len) => {
            if len > settings.request_body_limit {
                return Err(ProtocolError::BodyTooLarge {
                    actual: len,
                    limit: settings.request_body_limit,
                });
            }
            while buf.len() < len {
                if read_more(stream, buf).await? == 0 {
                    return Err(ProtocolError::Eof);
                }
            }
            request.body = buf.drain(..len).collect();
        }
        BodyFraming::Chunked => {
            request.body = read_chunked_body(stream, buf, settings.request_body_limit).await?;
        }
        BodyFraming::None => {}
    }

    Ok(Some(request))
}

async fn read_more<S>(stream: &mut S, buf: &mut Vec<u8>) -> Result<usize, ProtocolError>
where
    S: AsyncRead + Unpin,
{
    let mut chunk = [0u8; 4096];
    let n = stream.read(&mut chunk).await?;
    buf.extend_from_slice(&chunk[..n]);
    Ok(n)
}

async fn read_chunked_body<S>(
    stream: &mut S,
    buf: &mut Vec<u8>,
    limit: usize,
) -> Result<Vec<u8>, ProtocolError>
where
    S: AsyncRead + Unpin,
{
    let mut body = Vec::new();
    loop {
        let size_line_end = loop {
            if let Some(pos) = find_crlf(buf) {
                break pos;
            }
            if read_more(stream, buf).await? == 0 {
                return Err(ProtocolError::Eof);
            }
        };
        let size_line = std::str::from_utf8(&buf[..size_line_end])
            .map_err(|_| ProtocolError::Malformed("non-UTF8 chunk size".into()))?;
        let size_str = size_line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_str, 16)
            .map_err(|_| ProtocolError::Malformed("invalid chunk size".into()))?;
        buf.drain(..size_line_end + 2);

        if size == 0 {
            // Trailing CRLF after the terminating zero-size chunk.
            while find_crlf(buf).is_none() {
                if read_more(stream, buf).await? == 0 {
                    return Err(ProtocolError::Eof);
                }
            }
            if let Some(pos) = find_crlf(buf) {
                buf.drain(..pos + 2);
            }
            break;
        }

        if body.len() + size > limit {
            return Err(ProtocolError::BodyTooLarge {
                actual: body.len() + size,
                limit,
            });
        }

        while buf.len() < size + 2 {
            if read_more(stream, buf).await? == 0 {
                return Err(ProtocolError::Eof);
            }
        }
        body.extend_from_slice(&buf[..size]);
        buf.drain(..size + 2); // chunk data + trailing CRLF
    }
    Ok(body)
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

async fn write_response<S>(stream: &mut S, response: &Response) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let mut head = Vec::new();
    head.extend_from_slice(
        format!(
            "HTTP/1.1 {} {}\r\n",
            response.status,
            Response::reason_phrase(response.status)
        )
        .as_bytes(),
    );

    let body_bytes: &[u8] = match &response.body {
        Body::Text(s) => s.as_bytes(),
        Body::Bytes(b) => b.as_slice(),
        Body::Empty => &[],
        Body::File(_) => &[], // streamed separately below
    };

    let has_content_length = response.header("content-length").is_some();
    if !matches!(response.body, Body::File(_)) && !has_content_length {
        head.extend_from_slice(format!("Content-Length: {}\r\n", body_bytes.len()).as_bytes());
    }
    if response.header("server").is_none() {
        head.extend_from_slice(b"Server: netrt\r\n");
    }
    for (name, value) in response.headers() {
        head.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
    }
    head.extend_from_slice(b"\r\n");

    stream.write_all(&head).await?;
    match &response.body {
        Body::File(file) => {
            let mut file = file.try_clone().await?;
            tokio::io::copy(&mut file, stream).await?;
        }
        _ => stream.write_all(body_bytes).await?,
    }
    stream.flush().await
}

/// Plain session: TCP half-close. TLS session close-notify is layered on by
/// the `tokio_rustls` stream's own `shutdown()` implementation; "stream
/// truncated" and timeout on that call are expected and silenced (§5).
async fn shutdown_stream<S>(stream: &mut S, _is_tls: bool) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    match stream.shutdown().await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotConnected => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Executor;
    use crate::router::Router;
    use std::time::Duration;
    use tokio::io::duplex;

    fn test_settings() -> Settings {
        let mut s = Settings::default();
        s.set_timeout(Duration::from_secs(5));
        s
    }

    #[tokio::test]
    async fn pipelined_responses_preserve_request_order() {
        let mut router = Router::new();
        router.route("*", "/a", |_| {
            Ok(Response::text(200, "text/plain", "a"))
        });
        router.route("*", "/b", |_| {
            Ok(Response::text(200, "text/plain", "b"))
        });
        router.route("*", "/c", |_| {
            Ok(Response::text(200, "text/plain", "c"))
        });

        let (client, server) = duplex(8192);
        let session = HttpSession::new(
            server,
            Vec::new(),
            test_settings(),
            Arc::new(router),
            Executor::Inline,
            false,
        );
        let handle = tokio::spawn(session.run());

        let mut client = client;
        client
            .write_all(b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\nGET /c HTTP/1.1\r\n\r\n")
            .await
            .unwrap();

        let mut out = Vec::new();
        let mut chunk = [0u8; 4096];
        // Read three responses worth of bytes.
        while out.matches("HTTP/1.1").count() < 3 {
            let n = client.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            out.push_str(std::str::from_utf8(&chunk[..n]).unwrap());
        }
        drop(client);
        let _ = handle.await;

        let pos_a = out.find("\r\n\r\na").unwrap();
        let pos_b = out.find("\r\n\r\nb").unwrap();
        let pos_c = out.find("\r\n\r\nc").unwrap();
        assert!(pos_a < pos_b && pos_b < pos_c, "responses out of order: {out}");
    }

    /// As above, but with `Executor::Pool` and handlers that finish in the
    /// reverse of their submission order (`/a` sleeps longest, `/c`
    /// shortest) — the scenario from spec §8's E1. `Inline` above can't tell
    /// a working `PendingSlot` queue from a deleted one, since every handler
    /// there completes before the next one is even dispatched; this one
    /// actually requires the write side to hold `/b` and `/c`'s responses
    /// back until `/a`'s is written.
    #[tokio::test]
    async fn pipelined_responses_preserve_order_under_out_of_order_completion() {
        let mut router = Router::new();
        router.route("*", "/a", |_| {
            std::thread::sleep(Duration::from_millis(150));
            Ok(Response::text(200, "text/plain", "a"))
        });
        router.route("*", "/b", |_| {
            std::thread::sleep(Duration::from_millis(75));
            Ok(Response::text(200, "text/plain", "b"))
        });
        router.route("*", "/c", |_| {
            Ok(Response::text(200, "text/plain", "c"))
        });

        let (client, server) = duplex(8192);
        let session = HttpSession::new(
            server,
            Vec::new(),
            test_settings(),
            Arc::new(router),
            Executor::Pool,
            false,
        );
        let handle = tokio::spawn(session.run());

        let mut client = client;
        client
            .write_all(b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\nGET /c HTTP/1.1\r\n\r\n")
            .await
            .unwrap();

        let mut out = Vec::new();
        let mut chunk = [0u8; 4096];
        while out.matches("HTTP/1.1").count() < 3 {
            let n = client.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            out.push_str(std::str::from_utf8(&chunk[..n]).unwrap());
        }
        drop(client);
        let _ = handle.await;

        let pos_a = out.find("\r\n\r\na").unwrap();
        let pos_b = out.find("\r\n\r\nb").unwrap();
        let pos_c = out.find("\r\n\r\nc").unwrap();
        assert!(
            pos_a < pos_b && pos_b < pos_c,
            "responses out of order despite /c finishing first: {out}"
        );
    }

    #[tokio::test]
    async fn oversized_body_gets_413_without_dispatch() {
        let mut router = Router::new();
        let dispatched = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = dispatched.clone();
        router.route("*", "/", move |_| {
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok(Response::empty(200))
        });

        let mut settings = test_settings();
        settings.set_request_body_limit(4);

        let (mut client, server) = duplex(8192);
        let session = HttpSession::new(
            server,
            Vec::new(),
            settings,
            Arc::new(router),
            Executor::Inline,
            false,
        );
        let handle = tokio::spawn(session.run());

        client
            .write_all(b"POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\n0123456789")
            .await
            .unwrap();

        let mut out = Vec::new();
        let mut chunk = [0u8; 4096];
        let n = client.read(&mut chunk).await.unwrap();
        out.extend_from_slice(&chunk[..n]);
        let response = String::from_utf8_lossy(&out);
        assert!(response.starts_with("HTTP/1.1 413"), "{response}");

        drop(client);
        let _ = handle.await;
        assert!(!dispatched.load(std::sync::atomic::Ordering::SeqCst));
    }
}

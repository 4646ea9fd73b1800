//! The hand-rolled wire-level HTTP(S) client (§4.9): serializes one request,
//! reads the response head with `httparse::Response` (the same parser the
//! server side uses for requests), then frames the body by the same
//! `Content-Length`/chunked/EOF rule as `http::session`, just read in the
//! opposite direction.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
#[cfg(feature = "tls")]
use tokio_rustls::TlsConnector;

use crate::error::HttpClientError;
use crate::router::content_encoding;

use super::connect::connect_tcp;
#[cfg(feature = "tls")]
use super::connect::connect_tls;

/// A fully-formed outgoing request; the caller builds the target and any
/// extra headers, this module adds `Host` and (when needed) `Content-Length`.
pub struct HttpRequest {
    pub method: String,
    pub target: String,
    pub host: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn new(method: impl Into<String>, target: impl Into<String>, host: impl Into<String>) -> Self {
        HttpRequest {
            method: method.into(),
            target: target.into(),
            host: host.into(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }
}

/// A response with lower-cased header names and a fully-buffered, already
/// decompressed body.
pub struct HttpResponse {
    pub status: u16,
    headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Sends `req` to `host:port`, over TLS when `tls` is given, the whole
/// exchange bounded by `deadline`.
#[cfg(feature = "tls")]
pub async fn request(
    host: &str,
    port: u16,
    deadline: Duration,
    tls: Option<&TlsConnector>,
    req: HttpRequest,
) -> Result<HttpResponse, HttpClientError> {
    match tls {
        Some(connector) => {
            let stream = connect_tls(host, port, deadline, connector).await?;
            exchange(stream, req).await
        }
        None => {
            let stream = connect_tcp(host, port, deadline).await?;
            exchange(stream, req).await
        }
    }
}

/// Plain-HTTP-only `request`, built without the `tls` feature.
#[cfg(not(feature = "tls"))]
pub async fn request(
    host: &str,
    port: u16,
    deadline: Duration,
    req: HttpRequest,
) -> Result<HttpResponse, HttpClientError> {
    let stream = connect_tcp(host, port, deadline).await?;
    exchange(stream, req).await
}

async fn exchange<S>(mut stream: S, req: HttpRequest) -> Result<HttpResponse, HttpClientError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    write_request(&mut stream, &req).await?;
    read_response(&mut stream).await
}

async fn write_request<S: AsyncWrite + Unpin>(stream: &mut S, req: &HttpRequest) -> Result<(), HttpClientError> {
    let mut head = format!("{} {} HTTP/1.1\r\nHost: {}\r\n", req.method, req.target, req.host).into_bytes();
    for (name, value) in &req.headers {
        head.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
    }
    let needs_content_length =
        !req.body.is_empty() && !req.headers.iter().any(|(k, _)| k.eq_ignore_ascii_case("content-length"));
    if needs_content_length {
        head.extend_from_slice(format!("Content-Length: {}\r\n", req.body.len()).as_bytes());
    }
    head.extend_from_slice(b"\r\n");

    stream.write_all(&head).await?;
    stream.write_all(&req.body).await?;
    stream.flush().await?;
    Ok(())
}

async fn read_response<S: AsyncRead + Unpin>(stream: &mut S) -> Result<HttpResponse, HttpClientError> {
    let mut buf = Vec::new();
    let (status, headers, head_len) = read_head(stream, &mut buf).await?;
    buf.drain(..head_len);

    let content_length = headers
        .iter()
        .find(|(k, _)| k == "content-length")
        .and_then(|(_, v)| v.parse::<usize>().ok());
    let chunked = headers
        .iter()
        .any(|(k, v)| k == "transfer-encoding" && v.to_ascii_lowercase().contains("chunked"));

    let mut body = if let Some(len) = content_length {
        while buf.len() < len {
            if read_more(stream, &mut buf).await? == 0 {
                return Err(HttpClientError::Malformed(
                    "connection closed before the full body arrived".into(),
                ));
            }
        }
        buf.drain(..len).collect()
    } else if chunked {
        read_chunked(stream, &mut buf).await?
    } else {
        while read_more(stream, &mut buf).await? != 0 {}
        std::mem::take(&mut buf)
    };

    if headers
        .iter()
        .any(|(k, v)| k == "content-encoding" && v.eq_ignore_ascii_case("gzip"))
    {
        body = content_encoding::gunzip(&body)?;
    }

    Ok(HttpResponse { status, headers, body })
}

/// Reads (and buffers any body bytes read past) the status line + headers.
/// Returns the status code, lower-cased headers (`Set-Cookie` collapsed to
/// `name=value` pairs joined with `, ` across occurrences per §4.9), and how
/// many bytes of `buf` belonged to the head.
async fn read_head<S: AsyncRead + Unpin>(
    stream: &mut S,
    buf: &mut Vec<u8>,
) -> Result<(u16, Vec<(String, String)>, usize), HttpClientError> {
    loop {
        let mut header_storage = [httparse::EMPTY_HEADER; 64];
        let mut response = httparse::Response::new(&mut header_storage);
        match response.parse(buf) {
            Ok(httparse::Status::Complete(consumed)) => {
                let status = response
                    .code
                    .ok_or_else(|| HttpClientError::Malformed("response has no status code".into()))?;

                let mut headers = Vec::new();
                let mut cookies = Vec::new();
                for h in response.headers.iter() {
                    let name = h.name.to_ascii_lowercase();
                    let value = std::str::from_utf8(h.value)
                        .map_err(|_| HttpClientError::Malformed("non-UTF8 header value".into()))?
                        .to_string();
                    if name == "set-cookie" {
                        cookies.push(value.split(';').next().unwrap_or("").to_string());
                    } else {
                        headers.push((name, value));
                    }
                }
                if !cookies.is_empty() {
                    headers.push(("set-cookie".to_string(), cookies.join(", ")));
                }
                return Ok((status, headers, consumed));
            }
            Ok(httparse::Status::Partial) => {
                if read_more(stream, buf).await? == 0 {
                    return Err(HttpClientError::Malformed(
                        "connection closed before the response head completed".into(),
                    ));
                }
            }
            Err(e) => return Err(HttpClientError::Malformed(e.to_string())),
        }
    }
}

async fn read_chunked<S: AsyncRead + Unpin>(stream: &mut S, buf: &mut Vec<u8>) -> Result<Vec<u8>, HttpClientError> {
    let mut body = Vec::new();
    loop {
        let line_end = loop {
            if let Some(pos) = find_crlf(buf) {
                break pos;
            }
            if read_more(stream, buf).await? == 0 {
                return Err(HttpClientError::Malformed("connection closed mid chunk size".into()));
            }
        };
        let size_line = buf.drain(..line_end + 2).collect::<Vec<u8>>();
        let size_str = std::str::from_utf8(&size_line[..line_end])
            .map_err(|_| HttpClientError::Malformed("non-UTF8 chunk size".into()))?
            .trim();
        let size_str = size_str.split(';').next().unwrap_or(size_str);
        let size = usize::from_str_radix(size_str, 16)
            .map_err(|_| HttpClientError::Malformed(format!("invalid chunk size {size_str:?}")))?;

        if size == 0 {
            while find_crlf(buf).is_none() {
                if read_more(stream, buf).await? == 0 {
                    break;
                }
            }
            if let Some(pos) = find_crlf(buf) {
                buf.drain(..pos + 2);
            }
            return Ok(body);
        }

        while buf.len() < size + 2 {
            if read_more(stream, buf).await? == 0 {
                return Err(HttpClientError::Malformed("connection closed mid chunk body".into()));
            }
        }
        body.extend(buf.drain(..size));
        buf.drain(..2); // trailing CRLF after the chunk data
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

async fn read_more<S: AsyncRead + Unpin>(stream: &mut S, buf: &mut Vec<u8>) -> Result<usize, std::io::Error> {
    let mut chunk = [0u8; 4096];
    let n = stream.read(&mut chunk).await?;
    buf.extend_from_slice(&chunk[..n]);
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn round_trips_a_content_length_framed_response() {
        let (mut client, server) = duplex(4096);
        let req = HttpRequest::new("GET", "/", "example.test");
        let exchange_task = tokio::spawn(async move { exchange(server, req).await });

        let mut sent = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = client.read(&mut chunk).await.unwrap();
            sent.extend_from_slice(&chunk[..n]);
            if sent.ends_with(b"\r\n\r\n") {
                break;
            }
        }
        let head = String::from_utf8(sent).unwrap();
        assert!(head.starts_with("GET / HTTP/1.1\r\n"));
        assert!(head.contains("Host: example.test\r\n"));

        client
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello")
            .await
            .unwrap();
        drop(client);

        let response = exchange_task.await.unwrap().unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"hello");
    }

    #[tokio::test]
    async fn decodes_chunked_transfer_encoding() {
        let (mut client, server) = duplex(4096);
        let req = HttpRequest::new("GET", "/", "example.test");
        let exchange_task = tokio::spawn(async move { exchange(server, req).await });

        let mut sent = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = client.read(&mut chunk).await.unwrap();
            sent.extend_from_slice(&chunk[..n]);
            if sent.ends_with(b"\r\n\r\n") {
                break;
            }
        }

        client
            .write_all(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n")
            .await
            .unwrap();
        drop(client);

        let response = exchange_task.await.unwrap().unwrap();
        assert_eq!(response.body, b"hello");
    }

    #[tokio::test]
    async fn collapses_multiple_set_cookie_headers() {
        let (mut client, server) = duplex(4096);
        let req = HttpRequest::new("GET", "/", "example.test");
        let exchange_task = tokio::spawn(async move { exchange(server, req).await });

        let mut sent = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = client.read(&mut chunk).await.unwrap();
            sent.extend_from_slice(&chunk[..n]);
            if sent.ends_with(b"\r\n\r\n") {
                break;
            }
        }

        client
            .write_all(
                b"HTTP/1.1 200 OK\r\nSet-Cookie: a=1; Path=/\r\nSet-Cookie: b=2; Secure\r\nContent-Length: 0\r\n\r\n",
            )
            .await
            .unwrap();
        drop(client);

        let response = exchange_task.await.unwrap().unwrap();
        assert_eq!(response.header("set-cookie"), Some("a=1, b=2"));
    }
}

//! Thin wrapper around `httparse` that turns a byte buffer into a `Request`
//! head plus how many bytes of the buffer it consumed. Kept deliberately
//! separate from response writing/ordering (`session.rs`) so that this file
//! only ever needs to reason about one request at a time.

use crate::error::ProtocolError;
use crate::request::Request;

const MAX_HEADERS: usize = 64;

pub enum ParseOutcome {
    /// Not enough bytes buffered yet to complete the request head.
    Incomplete,
    /// A complete head was parsed; `consumed` bytes of `buf` were the head.
    Complete { request: Request, consumed: usize },
}

/// Parses the request line and headers from the front of `buf`. Never
/// touches the body — callers read `Content-Length`/`Transfer-Encoding` off
/// the returned `Request` to decide how many further bytes to read.
pub fn parse_head(buf: &[u8]) -> Result<ParseOutcome, ProtocolError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Request::new(&mut headers);

    match parsed.parse(buf) {
        Ok(httparse::Status::Partial) => Ok(ParseOutcome::Incomplete),
        Ok(httparse::Status::Complete(consumed)) => {
            let method = parsed
                .method
                .ok_or_else(|| ProtocolError::Malformed("missing method".into()))?
                .to_string();
            let target = parsed
                .path
                .ok_or_else(|| ProtocolError::Malformed("missing target".into()))?
                .to_string();
            let version = match parsed.version {
                Some(1) => (1, 1),
                Some(0) => (1, 0),
                _ => return Err(ProtocolError::Malformed("unsupported HTTP version".into())),
            };

            let mut request = Request::new(method, target, version);
            for header in parsed.headers.iter() {
                let value = std::str::from_utf8(header.value)
                    .map_err(|_| ProtocolError::Malformed("non-UTF8 header value".into()))?
                    .to_string();
                request.push_header(header.name.to_string(), value);
            }
            Ok(ParseOutcome::Complete { request, consumed })
        }
        Err(e) => Err(ProtocolError::Malformed(e.to_string())),
    }
}

/// Determines how the body should be read, per §4.9's client-side rule
/// applied equally to the server's request bodies.
pub enum BodyFraming {
    ContentLength(usize),
    Chunked,
    None,
}

pub fn body_framing(request: &Request) -> Result<BodyFraming, ProtocolError> {
    if let Some(len) = request.header("content-length") {
        let len: usize = len
            .trim()
            .parse()
            .map_err(|_| ProtocolError::Malformed("invalid Content-Length".into()))?;
        return Ok(BodyFraming::ContentLength(len));
    }
    if let Some(te) = request.header("transfer-encoding") {
        if te.to_ascii_lowercase().contains("chunked") {
            return Ok(BodyFraming::Chunked);
        }
    }
    Ok(BodyFraming::None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_simple_get() {
        let buf = b"GET /hello HTTP/1.1\r\nHost: example.com\r\n\r\n";
        match parse_head(buf).unwrap() {
            ParseOutcome::Complete { request, consumed } => {
                assert_eq!(request.method, "GET");
                assert_eq!(request.target, "/hello");
                assert_eq!(request.header("host"), Some("example.com"));
                assert_eq!(consumed, buf.len());
            }
            ParseOutcome::Incomplete => panic!("expected a complete parse"),
        }
    }

    #[test]
    fn reports_incomplete_on_partial_head() {
        let buf = b"GET /hello HTTP/1.1\r\nHost: exa";
        assert!(matches!(
            parse_head(buf).unwrap(),
            ParseOutcome::Incomplete
        ));
    }

    #[test]
    fn content_length_framing() {
        let buf = b"POST /x HTTP/1.1\r\nContent-Length: 5\r\n\r\n";
        let ParseOutcome::Complete { request, .. } = parse_head(buf).unwrap() else {
            panic!("expected complete parse");
        };
        assert!(matches!(
            body_framing(&request).unwrap(),
            BodyFraming::ContentLength(5)
        ));
    }
}

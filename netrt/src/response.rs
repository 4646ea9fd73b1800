//! The response variant type (§9: "Variant response type ... kept as a Rust
//! enum"). The HTTP session's write path matches on `Body` directly; header
//! injection goes through `headers_mut()` so callers don't need to match on
//! the variant themselves.

use tokio::fs::File;

#[derive(Debug)]
pub enum Body {
    Text(String),
    Bytes(Vec<u8>),
    File(File),
    Empty,
}

#[derive(Debug)]
pub struct Response {
    pub status: u16,
    headers: Vec<(String, String)>,
    pub body: Body,
}

impl Response {
    pub fn new(status: u16, body: Body) -> Self {
        Response {
            status,
            headers: Vec::new(),
            body,
        }
    }

    pub fn text(status: u16, content_type: &str, body: impl Into<String>) -> Self {
        let mut resp = Response::new(status, Body::Text(body.into()));
        resp.set_header("Content-Type", content_type);
        resp
    }

    pub fn json_error(status: u16, message: &str) -> Self {
        let escaped = message.replace('\\', "\\\\").replace('"', "\\\"");
        Response::text(
            status,
            "application/json",
            format!("{{\"error\":\"{escaped}\"}}"),
        )
    }

    pub fn empty(status: u16) -> Self {
        Response::new(status, Body::Empty)
    }

    pub fn not_found() -> Self {
        Response::json_error(404, "not found")
    }

    pub fn bad_request(message: &str) -> Self {
        Response::json_error(400, message)
    }

    pub fn server_error(message: &str) -> Self {
        Response::json_error(500, message)
    }

    pub fn redirect(status: u16, location: &str) -> Self {
        let mut resp = Response::empty(status);
        resp.set_header("Location", location);
        resp
    }

    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Sets a header, replacing any existing value with the same name.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        let value = value.into();
        if let Some(existing) = self
            .headers
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
        {
            existing.1 = value;
        } else {
            self.headers.push((name.to_string(), value));
        }
        self
    }

    pub fn headers_mut(&mut self) -> &mut Vec<(String, String)> {
        &mut self.headers
    }

    pub fn reason_phrase(status: u16) -> &'static str {
        match status {
            200 => "OK",
            204 => "No Content",
            301 => "Moved Permanently",
            400 => "Bad Request",
            401 => "Unauthorized",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            408 => "Request Timeout",
            413 => "Payload Too Large",
            429 => "Too Many Requests",
            500 => "Internal Server Error",
            _ => "Unknown",
        }
    }
}

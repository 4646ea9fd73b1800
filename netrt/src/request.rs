//! Wire-level request representation and the router-level wrapper around it.

use std::collections::HashMap;

/// An HTTP request as produced by the parser: method, target, version, a
/// case-insensitive header multimap, and a fully-buffered body.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub target: String,
    pub version: (u8, u8),
    headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Request {
    pub fn new(method: String, target: String, version: (u8, u8)) -> Self {
        Request {
            method,
            target,
            version,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn push_header(&mut self, name: String, value: String) {
        self.headers.push((name, value));
    }

    /// Case-insensitive lookup of the first matching header.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_urlencoded_form(&self) -> bool {
        self.header("content-type")
            .is_some_and(|v| v.contains("urlencoded"))
    }

    /// True when the parsed headers ask the connection to upgrade to
    /// WebSocket (`Upgrade: websocket` + a `Connection` header mentioning
    /// "upgrade"). Delegated wholesale to this cheap textual check; the
    /// actual RFC 6455 handshake is the protocol library's job.
    pub fn is_websocket_upgrade(&self) -> bool {
        let upgrade_is_ws = self
            .header("upgrade")
            .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
        let connection_has_upgrade = self
            .header("connection")
            .is_some_and(|v| v.to_ascii_lowercase().contains("upgrade"));
        upgrade_is_ws && connection_has_upgrade
    }
}

/// A `Request` enriched by the router: parsed URL path/query, path params
/// captured from the matching route's prefix, and Basic-auth credentials.
#[derive(Debug, Clone)]
pub struct RouteRequest {
    pub request: Request,
    pub path: String,
    pub query: HashMap<String, String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl RouteRequest {
    pub fn method(&self) -> &str {
        &self.request.method
    }

    pub fn body(&self) -> &[u8] {
        &self.request.body
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.request.header(name)
    }
}

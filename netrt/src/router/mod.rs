//! Method + path-prefix dispatch (§4.6). Routes are configured before
//! `run()` and never mutated afterward, so dispatch never takes a lock on
//! the route table itself (§5).

pub mod content_encoding;
pub mod cors;
pub mod static_files;

use std::collections::HashMap;
use std::sync::Arc;

use base64::Engine;

use crate::executor::{Executor, HandlerFn, HandlerResult};
use crate::request::{Request, RouteRequest};
use crate::response::{Body, Response};

struct Route {
    method: String,
    prefix: String,
    handler: HandlerFn,
}

type ReplyHook = Arc<dyn Fn(&mut Response) + Send + Sync>;

pub struct Router {
    routes: Vec<Route>,
    reply_hooks: Vec<ReplyHook>,
    extra_headers: Vec<(String, String)>,
}

impl Router {
    pub fn new() -> Self {
        Router {
            routes: Vec::new(),
            reply_hooks: Vec::new(),
            extra_headers: Vec::new(),
        }
    }

    /// Registers a route. `method` of `"*"` matches any verb. Routes are
    /// tried in registration order; the first whose method matches and whose
    /// `prefix` is a prefix of the request path wins (§4.6, step 1).
    pub fn route<F>(&mut self, method: &str, prefix: &str, handler: F) -> &mut Self
    where
        F: Fn(RouteRequest) -> HandlerResult + Send + Sync + 'static,
    {
        self.routes.push(Route {
            method: method.to_string(),
            prefix: prefix.to_string(),
            handler: Arc::new(handler),
        });
        self
    }

    /// Registers a reply hook. Hooks run in registration order, so this
    /// composes with `enable_cors()` regardless of call order instead of
    /// one silently replacing the other.
    pub fn reply_hook<F>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(&mut Response) + Send + Sync + 'static,
    {
        self.reply_hooks.push(Arc::new(hook));
        self
    }

    pub fn add_header(&mut self, name: &str, value: &str) -> &mut Self {
        self.extra_headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Registers the three CORS headers on every reply and an `OPTIONS`
    /// route answering with an empty 200 (§4.6).
    pub fn enable_cors(&mut self) -> &mut Self {
        cors::install(self);
        self
    }

    fn find_route(&self, method: &str, path: &str) -> Option<&Route> {
        self.routes
            .iter()
            .find(|r| (r.method == "*" || r.method == method) && path.starts_with(&r.prefix))
    }

    pub async fn dispatch(&self, request: Request, executor: &Executor, _is_tls: bool) -> Response {
        let encoding = request
            .header("accept-encoding")
            .map(content_encoding::select)
            .unwrap_or(content_encoding::ContentEncoding::Identity);

        let Some((path, query)) = split_target(&request.target) else {
            let mut response = Response::bad_request("malformed percent-encoding in request target");
            self.finish(&mut response, encoding);
            return response;
        };

        let Some(route) = self.find_route(&request.method, &path) else {
            let mut response = Response::not_found();
            self.finish(&mut response, encoding);
            return response;
        };

        let handler = route.handler.clone();
        let Some(route_request) = build_route_request(request, path, query) else {
            let mut response = Response::bad_request("malformed percent-encoding in request body");
            self.finish(&mut response, encoding);
            return response;
        };
        let mut response = executor.exec(handler, route_request).await;
        self.finish(&mut response, encoding);
        response
    }

    /// Runs reply hooks, applies configured extra headers, then — last, so
    /// hook-added headers are covered too — selects and applies content
    /// encoding (§4.8) against the request's `Accept-Encoding`.
    fn finish(&self, response: &mut Response, encoding: content_encoding::ContentEncoding) {
        for hook in &self.reply_hooks {
            hook(response);
        }
        for (name, value) in &self.extra_headers {
            response.set_header(name, value.clone());
        }
        if encoding == content_encoding::ContentEncoding::Gzip {
            apply_gzip(response);
        }
    }
}

impl Default for Router {
    fn default() -> Self {
        Router::new()
    }
}

/// Compresses an in-memory response body in place and sets
/// `Content-Encoding: gzip` (§4.8). File and empty bodies are left alone —
/// streaming a file through a gzip encoder is outside what this handler
/// shape supports, and there is nothing to gain compressing zero bytes.
fn apply_gzip(response: &mut Response) {
    let compressed = match &response.body {
        Body::Text(s) => content_encoding::gzip(s.as_bytes()),
        Body::Bytes(b) => content_encoding::gzip(b),
        Body::File(_) | Body::Empty => return,
    };
    let Ok(compressed) = compressed else { return };
    response.set_header("Content-Encoding", "gzip");
    response.set_header("Content-Length", compressed.len().to_string());
    response.body = Body::Bytes(compressed);
}

fn split_target(target: &str) -> Option<(String, HashMap<String, String>)> {
    match target.split_once('?') {
        Some((path, query)) => Some((path.to_string(), parse_query(query)?)),
        None => Some((target.to_string(), HashMap::new())),
    }
}

fn parse_query(query: &str) -> Option<HashMap<String, String>> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => Some((url_decode(k)?, url_decode(v)?)),
            None => Some((url_decode(pair)?, String::new())),
        })
        .collect()
}

/// Percent-decodes a string, turning `+` into space (§6 "URL decoding").
/// Returns `None` on a malformed percent sequence (a `%` not followed by two
/// hex digits) rather than silently keeping the raw byte.
pub fn url_decode(input: &str) -> Option<String> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' => {
                if i + 3 > bytes.len() {
                    return None;
                }
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok()?;
                let byte = u8::from_str_radix(hex, 16).ok()?;
                out.push(byte);
                i += 3;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    Some(String::from_utf8_lossy(&out).into_owned())
}

fn build_route_request(mut request: Request, path: String, query: HashMap<String, String>) -> Option<RouteRequest> {
    let (username, password) = extract_basic_auth(&request);

    if request.is_urlencoded_form() {
        let decoded = url_decode(&String::from_utf8_lossy(&request.body))?;
        request.body = decoded.into_bytes();
    }

    Some(RouteRequest {
        request,
        path,
        query,
        username,
        password,
    })
}

/// Extracts HTTP Basic credentials from `Authorization` (§4.6 step 3):
/// base64-decode the portion after the first 6 characters (`"Basic "`),
/// split at the first `:`.
fn extract_basic_auth(request: &Request) -> (Option<String>, Option<String>) {
    let Some(header) = request.header("authorization") else {
        return (None, None);
    };
    if header.len() <= 6 {
        return (None, None);
    }
    let encoded = &header[6..];
    let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(encoded) else {
        return (None, None);
    };
    let Ok(decoded) = String::from_utf8(decoded) else {
        return (None, None);
    };
    match decoded.split_once(':') {
        Some((user, pass)) => (Some(user.to_string()), Some(pass.to_string())),
        None => (None, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_matching_prefix_wins() {
        let mut router = Router::new();
        router.route("GET", "/api", |_| Ok(Response::text(200, "text/plain", "first")));
        router.route("GET", "/api/v2", |_| Ok(Response::text(200, "text/plain", "second")));
        let route = router.find_route("GET", "/api/v2/users").unwrap();
        assert_eq!(route.prefix, "/api");
    }

    #[test]
    fn url_decode_handles_plus_and_percent() {
        assert_eq!(url_decode("a+b%20c").as_deref(), Some("a b c"));
        assert_eq!(url_decode("100%25").as_deref(), Some("100%"));
    }

    #[test]
    fn url_decode_rejects_a_malformed_percent_sequence() {
        assert_eq!(url_decode("100%2"), None);
        assert_eq!(url_decode("100%zz"), None);
    }

    #[test]
    fn basic_auth_is_extracted() {
        let mut request = Request::new("GET".into(), "/".into(), (1, 1));
        let token = base64::engine::general_purpose::STANDARD.encode("alice:secret");
        request.push_header("Authorization".into(), format!("Basic {token}"));
        let (user, pass) = extract_basic_auth(&request);
        assert_eq!(user.as_deref(), Some("alice"));
        assert_eq!(pass.as_deref(), Some("secret"));
    }

    #[tokio::test]
    async fn gzip_is_applied_when_accept_encoding_allows_it() {
        let mut router = Router::new();
        router.route("GET", "/", |_| Ok(Response::text(200, "text/plain", "hello world")));

        let mut request = Request::new("GET".into(), "/".into(), (1, 1));
        request.push_header("Accept-Encoding".into(), "gzip".into());
        let response = router.dispatch(request, &Executor::Inline, false).await;

        assert_eq!(response.header("content-encoding"), Some("gzip"));
        let Body::Bytes(compressed) = &response.body else {
            panic!("expected a compressed byte body");
        };
        assert_eq!(content_encoding::gunzip(compressed).unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn identity_is_used_when_accept_encoding_is_absent() {
        let mut router = Router::new();
        router.route("GET", "/", |_| Ok(Response::text(200, "text/plain", "hello world")));

        let request = Request::new("GET".into(), "/".into(), (1, 1));
        let response = router.dispatch(request, &Executor::Inline, false).await;

        assert!(response.header("content-encoding").is_none());
        assert!(matches!(response.body, Body::Text(_)));
    }
}

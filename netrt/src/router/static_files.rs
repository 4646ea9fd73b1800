//! Static file serving (§4.6): path-traversal-safe lookup under a document
//! root, with a closed MIME extension table.
//!
//! Handlers run synchronously (`HandlerFn` is not async), so this module
//! does its filesystem work with `std::fs` and hands the open file to
//! `tokio::fs::File::from_std` for the response body — no executor needs a
//! runtime handle to use it, though a real document root should still be
//! served from `Pool` or `BoundedChannel` rather than `Inline`.

use std::path::{Path, PathBuf};

use crate::executor::{HandlerFn, HandlerResult};
use crate::request::RouteRequest;
use crate::response::{Body, Response};

/// Builds a handler suitable for `Router::route`, serving `GET`/`HEAD`
/// requests for files under `doc_root`.
pub fn handler(doc_root: PathBuf) -> HandlerFn {
    std::sync::Arc::new(move |route_req: RouteRequest| -> HandlerResult {
        Ok(serve(&doc_root, route_req.method(), &route_req.path))
    })
}

pub fn serve(doc_root: &Path, method: &str, url_path: &str) -> Response {
    if method != "GET" && method != "HEAD" {
        return Response::bad_request("static file handler only serves GET/HEAD");
    }
    if !is_safe_path(url_path) {
        return Response::bad_request("unsafe path");
    }

    let relative = url_path.trim_start_matches('/');
    let mut fs_path = doc_root.join(relative);

    if url_path.ends_with('/') {
        fs_path.push("index.html");
    } else if fs_path.is_dir() {
        return Response::redirect(301, &format!("{url_path}/"));
    }

    let file = match std::fs::File::open(&fs_path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Response::not_found(),
        Err(_) => return Response::server_error("failed to open file"),
    };

    let content_type = mime_type(&fs_path);

    if method == "HEAD" {
        let len = file.metadata().map(|m| m.len()).unwrap_or(0);
        let mut response = Response::empty(200);
        response.set_header("Content-Type", content_type);
        response.set_header("Content-Length", len.to_string());
        return response;
    }

    let mut response = Response::new(200, Body::File(tokio::fs::File::from_std(file)));
    response.set_header("Content-Type", content_type);
    response
}

/// No empty segments, no `.`/`..`, no `:` (§4.6).
fn is_safe_path(url_path: &str) -> bool {
    if url_path.is_empty() || !url_path.starts_with('/') {
        return false;
    }
    if url_path.contains(':') {
        return false;
    }
    let trimmed = url_path.trim_end_matches('/');
    for segment in trimmed.split('/').skip(1) {
        if segment.is_empty() || segment == "." || segment == ".." {
            return false;
        }
    }
    true
}

/// Closed extension table (§4.6); anything else maps to the generic binary
/// content type.
fn mime_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("js") | Some("mjs") => "application/javascript",
        Some("wasm") => "application/wasm",
        Some("css") => "text/css",
        Some("html") | Some("htm") => "text/html",
        Some("txt") => "text/plain",
        Some("json") => "application/json",
        Some("xml") => "application/xml",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") | Some("jpe") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("ico") => "image/vnd.microsoft.icon",
        Some("svg") | Some("svgz") => "image/svg+xml",
        Some("eot") => "application/vnd.ms-fontobject",
        Some("otf") => "font/otf",
        Some("ttf") => "font/ttf",
        Some("pdf") => "application/pdf",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn serves_index_html_for_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), b"<html></html>").unwrap();
        let response = serve(dir.path(), "GET", "/");
        assert_eq!(response.status, 200);
    }

    #[test]
    fn rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let response = serve(dir.path(), "GET", "/../etc/passwd");
        assert_eq!(response.status, 400);
    }

    #[test]
    fn rejects_colon_and_empty_segments() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(serve(dir.path(), "GET", "/c:/windows").status, 400);
        assert_eq!(serve(dir.path(), "GET", "/a//b").status, 400);
    }

    #[test]
    fn redirects_directory_without_trailing_slash() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("subdir")).unwrap();
        let mut f = std::fs::File::create(dir.path().join("subdir/index.html")).unwrap();
        f.write_all(b"hi").unwrap();
        let response = serve(dir.path(), "GET", "/subdir");
        assert_eq!(response.status, 301);
        assert_eq!(response.header("Location"), Some("/subdir/"));
    }

    #[test]
    fn head_returns_headers_without_reading_body() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"0123456789").unwrap();
        let response = serve(dir.path(), "HEAD", "/a.txt");
        assert_eq!(response.status, 200);
        assert_eq!(response.header("Content-Length"), Some("10"));
        assert!(matches!(response.body, Body::Empty));
    }

    #[test]
    fn missing_file_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let response = serve(dir.path(), "GET", "/nope.txt");
        assert_eq!(response.status, 404);
    }

    #[test]
    fn mime_table_matches_known_extensions() {
        assert_eq!(mime_type(Path::new("a.js")), "application/javascript");
        assert_eq!(mime_type(Path::new("a.unknown")), "application/octet-stream");
    }
}

//! Accept-Encoding negotiation (§4.8): select `gzip` when it (or `*`) is
//! listed with a non-zero q-value, else `identity`.

use std::io::Write;

use flate2::write::GzEncoder;
use flate2::Compression;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentEncoding {
    Gzip,
    Identity,
}

/// Parses one `Accept-Encoding` header value and picks an encoding.
pub fn select(accept_encoding: &str) -> ContentEncoding {
    let mut gzip_acceptable: Option<bool> = None;
    let mut star_acceptable = false;

    for entry in accept_encoding.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let mut parts = entry.split(';');
        let coding = parts.next().unwrap_or("").trim();
        let acceptable = is_acceptable(parts);

        if coding.eq_ignore_ascii_case("gzip") {
            gzip_acceptable = Some(acceptable);
        } else if coding == "*" {
            star_acceptable = acceptable;
        }
    }

    match gzip_acceptable {
        Some(true) => ContentEncoding::Gzip,
        Some(false) => ContentEncoding::Identity,
        None if star_acceptable => ContentEncoding::Gzip,
        None => ContentEncoding::Identity,
    }
}

fn is_acceptable<'a>(params: impl Iterator<Item = &'a str>) -> bool {
    for param in params {
        let param = param.trim();
        if let Some(q) = param.strip_prefix("q=") {
            return q.trim().parse::<f64>().map(|v| v != 0.0).unwrap_or(true);
        }
    }
    true
}

/// Compresses `body` with gzip at the default compression level.
pub fn gzip(body: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(body)?;
    encoder.finish()
}

/// Decompresses a gzip-encoded body, the client side's mirror of `gzip`
/// (used by `client::http` when a response carries `Content-Encoding: gzip`).
pub fn gunzip(body: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = flate2::read::GzDecoder::new(body);
    let mut out = Vec::new();
    std::io::Read::read_to_end(&mut decoder, &mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_gzip_when_explicitly_listed() {
        assert_eq!(select("gzip, deflate"), ContentEncoding::Gzip);
    }

    #[test]
    fn respects_zero_q_value() {
        assert_eq!(select("gzip;q=0"), ContentEncoding::Identity);
    }

    #[test]
    fn falls_back_to_star() {
        assert_eq!(select("br, *;q=0.5"), ContentEncoding::Gzip);
    }

    #[test]
    fn no_header_acceptable_means_identity() {
        assert_eq!(select(""), ContentEncoding::Identity);
    }

    #[test]
    fn gzip_round_trips_through_decompression() {
        let compressed = gzip(b"hello world").unwrap();
        let mut decoder = flate2::read::GzDecoder::new(compressed.as_slice());
        let mut out = String::new();
        std::io::Read::read_to_string(&mut decoder, &mut out).unwrap();
        assert_eq!(out, "hello world");
    }
}

//! TLS sniffing on a freshly accepted connection (§4.3). Reads the first few
//! bytes, classifies them as a TLS ClientHello or plain HTTP, and hands the
//! *exact* bytes read back to the caller so no byte is ever lost across the
//! Detector → Session transition.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;

use crate::error::DetectError;

/// Detection never buffers more than this many bytes before making a call —
/// a TLS record header is fully determined by its first 3 bytes, but we read
/// a little further to absorb short reads from slow peers.
const MAX_SNIFF_BYTES: usize = 16;
const TLS_CONTENT_TYPE_HANDSHAKE: u8 = 0x16;

pub enum Detection {
    /// Looks like a TLS ClientHello; bytes already read must be fed to the
    /// TLS handshake as leading plaintext-ciphertext.
    Tls(Vec<u8>),
    /// Looks like plain HTTP; bytes already read must be prepended to the
    /// HTTP session's read buffer.
    Plain(Vec<u8>),
}

/// Peeks at `stream`, classifying it within `deadline`.
pub async fn detect<S>(stream: &mut S, deadline: Duration) -> Result<Detection, DetectError>
where
    S: AsyncRead + Unpin,
{
    timeout(deadline, sniff(stream))
        .await
        .map_err(|_| DetectError::TimedOut)?
}

async fn sniff<S>(stream: &mut S) -> Result<Detection, DetectError>
where
    S: AsyncRead + Unpin,
{
    let mut buf = [0u8; MAX_SNIFF_BYTES];
    let mut filled = 0usize;

    // A TLS record header is 5 bytes (type, version-major, version-minor,
    // length-hi, length-lo); we only need the first 3 to classify, but keep
    // reading opportunistically up to MAX_SNIFF_BYTES so slow single-byte
    // writers don't fool us into misreading the content type.
    while filled < 3 {
        let n = stream.read(&mut buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Err(DetectError::EmptyStream);
            }
            break;
        }
        filled += n;
    }

    // Opportunistic extra read: non-blocking in spirit, best-effort in
    // practice — if more is already buffered in the kernel, grab it so it
    // isn't re-read as a second, confusingly-small chunk downstream.
    if filled < MAX_SNIFF_BYTES {
        if let Ok(Ok(n)) =
            tokio::time::timeout(Duration::from_millis(1), stream.read(&mut buf[filled..])).await
        {
            filled += n;
        }
    }

    let prefix = buf[..filled].to_vec();
    if is_tls_client_hello(&prefix) {
        Ok(Detection::Tls(prefix))
    } else {
        Ok(Detection::Plain(prefix))
    }
}

fn is_tls_client_hello(prefix: &[u8]) -> bool {
    if prefix.len() < 3 {
        return false;
    }
    // record type 0x16 (handshake), version major byte 0x03 (SSL3/TLS1.x),
    // version minor byte in the range seen across TLS 1.0-1.3 (0x00-0x04).
    prefix[0] == TLS_CONTENT_TYPE_HANDSHAKE && prefix[1] == 0x03 && prefix[2] <= 0x04
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn classifies_tls_client_hello() {
        let mut stream = Cursor::new(vec![0x16, 0x03, 0x01, 0x00, 0x05, 1, 2, 3, 4, 5]);
        match detect(&mut stream, Duration::from_secs(1)).await.unwrap() {
            Detection::Tls(bytes) => assert_eq!(bytes[0], 0x16),
            Detection::Plain(_) => panic!("expected TLS classification"),
        }
    }

    #[tokio::test]
    async fn classifies_plain_http() {
        let mut stream = Cursor::new(b"GET / HTTP/1.1\r\n".to_vec());
        match detect(&mut stream, Duration::from_secs(1)).await.unwrap() {
            Detection::Plain(bytes) => assert_eq!(&bytes[..3], b"GET"),
            Detection::Tls(_) => panic!("expected plain classification"),
        }
    }

    #[tokio::test]
    async fn empty_stream_is_an_error() {
        let mut stream = Cursor::new(Vec::<u8>::new());
        assert!(matches!(
            detect(&mut stream, Duration::from_secs(1)).await,
            Err(DetectError::EmptyStream)
        ));
    }
}

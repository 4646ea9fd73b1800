//! STOMP client (§4.9): CONNECT, SUBSCRIBE, and a heartbeat/inactivity timer
//! pair mirroring `stomp_client`'s `beat_timer_`/`beat_timeout_timer_` — send
//! a heartbeat frame every 5s, and cancel if 5s pass with no inbound byte.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::error::StompError;

use super::connect::connect_tcp;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const INACTIVITY_TIMEOUT: Duration = Duration::from_secs(5);

/// Connects, subscribes to `destination`, and streams decoded message bodies
/// over the returned channel until the connection closes, the inactivity
/// timer expires, or every receiver is dropped.
pub async fn subscribe(
    host: &str,
    port: u16,
    deadline: Duration,
    destination: &str,
) -> Result<mpsc::Receiver<String>, StompError> {
    let mut stream = connect_tcp(host, port, deadline).await?;

    write_frame(&mut stream, "CONNECT\r\nlogin:a\r\npasscode:b\r\nheart-beat:5000,1000\r\n\r\n").await?;
    read_until_null(&mut stream).await?; // CONNECTED frame; contents unused

    write_frame(&mut stream, &format!("SUBSCRIBE\r\ndestination:{destination}\r\nack:auto\r\n\r\n")).await?;

    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(read_loop(stream, tx));
    Ok(rx)
}

async fn read_loop(mut stream: TcpStream, tx: mpsc::Sender<String>) {
    loop {
        let heartbeat = tokio::time::sleep(HEARTBEAT_INTERVAL);
        tokio::pin!(heartbeat);

        tokio::select! {
            _ = &mut heartbeat => {
                if write_frame(&mut stream, "\n").await.is_err() {
                    break;
                }
            }
            frame = tokio::time::timeout(INACTIVITY_TIMEOUT, read_until_null(&mut stream)) => {
                match frame {
                    Ok(Ok(body)) => {
                        if body.is_empty() {
                            continue; // bare heartbeat from the server
                        }
                        if tx.send(body).await.is_err() {
                            break;
                        }
                    }
                    Ok(Err(_)) | Err(_) => break, // I/O error or inactivity timeout
                }
            }
        }
    }
}

async fn write_frame<S: AsyncWrite + Unpin>(stream: &mut S, frame: &str) -> Result<(), StompError> {
    stream.write_all(frame.as_bytes()).await?;
    stream.write_all(&[0u8]).await?;
    stream.flush().await?;
    Ok(())
}

async fn read_until_null<S: AsyncRead + Unpin>(stream: &mut S) -> Result<String, StompError> {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            return Err(StompError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed mid-frame",
            )));
        }
        if byte[0] == 0 {
            break;
        }
        buf.push(byte[0]);
    }
    Ok(String::from_utf8_lossy(&buf).trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn reads_a_frame_up_to_the_null_terminator() {
        let (mut peer, mut stream) = duplex(1024);
        peer.write_all(b"MESSAGE\r\nbody\0").await.unwrap();

        let frame = read_until_null(&mut stream).await.unwrap();
        assert_eq!(frame, "MESSAGE\r\nbody");
    }

    #[tokio::test]
    async fn write_frame_null_terminates() {
        let (mut peer, mut stream) = duplex(1024);
        write_frame(&mut stream, "\n").await.unwrap();

        let mut buf = [0u8; 2];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"\n\0");
    }
}

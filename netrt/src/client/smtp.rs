//! SMTP-over-TLS client (§4.9): the five-step PLAIN-auth exchange from
//! `smtp_client::transfer`'s Boost.Asio coroutine, collapsed into a
//! straight-line `async` sequence — Rust's `await` needs none of the
//! original's explicit resumable-state machinery to get the same ordering.

use std::time::Duration;

use base64::Engine;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_rustls::TlsConnector;

use crate::error::SmtpError;

use super::connect::connect_tls;

const SERVICE_READY: u16 = 220;
const REQUESTED_MAIL_ACTION_OK: u16 = 250;
const AUTHENTICATION_SUCCEEDED: u16 = 235;
const START_MAIL_INPUT: u16 = 354;

pub struct SmtpMessage {
    pub from: String,
    pub to: String,
    pub data: String,
}

/// Connects, authenticates with `username`/`password` over PLAIN, and sends
/// `message`. Any status deviation from the expected 220/250/235/250/250/
/// 354/250 sequence is reported as `SmtpError::UnexpectedStatus` (the spec's
/// single "not supported" error, refined here with which turn failed).
pub async fn send(
    host: &str,
    port: u16,
    deadline: Duration,
    connector: &TlsConnector,
    ehlo_hostname: &str,
    username: &str,
    password: &str,
    message: &SmtpMessage,
) -> Result<(), SmtpError> {
    let mut stream = connect_tls(host, port, deadline, connector).await?;

    expect_status(&mut stream, "service-ready", SERVICE_READY).await?;

    write_line(&mut stream, &format!("EHLO {ehlo_hostname}")).await?;
    expect_status(&mut stream, "ehlo", REQUESTED_MAIL_ACTION_OK).await?;

    let auth_plain = base64::engine::general_purpose::STANDARD.encode(format!("\0{username}\0{password}"));
    write_line(&mut stream, &format!("AUTH PLAIN {auth_plain}")).await?;
    expect_status(&mut stream, "auth-plain", AUTHENTICATION_SUCCEEDED).await?;

    write_line(&mut stream, &format!("MAIL FROM:<{}>", message.from)).await?;
    expect_status(&mut stream, "mail-from", REQUESTED_MAIL_ACTION_OK).await?;

    write_line(&mut stream, &format!("RCPT TO:<{}>", message.to)).await?;
    expect_status(&mut stream, "rcpt-to", REQUESTED_MAIL_ACTION_OK).await?;

    write_line(&mut stream, "DATA").await?;
    expect_status(&mut stream, "data", START_MAIL_INPUT).await?;

    write_line(&mut stream, &format!("{}\r\n.", message.data)).await?;
    expect_status(&mut stream, "end-of-data", REQUESTED_MAIL_ACTION_OK).await?;

    write_line(&mut stream, "QUIT").await?;
    Ok(())
}

async fn write_line<S: AsyncWrite + Unpin>(stream: &mut S, line: &str) -> Result<(), SmtpError> {
    stream.write_all(line.as_bytes()).await?;
    stream.write_all(b"\r\n").await?;
    stream.flush().await?;
    Ok(())
}

async fn expect_status<S: AsyncRead + Unpin>(
    stream: &mut S,
    stage: &'static str,
    expected: u16,
) -> Result<(), SmtpError> {
    let line = read_line(stream).await?;
    let actual = line.get(..3).and_then(|s| s.parse().ok()).unwrap_or(0);
    if actual != expected {
        return Err(SmtpError::UnexpectedStatus { stage, expected, actual });
    }
    Ok(())
}

async fn read_line<S: AsyncRead + Unpin>(stream: &mut S) -> Result<String, SmtpError> {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            break;
        }
        buf.push(byte[0]);
        if buf.ends_with(b"\r\n") {
            break;
        }
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn unexpected_status_names_the_failing_stage() {
        let (mut peer, stream) = duplex(1024);
        let check = tokio::spawn(async move { expect_status(stream, "service-ready", SERVICE_READY).await });
        peer.write_all(b"550 not ok\r\n").await.unwrap();

        let err = check.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            SmtpError::UnexpectedStatus { stage: "service-ready", expected: 220, actual: 550 }
        ));
    }

    #[tokio::test]
    async fn matching_status_succeeds() {
        let (mut peer, stream) = duplex(1024);
        let check = tokio::spawn(async move { expect_status(stream, "ehlo", REQUESTED_MAIL_ACTION_OK).await });
        peer.write_all(b"250 OK\r\n").await.unwrap();

        check.await.unwrap().unwrap();
    }
}

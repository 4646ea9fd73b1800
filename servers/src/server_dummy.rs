//! # Dummy Test Server
//!
//! A plain (no TLS) HTTP + WebSocket server used for local development and
//! smoke-testing `netrt` without any certificate setup. It provides basic
//! endpoints to verify server responsiveness and a WebSocket echo endpoint,
//! without connecting to anything beyond this process.
//!
//! ## Endpoints:
//! - `GET /`: Returns a simple HTML page displaying the current UTC timestamp.
//! - `GET /status`: Returns a JSON object containing the current UTC timestamp
//!   and the number of live sessions.
//! - Any request carrying `Upgrade: websocket` is accepted as a WebSocket
//!   connection that echoes every frame it receives back to the sender.
//!
//! This server is a lightweight substitute for `server_speak`, useful for
//! isolated component testing or front-end development where a TLS
//! certificate isn't available.

use std::env;

use chrono::Utc;
use clap::Parser;
use serde::Serialize;
use tracing::info;

use netrt::{Executor, Response, Server};

/// Command-line configuration for the dummy server.
#[derive(Parser, Debug)]
struct Args {
    /// Address to listen on.
    #[arg(long, env = "DUMMY_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on.
    #[arg(long, env = "DUMMY_PORT", default_value_t = 3000)]
    port: u16,
}

#[derive(Serialize)]
struct StatusResponse {
    ts: String,
    live_sessions: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if env::var("RUST_LOG").is_err() {
        unsafe { env::set_var("RUST_LOG", "info") };
    }
    tracing_subscriber::fmt().with_target(true).init();

    let args = Args::parse();
    let mut server = Server::new(Executor::Inline);

    server
        .router_mut()
        .route("GET", "/", |_req| {
            let now = Utc::now();
            Ok(Response::text(
                200,
                "text/html; charset=utf-8",
                format!("<html><body>{}</body></html>", now.to_rfc3339()),
            ))
        })
        .enable_cors();

    let registry = server.registry();
    server.router_mut().route("GET", "/status", move |_req| {
        let body = StatusResponse {
            ts: Utc::now().to_rfc3339(),
            live_sessions: registry.live_count(),
        };
        Ok(Response::text(
            200,
            "application/json",
            serde_json::to_string(&body).unwrap_or_else(|_| "{}".to_string()),
        ))
    });

    server.on_ws_msg(|handle, payload, kind| {
        handle.send(payload, kind, None);
    });

    server.init(&args.host, args.port).await?;
    info!(host = %args.host, port = args.port, "dummy server listening");

    let running = server.run();
    tokio::select! {
        _ = running => {}
        _ = tokio::signal::ctrl_c() => {
            info!("ctrl-c received, shutting down");
            server.stop().await;
        }
    }

    Ok(())
}

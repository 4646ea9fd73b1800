//! # TLS-enabled demo server
//!
//! Boots `netrt::Server` with the full ambient stack this workspace's
//! binaries share: `.env` loading, `RuntimeConfig`/`ProcessInfo` discovery,
//! console+rolling-JSON-file logging, and `tokio-graceful` shutdown
//! coordination. Serves a small static document root plus a WebSocket
//! broadcast endpoint — every inbound text frame is fanned out to every
//! other connected client, demonstrating `Registry::broadcast`.
//!
//! TLS is loaded from `--cert-dir` (`fullchain.pem` + `privkey.pem`, same
//! layout `netrt::tls::load_server_config` expects) unless `--no-tls` is
//! passed, in which case the server falls back to detecting and serving
//! plain HTTP/WS only — the same dual-protocol listener either way, the
//! difference is only whether a certificate was configured.

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use static_init::dynamic;
use tokio::task;
use tokio_graceful::Shutdown;
use tracing::{debug, error, info, warn};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, prelude::*, EnvFilter};

use lib_common::{get_process_info, get_runtime_config, ProcessInfo, ProcessInfoError, RuntimeConfig, RuntimeConfigError};
use netrt::{Executor, Registry, Server};

#[dynamic]
static DOTENV_INIT: () = {
    let dotenv_os: &str = if cfg!(target_os = "windows") {
        ".env.windows"
    } else {
        ".env.linux"
    };
    dotenvy::dotenv().ok();
    dotenvy::from_filename(dotenv_os).ok();
};

#[dynamic]
pub static PROCESSINFO: Result<ProcessInfo, ProcessInfoError> = get_process_info();

#[dynamic]
pub static RUNTIMECONFIG: Result<RuntimeConfig, RuntimeConfigError> = get_runtime_config();

#[derive(Parser, Debug)]
struct Args {
    /// Address to listen on.
    #[arg(long, env = "SPEAK_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on; falls back to `Tcp:Port` from the runtime config,
    /// then to 8443, if not given.
    #[arg(long, env = "SPEAK_PORT")]
    port: Option<u16>,

    /// Directory containing `fullchain.pem` and `privkey.pem`.
    #[arg(long, env = "SPEAK_CERT_DIR", default_value = "~/.letsencrypt")]
    cert_dir: String,

    /// Directory served at `/static`.
    #[arg(long, env = "SPEAK_DOC_ROOT", default_value = "./public")]
    doc_root: PathBuf,

    /// Disables TLS and serves plain HTTP/WS only.
    #[arg(long)]
    no_tls: bool,

    /// Number of worker tasks in the bounded-channel executor.
    #[arg(long, default_value_t = 4)]
    workers: usize,

    /// Depth of the bounded-channel executor's job queue.
    #[arg(long, default_value_t = 64)]
    queue_depth: usize,
}

fn setup_logging() -> io::Result<()> {
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let log_dir = std::env::var("LOG_DIR").unwrap_or_else(|_| "logs".to_string());
    std::fs::create_dir_all(&log_dir)?;

    let process_basename: &String = match &*PROCESSINFO {
        Ok(process_info) => &process_info.process_basename,
        Err(e) => {
            eprintln!("Failed to retrieve process info: {}", e);
            std::process::exit(1);
        }
    };
    let file_appender = rolling::daily(&log_dir, process_basename.as_str());
    let (non_blocking_appender, guard) = non_blocking(file_appender);
    static mut GUARD: Option<tracing_appender::non_blocking::WorkerGuard> = None;
    unsafe {
        GUARD = Some(guard);
    }

    let console_layer = fmt::layer().with_target(true).with_ansi(true);
    let file_layer = fmt::layer().with_ansi(false).with_writer(non_blocking_appender).json();

    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&log_level)).unwrap();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    info!("Logging initialized with level: {}", log_level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = setup_logging() {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    match &*PROCESSINFO {
        Ok(process_info) => info!("{}", process_info),
        Err(e) => {
            error!("Failed to retrieve process info: {}", e);
            std::process::exit(1);
        }
    }

    match &*RUNTIMECONFIG {
        Ok(runtime_config) => info!("{}", runtime_config),
        Err(e) => {
            error!("Failed to retrieve runtime config: {}", e);
            std::process::exit(1);
        }
    }

    let args = Args::parse();
    let shutdown: Shutdown = tokio_graceful::Shutdown::default();
    shutdown.spawn_task_fn(move |guard| tokio_main(args, guard));

    match shutdown.shutdown_with_limit(Duration::from_secs(10)).await {
        Ok(elapsed) => info!("shutdown: gracefully {}s after shutdown signal received", elapsed.as_secs_f64()),
        Err(e) => info!("shutdown: forcefully due to timeout: {}", e),
    }

    info!("Bye!");
    Ok(())
}

fn resolve_port(args: &Args, config_options: &BTreeMap<String, String>) -> u16 {
    if let Some(port) = args.port {
        return port;
    }
    if let Some(value) = config_options.get("Tcp:Port") {
        if let Ok(port) = value.parse() {
            return port;
        }
    }
    8443
}

async fn tokio_main(args: Args, shutdown_guard: tokio_graceful::ShutdownGuard) {
    let config_options: BTreeMap<String, String> = match &*RUNTIMECONFIG {
        Ok(config) => config.config_options.clone(),
        Err(_) => BTreeMap::new(),
    };
    let port = resolve_port(&args, &config_options);

    let mut server = Server::new(Executor::BoundedChannel(
        netrt::executor::BoundedChannelExecutor::new(args.queue_depth, args.workers),
    ));

    if args.no_tls {
        info!("TLS disabled (--no-tls); serving plain HTTP/WS only");
    } else {
        let cert_dir = shellexpand_home(&args.cert_dir);
        match server.enable_tls(&cert_dir) {
            Ok(_) => info!(cert_dir = %cert_dir.display(), "TLS enabled"),
            Err(e) => {
                warn!(error = %e, "failed to load TLS certificates; falling back to plain HTTP/WS");
            }
        }
    }

    let doc_root = args.doc_root.clone();
    server
        .router_mut()
        .route("GET", "/static", move |req| {
            Ok(netrt::router::static_files::serve(&doc_root, req.method(), &req.path))
        })
        .enable_cors();

    server.on_ws_open(move |handle, is_tls| {
        debug!(session = ?handle.id(), tls = is_tls, "websocket session opened");
    });

    let registry_for_msg = server.registry();
    server.on_ws_msg(move |_handle, payload, kind| {
        registry_for_msg.broadcast(payload, kind.into());
    });
    server.on_ws_close(|id| {
        debug!(session = ?id, "websocket session closed");
    });

    task::spawn(heartbeat(server.registry()));

    if let Err(e) = server.init(&args.host, port).await {
        error!(error = %e, "failed to bind listener");
        return;
    }
    info!(host = %args.host, port, "server listening");

    tokio::select! {
        _ = shutdown_guard.cancelled() => {
            info!("Signal received: initiate graceful shutdown");
            server.stop().await;
        }
        _ = server.run() => {}
    }

    drop(shutdown_guard);
}

/// Periodically logs the number of live sessions; mostly useful to confirm
/// the registry is tracking connects/disconnects during manual testing.
async fn heartbeat(registry: Registry) {
    let mut ticker = tokio::time::interval(Duration::from_secs(30));
    loop {
        ticker.tick().await;
        debug!(live_sessions = registry.live_count(), "heartbeat");
    }
}

fn shellexpand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

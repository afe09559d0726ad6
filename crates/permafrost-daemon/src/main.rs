//! permafrost-daemon - the control plane binary.
//!
//! Hosts two surfaces concurrently:
//!
//! - the sidecar HTTP surface (`/check`, `/snapshot`, `/app-snapshot`)
//! - the operator RPC surface (framed protobuf over TCP)
//!
//! The daemon holds no persistent state: every breakpoint, freeze, and
//! snapshot lives in memory and dies with the process. It runs in the
//! foreground until terminated; process supervision belongs to the
//! surrounding init system or pod runtime.

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use permafrost_core::freeze::FreezeConfig;
use permafrost_daemon::http;
use permafrost_daemon::protocol::ControlServer;
use permafrost_daemon::state::ControlPlane;
use tokio::signal::unix::{SignalKind, signal};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// permafrost control plane
#[derive(Parser, Debug)]
#[command(name = "permafrost-daemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// Bind address for the sidecar HTTP surface
    #[arg(long, default_value = "0.0.0.0:8080", env = "PERMAFROST_HTTP_ADDR")]
    http_addr: SocketAddr,

    /// Bind address for the operator RPC surface
    #[arg(long, default_value = "0.0.0.0:50051", env = "PERMAFROST_CONTROL_ADDR")]
    control_addr: SocketAddr,

    /// Timeout after which a freeze auto-releases
    #[arg(long, default_value = "30s", value_parser = humantime::parse_duration,
          env = "PERMAFROST_FREEZE_TIMEOUT")]
    freeze_timeout: Duration,

    /// Grace period a released freeze stays reachable for late polls
    #[arg(long, default_value = "5s", value_parser = humantime::parse_duration,
          env = "PERMAFROST_RELEASE_GRACE")]
    release_grace: Duration,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "PERMAFROST_LOG")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .context("invalid log level")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting permafrost control plane");

    let plane = ControlPlane::new(FreezeConfig {
        timeout: args.freeze_timeout,
        release_grace: args.release_grace,
    });

    let http_listener = tokio::net::TcpListener::bind(args.http_addr)
        .await
        .with_context(|| format!("failed to bind sidecar HTTP surface on {}", args.http_addr))?;
    info!(addr = %args.http_addr, "Sidecar HTTP surface listening");

    let control_server = ControlServer::bind(args.control_addr, plane.clone())
        .await
        .with_context(|| format!("failed to bind control RPC surface on {}", args.control_addr))?;

    let router = http::router(plane);

    tokio::select! {
        result = axum::serve(http_listener, router).into_future() => {
            result.context("sidecar HTTP surface failed")?;
        }
        result = control_server.run() => {
            result.context("control RPC surface failed")?;
        }
        () = shutdown_signal() => {
            info!("Shutdown signal received, exiting");
        }
    }

    Ok(())
}

/// Completes on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let mut interrupt = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut terminate = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

    tokio::select! {
        _ = interrupt.recv() => {}
        _ = terminate.recv() => {}
    }
}

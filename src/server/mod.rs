mod admin;
pub mod bootstrap;
pub mod runtime;
mod state;

pub use state::BrokerState;

use crate::proxy;
use anyhow::Result;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::{error, info};

/// Run the broker's Front Door with graceful shutdown support.
///
/// When `shutdown` is notified the server stops accepting new connections
/// and waits up to `DRAIN_TIMEOUT` for in-flight requests to complete
/// before forcibly dropping them.
pub async fn run_broker_server(
    listen: &str,
    state: BrokerState,
    shutdown: Arc<Notify>,
) -> Result<()> {
    const DRAIN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

    let addr: SocketAddr = listen.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!("server: front door listening, addr={}", addr);

    let active_conns = Arc::new(AtomicI64::new(0));

    loop {
        let accepted = tokio::select! {
            result = listener.accept() => result,
            _ = shutdown.notified() => {
                info!("server: front door: stop accepting new connections, draining...");
                break;
            }
        };

        let (stream, _peer_addr) = match accepted {
            Ok(v) => v,
            Err(e) => {
                error!("server: front door: accept failed, error={}", e);
                continue;
            }
        };

        active_conns.fetch_add(1, Ordering::Relaxed);
        let state = state.clone();
        let active_conns = active_conns.clone();

        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let svc = service_fn(move |req: Request<Incoming>| {
                let state = state.clone();
                async move { proxy::handle_request(req, state).await }
            });

            if let Err(e) = auto::Builder::new(TokioExecutor::new())
                .http1()
                .keep_alive(true)
                .http2()
                .keep_alive_interval(Some(std::time::Duration::from_secs(20)))
                .serve_connection_with_upgrades(io, svc)
                .await
            {
                if !e.to_string().contains("connection closed") {
                    error!("server: front door: connection error, error={}", e);
                }
            }

            active_conns.fetch_sub(1, Ordering::Relaxed);
        });
    }

    let active = active_conns.load(Ordering::Relaxed);
    if active > 0 {
        info!(
            "server: front door: waiting for {} active connections to drain",
            active
        );
        let drain = async {
            loop {
                if active_conns.load(Ordering::Relaxed) == 0 {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        };
        match tokio::time::timeout(DRAIN_TIMEOUT, drain).await {
            Ok(_) => info!("server: front door: all connections drained"),
            Err(_) => {
                let remaining = active_conns.load(Ordering::Relaxed);
                info!(
                    "server: front door: drain timeout ({}s), {} connections still active",
                    DRAIN_TIMEOUT.as_secs(),
                    remaining
                );
            }
        }
    }

    Ok(())
}

/// Run the admin listener exposing `/healthz`, `/readyz`, `/metrics`.
pub async fn run_admin_server(listen: &str, state: BrokerState) -> Result<()> {
    let addr: SocketAddr = listen.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!("server: admin listening, addr={}", addr);

    loop {
        let (stream, _) = listener.accept().await?;
        let state = state.clone();

        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let svc = service_fn(move |req: Request<Incoming>| {
                let state = state.clone();
                async move { admin::handle_admin(req, state) }
            });

            if let Err(e) = auto::Builder::new(TokioExecutor::new())
                .http1()
                .keep_alive(true)
                .serve_connection_with_upgrades(io, svc)
                .await
            {
                if !e.to_string().contains("connection closed") {
                    error!("server: admin: connection error, error={}", e);
                }
            }
        });
    }
}

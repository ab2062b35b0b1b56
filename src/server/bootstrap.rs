//! Broker lifecycle: load config → connect Store → reset on startup →
//! start scheduler worker → serve front door + admin → drain on shutdown.
//!
//! There is no upstream cluster to discover here, just one configured
//! `APIM_URL`, so the phase structure is init → serve → shutdown with no
//! discovery/watch step in between.

use crate::config::BrokerConfig;
use crate::scheduler;
use crate::server::{self, BrokerState};
use crate::store::{RedisStore, Store};
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// CLI arguments forwarded from `main()`.
pub struct BootstrapArgs {
    pub config_path: std::path::PathBuf,
    pub listen: String,
    pub admin_listen: String,
}

/// Broker lifecycle: init → connect Store → reset → serve → shutdown.
pub async fn run(args: BootstrapArgs) -> Result<()> {
    init_tracing();

    let config = BrokerConfig::load(&args.config_path)?;
    tracing::info!(
        "bootstrap: loaded config, apim_prefix={}, llm_prefix={}, rpm={}, tpm={}, rpd={}, tpd={}",
        config.apim_prefix,
        config.llm_prefix,
        config.limits.rpm_limit,
        config.limits.tpm_limit,
        config.limits.rpd_limit,
        config.limits.tpd_limit,
    );

    let store: Arc<dyn Store> = Arc::new(RedisStore::connect(&config.store).await?);

    // Broker startup re-seeds the capacity buckets and today's window/daily
    // keys so a restart never inherits a prior process's half-drained state.
    store.reset_on_startup(&config.apim_prefix).await?;
    tracing::info!("bootstrap: store reset on startup, prefix={}", config.apim_prefix);

    let config = Arc::new(config);
    let state = BrokerState::new(config.clone(), store.clone());

    let shutdown = Arc::new(Notify::new());

    let client = reqwest::Client::builder()
        .build()
        .expect("failed to build upstream HTTP client");

    let worker_handle = tokio::spawn({
        let queue = state.queue.clone();
        let store = store.clone();
        let config = config.clone();
        let shutdown = shutdown.clone();
        async move { scheduler::run_worker(queue, store, config, client, shutdown).await }
    });

    start_admin_server(&state, &args);

    tracing::info!("server: starting broker front door, listen={}", args.listen);

    let front_door_handle = tokio::spawn({
        let listen = args.listen.clone();
        let state = state.clone();
        let shutdown = shutdown.clone();
        async move { server::run_broker_server(&listen, state, shutdown).await }
    });

    wait_for_shutdown(&shutdown).await;

    if let Err(e) = front_door_handle.await {
        tracing::error!("server: front door task error: {}", e);
    }
    worker_handle.abort();

    tracing::info!("server: shutdown complete");
    Ok(())
}

fn init_tracing() {
    let (non_blocking, _guard) = tracing_appender::non_blocking::NonBlockingBuilder::default()
        .buffered_lines_limit(128_000)
        .lossy(true)
        .finish(std::io::stdout());

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(false)
                .json(),
        )
        .init();

    std::mem::forget(_guard);
}

fn start_admin_server(state: &BrokerState, args: &BootstrapArgs) {
    let s = state.clone();
    let admin_addr = args.admin_listen.clone();
    tokio::spawn(async move {
        if let Err(e) = server::run_admin_server(&admin_addr, s).await {
            tracing::error!("server: admin failed, error={}", e);
        }
    });
}

async fn wait_for_shutdown(shutdown: &Arc<Notify>) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("server: received SIGINT, shutting down"),
        _ = terminate => tracing::info!("server: received SIGTERM, shutting down"),
    }

    shutdown.notify_waiters();
}

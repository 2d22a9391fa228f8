mod api;
mod client;
mod config;
mod error;
mod faults;
mod housekeeping;
mod notify;
mod session;
mod types;

#[cfg(test)]
mod testing;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::latency::LatencyStats;
use crate::api::{router, ApiState};
use crate::client::BridgeClient;
use crate::config::{Config, CHANNEL_CAPACITY, SHUTDOWN_GRACE_SECS};
use crate::error::Result;
use crate::faults::FaultSupervisor;
use crate::housekeeping::{MemoryMonitor, SessionBackup};
use crate::notify::{Alerter, FcmNotifier, HttpWebhook, Webhook};
use crate::session::{Session, SessionState};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    info!(bot = %cfg.bot_name, port = cfg.port, "starting WhatsApp gateway");

    // --- Preflight: single instance, stale profile lock, corrupt session ---
    housekeeping::preflight(&cfg).await?;
    let backup = SessionBackup::new(&cfg);
    if let Err(e) = backup.restore_if_corrupt().await {
        warn!("session restore check failed: {e}");
    }

    // --- Fault routing ---
    let (fault_reporter, fault_rx) = faults::channel();
    faults::install_panic_hook(fault_reporter.clone());

    // --- Outbound collaborators ---
    let webhook: Arc<dyn Webhook> = Arc::new(HttpWebhook::new(
        cfg.webhook_url.clone(),
        cfg.down_webhook_url.clone(),
    ));
    if cfg.webhook_url.is_none() {
        warn!("ONMESSAGE not set: inbound messages will not be forwarded");
    }
    let alerter = Alerter::new(FcmNotifier::from_config(&cfg), Arc::clone(&webhook));

    // --- Client bridge + session ---
    let (event_tx, event_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (bridge, connection) = BridgeClient::new(cfg.bridge_url.clone(), event_tx);
    let bridge_task = tokio::spawn(connection.run());

    let session = Arc::new(Session::new(
        Arc::new(bridge),
        SessionState::new(),
        &cfg,
        alerter.clone(),
    ));

    let dispatcher = session.dispatcher(Arc::clone(&webhook));
    let dispatch_task = tokio::spawn(dispatcher.run(event_rx));

    {
        let handle = Arc::clone(&session.handle);
        let reporter = fault_reporter.clone();
        tokio::spawn(async move {
            info!("initializing WhatsApp client");
            if let Err(e) = handle.initialize().await {
                error!("initial client start failed: {e}");
                reporter.report("initialize", e.to_string());
            }
        });
    }

    // --- Background tasks ---
    let monitor = session.health_monitor(&cfg);
    tokio::spawn(async move { monitor.run().await });

    let reaper = session.reaper();
    tokio::spawn(async move { reaper.run().await });

    tokio::spawn(async move { backup.run().await });

    let memory = MemoryMonitor::new(cfg.memory_limit_mb, fault_reporter.clone());
    tokio::spawn(async move { memory.run().await });

    let supervisor = FaultSupervisor::new(fault_rx, Arc::clone(&session.recovery), alerter);
    tokio::spawn(async move { supervisor.run().await });

    // --- HTTP API ---
    let latency = Arc::new(LatencyStats::new());
    let gate = Arc::new(session.send_gate(Arc::clone(&latency), &cfg));
    let app = router(ApiState {
        session: Arc::clone(&session),
        gate,
        latency,
        access_token: Arc::from(cfg.access_token.as_str()),
    });

    let bind_addr = format!("0.0.0.0:{}", cfg.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // --- Shutdown ---
    dispatch_task.abort();
    let grace = Duration::from_secs(SHUTDOWN_GRACE_SECS);
    if tokio::time::timeout(grace, session.handle.destroy()).await.is_err() {
        warn!("client destroy did not finish within {SHUTDOWN_GRACE_SECS}s, exiting anyway");
    }
    bridge_task.abort();
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for SIGINT: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => warn!("received SIGINT"),
        _ = terminate => warn!("received SIGTERM"),
    }
}

// ============================================================================
// REST SERVER
// ============================================================================
// Process-level lifecycle of the REST front end:
// - bootstrap the storage before accepting connections
// - serve the axum router on the configured address
// - compact old delete tombstones in the background
// - stop on SIGTERM/SIGINT or an explicit shutdown, draining in-flight
//   requests for at most the configured grace period, then sync storage
// ============================================================================

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::api::{create_router, AppState};
use crate::config::EngineConfig;
use crate::constants::ENGINE_VERSION;
use crate::context::StatsContext;
use crate::error::{ConfigError, EngineError, EngineResult};

/// The REST server and its shutdown handle.
pub struct StatsServer {
    config: EngineConfig,
    ctx: Arc<StatsContext>,
    /// Shutdown signal
    shutdown: Arc<Notify>,
    running: AtomicBool,
}

impl StatsServer {
    pub fn new(config: EngineConfig) -> Self {
        let ctx = Arc::new(StatsContext::new(&config));
        Self::with_context(config, ctx)
    }

    /// Server over an existing context; `config` still supplies the
    /// listen address, base path and grace period.
    pub fn with_context(config: EngineConfig, ctx: Arc<StatsContext>) -> Self {
        Self {
            config,
            ctx,
            shutdown: Arc::new(Notify::new()),
            running: AtomicBool::new(false),
        }
    }

    pub fn context(&self) -> &Arc<StatsContext> {
        &self.ctx
    }

    pub fn is_running(&self) -> bool {
        self.running.load(AtomicOrdering::Acquire)
    }

    pub fn router(&self) -> Router {
        create_router(AppState::new(self.ctx.clone()), &self.config.server.base_path)
    }

    /// Ask a running server to stop. A request made before the server
    /// starts is kept and stops it as soon as it does.
    pub fn shutdown(&self) {
        info!(target: "sdnstats::server", "Shutdown requested");
        self.shutdown.notify_one();
    }

    /// Bind the configured address and serve until shut down.
    pub async fn run(&self) -> EngineResult<()> {
        let addr: SocketAddr = self.config.server.listen_address.parse().map_err(|_| {
            ConfigError::invalid_value(
                "server.listen_address",
                format!("'{}' is not a socket address", self.config.server.listen_address),
            )
        })?;
        let listener = TcpListener::bind(addr).await?;
        self.run_on(listener).await
    }

    /// Serve on an already bound listener until shut down.
    pub async fn run_on(&self, listener: TcpListener) -> EngineResult<()> {
        self.bootstrap().await?;

        let local_addr = listener.local_addr()?;
        info!(
            target: "sdnstats::server",
            version = ENGINE_VERSION,
            address = %local_addr,
            base_path = %self.config.server.base_path,
            controller_id = %self.ctx.controller_id(),
            "REST server listening"
        );

        let signals = tokio::spawn(forward_signals(self.shutdown.clone()));
        let compaction = tokio::spawn(compact_periodically(
            self.ctx.clone(),
            self.config.storage.compact_interval,
        ));
        self.running.store(true, AtomicOrdering::Release);

        let draining = Arc::new(Notify::new());
        let shutdown = self.shutdown.clone();
        let drain_started = draining.clone();
        let server = axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                shutdown.notified().await;
                drain_started.notify_one();
            })
            .into_future();
        tokio::pin!(server);

        let grace = self.config.server.shutdown_timeout;
        let result = tokio::select! {
            result = &mut server => result,
            _ = draining.notified() => {
                info!(target: "sdnstats::server", grace = ?grace, "Draining in-flight requests");
                let started = Instant::now();
                match tokio::time::timeout(grace, &mut server).await {
                    Ok(result) => {
                        info!(
                            target: "sdnstats::server",
                            duration_ms = started.elapsed().as_millis() as u64,
                            "Server shutdown complete"
                        );
                        result
                    }
                    Err(_) => {
                        warn!(target: "sdnstats::server", grace = ?grace, "Grace period elapsed, dropping open connections");
                        Ok(())
                    }
                }
            }
        };

        signals.abort();
        compaction.abort();
        self.running.store(false, AtomicOrdering::Release);

        let ctx = self.ctx.clone();
        match tokio::task::spawn_blocking(move || ctx.sync()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(target: "sdnstats::server", error = %e, "Failed to sync storage on shutdown"),
            Err(e) => warn!(target: "sdnstats::server", error = %e, "Storage sync task failed"),
        }

        result.map_err(EngineError::from).inspect_err(|e| {
            error!(
                target: "sdnstats::server",
                category = e.category(),
                recoverable = e.is_recoverable(),
                error = %e,
                "Server stopped with an error"
            );
        })
    }

    async fn bootstrap(&self) -> EngineResult<()> {
        let ctx = self.ctx.clone();
        tokio::task::spawn_blocking(move || ctx.connection().map(|_| ()))
            .await
            .map_err(|e| EngineError::Internal(format!("storage bootstrap task failed: {}", e)))??;
        Ok(())
    }
}

async fn compact_periodically(ctx: Arc<StatsContext>, every: Duration) {
    if every.is_zero() {
        return;
    }
    let mut interval = tokio::time::interval(every);
    // The first tick completes immediately.
    interval.tick().await;
    loop {
        interval.tick().await;
        let ctx = ctx.clone();
        match tokio::task::spawn_blocking(move || ctx.compact()).await {
            Ok(Ok(purged)) => debug!(target: "sdnstats::server", purged, "Background compaction done"),
            Ok(Err(e)) => error!(target: "sdnstats::server", error = %e, "Background compaction failed"),
            Err(e) => error!(target: "sdnstats::server", error = %e, "Background compaction task failed"),
        }
    }
}

async fn forward_signals(shutdown: Arc<Notify>) {
    match wait_for_signal().await {
        Ok(name) => {
            info!(target: "sdnstats::server", signal = name, "Received signal");
            shutdown.notify_one();
        }
        Err(e) => warn!(target: "sdnstats::server", error = %e, "Failed to install signal handlers"),
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    tokio::select! {
        _ = sigterm.recv() => Ok("SIGTERM"),
        _ = sigint.recv() => Ok("SIGINT"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("ctrl-c")
}

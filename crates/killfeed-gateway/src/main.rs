//! Killfeed gateway entry point.
//!
//! Loads configuration, connects to NATS (required) and `Dragonfly`
//! (optional, stats only), then runs the HTTP/`WebSocket` server alongside
//! the bus, liveness and stats tasks until Ctrl-C or SIGTERM.
//!
//! # Shutdown
//!
//! ```text
//! signal -> cancel token -> timers stop -> bus unsubscribed
//!        -> stats connection quit -> every connection closed with 1001
//!        -> socket tasks flush (bounded) -> server drains -> exit
//! ```

use std::sync::Arc;
use std::time::Duration;

use killfeed_gateway::bus::BusSubscriber;
use killfeed_gateway::config::{LogFormat, LoggingConfig};
use killfeed_gateway::stats::{DragonflyStatsSink, StatsReporter};
use killfeed_gateway::{
    AppState, Broadcaster, ConnectionRegistry, GatewayConfig, LivenessMonitor, bind_listener,
    close_connections, serve,
};
use killfeed_store::DragonflyPool;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Close code sent to every connection on shutdown (going away).
const SHUTDOWN_CLOSE_CODE: u16 = 1001;

/// Close reason sent to every connection on shutdown.
const SHUTDOWN_REASON: &str = "server shutting down";

/// How long shutdown waits for sockets to write their close frames.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Application entry point.
///
/// # Errors
///
/// Returns an error if configuration is invalid, NATS is unreachable, the
/// listener cannot bind, or the server or bus stops unexpectedly.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = GatewayConfig::load()?;
    init_tracing(&config.logging);

    info!(
        host = config.server.host,
        port = config.server.port,
        nats_url = config.bus.nats_url,
        event_subject = config.bus.event_subject,
        direct_subject = config.bus.direct_subject,
        stats_enabled = config.stats.enabled,
        "killfeed-gateway starting"
    );

    let registry = Arc::new(ConnectionRegistry::new());
    let broadcaster = Broadcaster::new(Arc::clone(&registry));
    let shutdown = CancellationToken::new();

    // Fatal: without the bus there is nothing to deliver.
    let bus = BusSubscriber::connect(&config.bus).await?;
    let subscriptions = bus.subscribe().await?;
    let listener = bind_listener(&config.server.host, config.server.port).await?;

    let mut tasks = vec![tokio::spawn(
        LivenessMonitor::new(Arc::clone(&registry), config.liveness.settings())
            .run(shutdown.clone()),
    )];

    let mut stats_pool = None;
    if config.stats.enabled {
        match DragonflyPool::connect(&config.stats.dragonfly_url).await {
            Ok(pool) => {
                stats_pool = Some(pool.clone());
                let sink =
                    DragonflyStatsSink::new(pool, config.stats.key.clone(), config.stats.ttl_secs);
                let reporter =
                    StatsReporter::new(Arc::clone(&registry), sink, config.stats.interval());
                tasks.push(tokio::spawn(reporter.run(shutdown.clone())));
            }
            Err(e) => warn!(error = %e, "Dragonfly unavailable, connection stats disabled"),
        }
    }

    let mut bus_task = tokio::spawn(subscriptions.run(broadcaster, shutdown.clone()));
    let state = Arc::new(AppState::new(
        Arc::clone(&registry),
        config.server.outbound_queue_capacity,
    ));
    let mut server = tokio::spawn(serve(listener, Arc::clone(&state), shutdown.clone()));

    let mut bus_running = true;
    let mut server_result = None;
    tokio::select! {
        signal = wait_for_shutdown_signal() => match signal {
            Ok(name) => info!(signal = name, "shutdown signal received"),
            Err(e) => error!(error = %e, "failed to listen for shutdown signals"),
        },
        _ = &mut bus_task => {
            error!("bus subscriptions ended unexpectedly");
            bus_running = false;
        }
        result = &mut server => {
            error!("server stopped unexpectedly");
            server_result = Some(result);
        }
    }

    shutdown.cancel();
    for task in tasks {
        if let Err(e) = task.await {
            warn!(error = %e, "background task failed");
        }
    }
    if bus_running {
        if let Err(e) = bus_task.await {
            warn!(error = %e, "bus task failed");
        }
    }

    if let Some(pool) = stats_pool {
        if let Err(e) = pool.quit().await {
            warn!(error = %e, "failed to close Dragonfly connection");
        }
    }

    let closed =
        close_connections(&state, SHUTDOWN_CLOSE_CODE, SHUTDOWN_REASON, SHUTDOWN_GRACE).await;
    info!(closed, "connections closed");

    let server_result = match server_result {
        Some(result) => result,
        None => server.await,
    };
    server_result??;

    if !bus_running {
        return Err("bus subscriptions ended unexpectedly".into());
    }
    info!("killfeed-gateway stopped");
    Ok(())
}

/// Initialize structured logging.
///
/// `RUST_LOG` takes precedence over the configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

/// Wait for Ctrl-C, or SIGTERM on Unix.
async fn wait_for_shutdown_signal() -> Result<&'static str, std::io::Error> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.map(|()| "SIGINT"),
            _ = sigterm.recv() => Ok("SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.map(|()| "CTRL_C")
    }
}

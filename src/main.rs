use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use leadflow::cadence::CadenceScheduler;
use leadflow::channels::{ChannelKind, EmailChannel, OutboundChannel, SocialChannel};
use leadflow::config::ConfigHandle;
use leadflow::dispatch::{DispatchCoordinator, EmergencyStop};
use leadflow::http::{AppState, routes};
use leadflow::limits::{BreakerRegistry, RateLimiter};
use leadflow::signals::{DecaySweep, SignalProcessor};
use leadflow::store::{Database, LibSqlBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Initialize tracing; LEADFLOW_LOG_DIR switches on rolling file output.
    let _log_guard = match std::env::var("LEADFLOW_LOG_DIR") {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "leadflow.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
                )
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        Err(_) => {
            tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
                )
                .with_target(false)
                .init();
            None
        }
    };

    // ── Configuration ────────────────────────────────────────────────
    // A broken ruleset is fatal: fail closed rather than dispatch with
    // incomplete guards.
    let config_path =
        PathBuf::from(std::env::var("LEADFLOW_CONFIG").unwrap_or_else(|_| "leadflow.toml".into()));
    let config = Arc::new(ConfigHandle::load(&config_path).unwrap_or_else(|e| {
        eprintln!("Error: invalid configuration at {}: {e}", config_path.display());
        std::process::exit(1);
    }));
    let snapshot = config.snapshot().await;

    eprintln!("leadflow v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Config:   {}", config_path.display());
    eprintln!("   Database: {}", snapshot.database.path);
    eprintln!("   HTTP:     http://{}", snapshot.server.bind_address);

    // ── Database ─────────────────────────────────────────────────────
    let db_path = PathBuf::from(&snapshot.database.path);
    let store: Arc<dyn Database> = Arc::new(LibSqlBackend::new_local(&db_path).await?);

    // ── Outbound channels ────────────────────────────────────────────
    let mut channels: HashMap<ChannelKind, Arc<dyn OutboundChannel>> = HashMap::new();
    if let Some(email_config) = snapshot.channels.email.clone() {
        channels.insert(
            ChannelKind::Email,
            Arc::new(EmailChannel::new(email_config)?),
        );
    }
    if let Some(social_config) = snapshot.channels.social.clone() {
        channels.insert(
            ChannelKind::Social,
            Arc::new(SocialChannel::new(social_config)?),
        );
    }
    if channels.is_empty() {
        tracing::warn!("No outbound channels configured — webhook ingest only");
    }

    // ── Engine components ────────────────────────────────────────────
    let stop = EmergencyStop::new();
    let breakers = Arc::new(BreakerRegistry::new(Some(store.clone())));
    breakers.hydrate().await;
    let limiter = Arc::new(RateLimiter::new());
    let processor = Arc::new(SignalProcessor::new(
        store.clone(),
        snapshot.decay.clone(),
    ));

    let coordinator = Arc::new(DispatchCoordinator::new(
        config.clone(),
        store.clone(),
        channels,
        breakers.clone(),
        limiter,
        processor.clone(),
        stop.clone(),
    ));

    let scheduler = Arc::new(CadenceScheduler::new(
        store.clone(),
        coordinator,
        config.clone(),
    ));
    let sweep = Arc::new(DecaySweep::new(
        store.clone(),
        processor.clone(),
        Duration::from_secs(snapshot.dispatch.sweep_interval_secs),
    ));

    // ── Background loops ─────────────────────────────────────────────
    let scan_task = scheduler
        .clone()
        .spawn(Duration::from_secs(snapshot.dispatch.scan_interval_secs));
    let sweep_task = sweep.spawn();
    let reload_task = config.clone().spawn_reload_task(Duration::from_secs(30));

    // ── HTTP server ──────────────────────────────────────────────────
    let state = AppState {
        processor,
        breakers,
        stop,
        store,
    };
    let listener = tokio::net::TcpListener::bind(&snapshot.server.bind_address).await?;
    tracing::info!(address = %snapshot.server.bind_address, "HTTP server listening");

    axum::serve(listener, routes(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await?;

    scan_task.abort();
    sweep_task.abort();
    reload_task.abort();
    Ok(())
}

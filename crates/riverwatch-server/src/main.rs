use anyhow::Result;
use chrono::Utc;
use riverwatch_engine::adapters::dhm::DhmAdapter;
use riverwatch_engine::adapters::glofas::GlofasAdapter;
use riverwatch_engine::coordinator::PhaseActivationCoordinator;
use riverwatch_engine::engine::TriggerEngine;
use riverwatch_engine::events::EventBus;
use riverwatch_engine::locks::TriggerLocks;
use riverwatch_engine::scheduler::{IntervalJobQueue, TickDispatcher, TickPayload};
use riverwatch_engine::AdapterRegistry;
use riverwatch_storage::TriggerStore;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio::time::Duration;
use tracing_subscriber::EnvFilter;

use riverwatch_server::app;
use riverwatch_server::config::{self, ServerConfig};
use riverwatch_server::phase_seed;
use riverwatch_server::state::AppState;

#[allow(clippy::print_stderr)]
fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  riverwatch-server [config.toml]                        Start the server");
    eprintln!("  riverwatch-server init-phases <config.toml> <seed.json>  Initialize phases and triggers from seed file");
}

#[tokio::main]
async fn main() -> Result<()> {
    riverwatch_common::id::init(1, 1);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("riverwatch=info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        Some("init-phases") => {
            let config_path = args.get(2).ok_or_else(|| {
                print_usage();
                anyhow::anyhow!("init-phases requires <config.toml> and <seed.json> arguments")
            })?;
            let seed_path = args.get(3).ok_or_else(|| {
                print_usage();
                anyhow::anyhow!("init-phases requires <seed.json> argument")
            })?;
            run_init_phases(config_path, seed_path).await
        }
        Some("--help" | "-h") => {
            print_usage();
            Ok(())
        }
        _ => {
            let config_path = args
                .get(1)
                .map(|s| s.as_str())
                .unwrap_or("config/server.toml");
            run_server(config_path).await
        }
    }
}

async fn open_store(config: &ServerConfig) -> Result<Arc<TriggerStore>> {
    if config.database.url.is_none() {
        std::fs::create_dir_all(&config.database.data_dir)?;
    }
    let store = TriggerStore::new(&config.database.connection_url()).await?;
    Ok(Arc::new(store))
}

async fn run_init_phases(config_path: &str, seed_path: &str) -> Result<()> {
    let config = config::ServerConfig::load(config_path)?;
    let store = open_store(&config).await?;
    phase_seed::init_from_seed_file(&store, seed_path).await
}

async fn run_server(config_path: &str) -> Result<()> {
    let config = config::ServerConfig::load(config_path)?;

    tracing::info!(
        http_port = config.http_port,
        db = %config.database.redacted_url(),
        check_interval_secs = config.engine.check_interval_secs,
        "riverwatch-server starting"
    );

    let store = open_store(&config).await?;
    let events = Arc::new(EventBus::new(config.engine.event_bus_capacity));
    let locks = Arc::new(TriggerLocks::new());
    let coordinator = Arc::new(PhaseActivationCoordinator::new(
        store.clone(),
        events.clone(),
        locks.clone(),
    ));

    let mut registry = AdapterRegistry::new();
    registry.register(Arc::new(DhmAdapter::new(store.clone())));
    registry.register(Arc::new(GlofasAdapter::new(store.clone())));
    let registry = Arc::new(registry);

    let dispatcher = Arc::new(TickDispatcher::new(
        store.clone(),
        coordinator.clone(),
        registry.clone(),
        locks.clone(),
        events.clone(),
    ));
    let queue = Arc::new(IntervalJobQueue::new(dispatcher.clone()));
    let check_interval = Duration::from_secs(config.engine.check_interval_secs);

    let engine = Arc::new(TriggerEngine::new(
        store.clone(),
        coordinator.clone(),
        registry,
        queue.clone(),
        locks,
        events.clone(),
        check_interval,
    ));

    restore_scheduled_checks(&store, &queue, check_interval).await?;

    let state = AppState {
        store: store.clone(),
        engine,
        coordinator,
        start_time: Utc::now(),
        config: Arc::new(config.clone()),
    };

    let http_addr: SocketAddr = format!("0.0.0.0:{}", config.http_port).parse()?;
    let app = app::build_http_app(state);
    let listener = tokio::net::TcpListener::bind(http_addr).await?;

    tracing::info!(http = %http_addr, active_jobs = queue.active_jobs(), "Server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            signal::ctrl_c().await.ok();
            tracing::info!("Shutting down gracefully");
        })
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Startup recovery: re-register a recurring check for every persisted
/// trigger that is live, untriggered, and carries a repeat key.
async fn restore_scheduled_checks(
    store: &Arc<TriggerStore>,
    queue: &Arc<IntervalJobQueue>,
    check_interval: Duration,
) -> Result<()> {
    let triggers = store.list_schedulable_triggers().await?;
    let mut restored = 0u32;
    for trigger in triggers {
        let Some(repeat_key) = trigger.repeat_key.clone() else {
            continue;
        };
        let data_source = match trigger.data_source.parse() {
            Ok(ds) => ds,
            Err(e) => {
                tracing::error!(trigger_id = %trigger.id, error = %e, "Unschedulable data source");
                continue;
            }
        };
        let Some(phase) = store.get_phase_by_id(&trigger.phase_id).await? else {
            tracing::warn!(
                trigger_id = %trigger.id,
                phase_id = %trigger.phase_id,
                "Trigger references a missing phase, not scheduling"
            );
            continue;
        };

        queue.register(
            repeat_key,
            TickPayload {
                trigger_id: trigger.id.clone(),
                phase_id: trigger.phase_id.clone(),
                river_basin: phase.river_basin,
                data_source,
            },
            check_interval,
        );
        restored += 1;
    }
    if restored > 0 {
        tracing::info!(restored, "Restored recurring checks");
    }
    Ok(())
}

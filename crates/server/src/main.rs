//! Sales agent server entry point

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use sales_agent_agent::{EngineConfig, SalesEngine};
use sales_agent_config::{load_settings, DomainConfig, Settings};
use sales_agent_persistence::PersistenceLayer;
use sales_agent_server::{build_backend, create_router, init_metrics, AppState};
use sales_agent_tools::{build_gateway, OutboxWorker, StubCalendar};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Priority: env vars > config/{env}.yaml > config/default.yaml > defaults
    let env = std::env::var("SALES_AGENT_ENV").ok();
    let settings = match load_settings(env.as_deref()) {
        Ok(settings) => {
            // Tracing not yet initialized, use eprintln for early logging
            eprintln!(
                "Loaded configuration (env: {})",
                env.as_deref().unwrap_or("default")
            );
            settings
        }
        Err(e) => {
            eprintln!("Warning: failed to load config: {}. Using defaults.", e);
            Settings::default()
        }
    };

    init_tracing(&settings);

    tracing::info!("Starting sales agent v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        environment = ?settings.environment,
        config_env = env.as_deref().unwrap_or("default"),
        "Configuration loaded"
    );

    if settings.observability.metrics_enabled {
        let _ = init_metrics();
        tracing::info!("Prometheus metrics at /metrics");
    }

    let domain = match DomainConfig::load(&settings.domain_config_path) {
        Ok(domain) => {
            tracing::info!(
                path = %settings.domain_config_path,
                developments = domain.developments.len(),
                banks = domain.banks.len(),
                "Loaded business catalog"
            );
            domain
        }
        Err(e) => {
            tracing::warn!(
                path = %settings.domain_config_path,
                error = %e,
                "Failed to load business catalog, using built-in defaults"
            );
            DomainConfig::default()
        }
    };

    let stores = if settings.persistence.enabled {
        tracing::info!(
            hosts = ?settings.persistence.scylla_hosts,
            "Connecting to ScyllaDB"
        );
        match init_scylla(&settings).await {
            Ok(stores) => {
                tracing::info!(
                    keyspace = %settings.persistence.keyspace,
                    "ScyllaDB persistence ready"
                );
                stores
            }
            Err(e) => {
                tracing::error!("Failed to initialize ScyllaDB: {}. Falling back to in-memory.", e);
                sales_agent_persistence::init_in_memory()
            }
        }
    } else {
        tracing::info!("Persistence disabled, using in-memory stores");
        sales_agent_persistence::init_in_memory()
    };

    let backend = build_backend(&settings.llm);
    tracing::info!(
        classifier = if backend.is_some() { "llm" } else { "keywords" },
        model = %settings.llm.model,
        "Intent classifier ready"
    );

    let engine = SalesEngine::new(
        stores.clone(),
        domain,
        EngineConfig::from_settings(&settings),
        backend,
    );

    let gateway = build_gateway(&settings.whatsapp)?;
    let calendar = Arc::new(StubCalendar::new());
    let worker = Arc::new(OutboxWorker::new(
        stores.outbox.clone(),
        stores.appointments.clone(),
        gateway,
        calendar,
        settings.agent.outbox.clone(),
    ));
    let worker_shutdown = worker.start();
    tracing::info!("Outbox worker started");

    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port).parse()?;
    let state = AppState::new(settings, stores, engine, env);
    let app = create_router(state);

    tracing::info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // One final outbox drain so queued sends go out before the process
    // exits. The worker drops its receiver when it finishes.
    let _ = worker_shutdown.send(true);
    if tokio::time::timeout(Duration::from_secs(10), worker_shutdown.closed())
        .await
        .is_err()
    {
        tracing::warn!("Outbox worker did not finish draining within 10s");
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}

fn init_tracing(settings: &Settings) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &settings.observability.log_level;
        format!("sales_agent={},tower_http=info", level).into()
    });

    let subscriber = tracing_subscriber::registry().with(env_filter);
    let fmt_layer = if settings.observability.log_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };
    subscriber.with(fmt_layer).init();
}

async fn init_scylla(
    settings: &Settings,
) -> Result<PersistenceLayer, sales_agent_persistence::PersistenceError> {
    let config = sales_agent_persistence::ScyllaConfig {
        hosts: settings.persistence.scylla_hosts.clone(),
        keyspace: settings.persistence.keyspace.clone(),
        replication_factor: settings.persistence.replication_factor,
    };
    sales_agent_persistence::init(config).await
}

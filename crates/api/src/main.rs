//! Payment saga API server entry point.

use std::sync::Arc;

use message_log::{
    CommandLog, InMemoryMessageLog, InMemoryOffsetStore, OffsetStore, PostgresOffsetStore,
    ResponseLog,
};
use payment_api::config::{Config, LogFormat};
use saga::{CatalogLookup, HttpCatalogClient, SagaConfig, SimulatedDownstream};
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM), then tells running
/// sagas to stop.
async fn shutdown_signal(stop: watch::Sender<bool>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }

    // In-flight sagas compensate before their requests complete.
    let _ = stop.send(true);
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

struct MessageLogs {
    commands: Arc<dyn CommandLog>,
    responses: Arc<dyn ResponseLog>,
    /// Simulated wallet and inventory, present when running on the
    /// in-memory log.
    simulated: Option<(SimulatedDownstream, JoinHandle<()>)>,
}

#[cfg(feature = "kafka")]
fn kafka_logs(brokers: &str, config: &Config) -> MessageLogs {
    let log = Arc::new(
        message_log::KafkaMessageLog::builder()
            .brokers(brokers)
            .client_id(config.coordinator_id.as_str())
            .timeout(config.publish_timeout)
            .build()
            .expect("failed to create Kafka message log"),
    );
    MessageLogs {
        commands: log.clone(),
        responses: log,
        simulated: None,
    }
}

#[cfg(not(feature = "kafka"))]
fn kafka_logs(brokers: &str, config: &Config) -> MessageLogs {
    tracing::warn!(
        %brokers,
        "built without the kafka feature; falling back to the in-memory log"
    );
    in_memory_logs(&config.saga_config())
}

fn in_memory_logs(saga_config: &SagaConfig) -> MessageLogs {
    let log = InMemoryMessageLog::new();
    let downstream = SimulatedDownstream::new(log.clone(), saga_config.clone());
    let consumer = downstream.spawn();
    MessageLogs {
        commands: Arc::new(log.clone()),
        responses: Arc::new(log),
        simulated: Some((downstream, consumer)),
    }
}

async fn offset_store(config: &Config) -> Arc<dyn OffsetStore> {
    let Some(url) = config.database_url.as_deref() else {
        tracing::warn!("DATABASE_URL not set; consumer offsets are kept in memory");
        return Arc::new(InMemoryOffsetStore::new());
    };

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(url)
        .await
        .expect("failed to connect to PostgreSQL");
    let store = PostgresOffsetStore::new(pool);
    store
        .run_migrations()
        .await
        .expect("failed to run migrations");
    tracing::info!("consumer offsets persisted in PostgreSQL");
    Arc::new(store)
}

fn catalog(config: &Config) -> Arc<dyn CatalogLookup> {
    match config.catalog_url.as_deref() {
        Some(url) => {
            tracing::info!(%url, "using catalog service");
            Arc::new(
                HttpCatalogClient::new(url, config.catalog_timeout)
                    .expect("failed to create catalog client"),
            )
        }
        None => {
            tracing::warn!("CATALOG_URL not set; using the demo catalog");
            Arc::new(payment_api::demo_catalog())
        }
    }
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Wire the coordinator
    let saga_config = config.saga_config();
    let logs = match config.kafka_brokers.as_deref() {
        Some(brokers) => kafka_logs(brokers, &config),
        None => in_memory_logs(&saga_config),
    };
    if let Some((downstream, _)) = &logs.simulated {
        payment_api::seed_demo_player(downstream).await;
    }

    let coordinator = payment_api::build_coordinator(
        saga_config,
        catalog(&config),
        logs.commands,
        logs.responses,
        offset_store(&config).await,
    );

    let (stop, stopping) = watch::channel(false);
    let state = Arc::new(payment_api::AppState::new(coordinator, stopping));

    // 4. Build the application
    let app = payment_api::create_app(state, metrics_handle);

    // 5. Start server
    let addr = config.addr();
    tracing::info!(%addr, "starting payment API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(stop))
        .await
        .expect("server error");

    if let Some((_, consumer)) = logs.simulated {
        consumer.abort();
    }
    tracing::info!("server shut down gracefully");
}

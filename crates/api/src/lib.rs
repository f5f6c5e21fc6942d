//! HTTP entry points for the payment saga coordinator.
//!
//! Exposes `POST /payment/buy` and `POST /payment/sell`, each running one
//! saga to completion, plus Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use common::PlayerId;
use message_log::{CommandLog, OffsetStore, ResponseLog};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{
    CancelSignal, CatalogItem, CatalogLookup, InMemoryCatalog, LogCommandPublisher,
    LogResponseCorrelator, SagaConfig, SagaCoordinator, SimulatedDownstream,
};
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Coordinator wired to whichever catalog, log and offset store the
/// process was configured with.
pub type Coordinator = SagaCoordinator<
    Arc<dyn CatalogLookup>,
    LogCommandPublisher<Arc<dyn CommandLog>>,
    LogResponseCorrelator<Arc<dyn ResponseLog>, Arc<dyn OffsetStore>>,
>;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    shutdown: watch::Receiver<bool>,
}

impl AppState {
    /// Creates the state; sagas still running when `shutdown` flips to
    /// true are cancelled and compensated.
    pub fn new(coordinator: Coordinator, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            coordinator: Arc::new(coordinator),
            shutdown,
        }
    }

    /// A cancellation signal that fires on process shutdown.
    pub fn cancel_signal(&self) -> CancelSignal {
        let mut shutdown = self.shutdown.clone();
        Box::pin(async move {
            if shutdown.wait_for(|stopping| *stopping).await.is_err() {
                // Sender gone without a shutdown: never cancel.
                std::future::pending::<()>().await;
            }
        })
    }
}

/// Assembles a coordinator from its collaborators.
pub fn build_coordinator(
    config: SagaConfig,
    catalog: Arc<dyn CatalogLookup>,
    command_log: Arc<dyn CommandLog>,
    response_log: Arc<dyn ResponseLog>,
    offsets: Arc<dyn OffsetStore>,
) -> Coordinator {
    let correlator = LogResponseCorrelator::new(response_log, offsets, config.offset_key());
    SagaCoordinator::new(
        config,
        catalog,
        LogCommandPublisher::new(command_log),
        correlator,
    )
}

/// Catalog used when no catalog service is configured.
pub fn demo_catalog() -> InMemoryCatalog {
    InMemoryCatalog::with_items([
        CatalogItem::new("sword", "Iron Sword", 10.0),
        CatalogItem::new("shield", "Oak Shield", 5.0),
        CatalogItem::new("potion", "Health Potion", 1.5),
    ])
}

/// Gives the demo player a starting balance on the simulated wallet.
pub async fn seed_demo_player(downstream: &SimulatedDownstream) -> PlayerId {
    let player = PlayerId::new("demo");
    downstream.deposit(&player, 100.0).await;
    tracing::info!(player_id = %player, balance = 100.0, "seeded demo player");
    player
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/payment/buy", post(routes::payment::buy))
        .route("/payment/sell", post(routes::payment::sell))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

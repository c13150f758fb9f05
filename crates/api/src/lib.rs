//! HTTP API server with observability for the settlement system.
//!
//! Provides REST endpoints for deal settlement, dispute management and
//! provider webhook ingestion, with structured logging (tracing) and
//! Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use ledger::Ledger;
use metrics_exporter_prometheus::PrometheusHandle;
use orchestrator::{
    DealOrchestrator, DisputeManager, InMemoryESignService, InMemoryEspClient,
    InMemoryFiscalReceipts, InMemoryNotifier, SettlementConfig, SettlementEventHandler,
    SettlementSweeper,
};
use projections::{DealBoardView, Projection, ProjectionProcessor};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use webhook::{InMemoryBankEventStore, InMemoryDlqStore, SignatureVerifier, WebhookIngestor};

use routes::deals::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<L: Ledger + Clone + 'static>(
    state: Arc<AppState<L>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/deals", post(routes::deals::create::<L>))
        .route("/deals", get(routes::deals::list::<L>))
        .route("/deals/{id}", get(routes::deals::get::<L>))
        .route("/deals/{id}/events", get(routes::deals::events::<L>))
        .route("/deals/{id}/submit", post(routes::deals::submit::<L>))
        .route("/deals/{id}/sign", post(routes::deals::sign::<L>))
        .route("/deals/{id}/invoice", post(routes::deals::invoice::<L>))
        .route("/deals/{id}/link", post(routes::deals::regenerate_link::<L>))
        .route(
            "/deals/{id}/retry-invoice",
            post(routes::deals::retry_invoice::<L>),
        )
        .route(
            "/deals/{id}/confirmation",
            post(routes::deals::request_confirmation::<L>),
        )
        .route("/deals/{id}/act-signed", post(routes::deals::act_signed::<L>))
        .route("/deals/{id}/release", post(routes::deals::release::<L>))
        .route("/deals/{id}/cancel", post(routes::deals::cancel::<L>))
        .route("/deals/{id}/reopen", post(routes::deals::reopen::<L>))
        .route("/deals/{id}/disputes", post(routes::deals::open_dispute::<L>))
        .route(
            "/deals/{id}/disputes/escalate",
            post(routes::deals::escalate_dispute::<L>),
        )
        .route(
            "/deals/{id}/disputes/resolve",
            post(routes::deals::resolve_dispute::<L>),
        )
        .route(
            "/deals/{id}/disputes/cancel",
            post(routes::deals::cancel_dispute::<L>),
        )
        .route("/webhooks/esp", post(routes::webhooks::ingest::<L>))
        .route("/dlq", get(routes::webhooks::list_dlq::<L>))
        .route("/dlq/{id}/retry", post(routes::webhooks::retry_dlq::<L>))
        .route("/dlq/{id}/resolve", post(routes::webhooks::resolve_dlq::<L>))
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

/// Everything `create_default_state` wires up.
pub struct DefaultState<L: Ledger + Clone + 'static> {
    pub state: Arc<AppState<L>>,
    pub sweeper: Arc<
        SettlementSweeper<
            L,
            InMemoryEspClient,
            InMemoryESignService,
            InMemoryNotifier,
            InMemoryFiscalReceipts,
        >,
    >,
    pub esp: InMemoryEspClient,
    pub esign: InMemoryESignService,
}

/// Creates the default application state with in-memory collaborator
/// services.
pub fn create_default_state<L: Ledger + Clone + 'static>(
    ledger: L,
    settlement: SettlementConfig,
    webhook_secret: Option<String>,
) -> DefaultState<L> {
    let esp = InMemoryEspClient::new();
    let esign = InMemoryESignService::new();
    let notifier = InMemoryNotifier::new();
    let fiscal = InMemoryFiscalReceipts::new();

    let orchestrator = Arc::new(DealOrchestrator::new(
        ledger.clone(),
        esp.clone(),
        esign.clone(),
        notifier.clone(),
        fiscal.clone(),
        settlement,
    ));
    let disputes = Arc::new(DisputeManager::new(
        ledger.clone(),
        esp.clone(),
        notifier,
        &settlement,
    ));

    let verifier = SignatureVerifier::from_optional(webhook_secret);
    let handler = SettlementEventHandler::new(ledger.clone(), settlement);
    let ingestor = Arc::new(WebhookIngestor::new(
        verifier,
        InMemoryBankEventStore::new(),
        InMemoryDlqStore::new(),
        handler,
    ));

    let deal_board = Arc::new(DealBoardView::new());
    let mut processor = ProjectionProcessor::new(ledger.clone());
    processor.register(Box::new(deal_board.as_ref().clone()) as Box<dyn Projection>);
    let processor = Arc::new(processor);

    let sweeper = Arc::new(SettlementSweeper::new(
        ledger.clone(),
        orchestrator.clone(),
        disputes.clone(),
    ));

    let state = Arc::new(AppState {
        orchestrator,
        disputes,
        ingestor,
        deal_board,
        projection_processor: processor,
        ledger,
    });

    DefaultState {
        state,
        sweeper,
        esp,
        esign,
    }
}

//! API server entry point.

use ledger::InMemoryLedger;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
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
}

#[tokio::main]
async fn main() {
    let config = api::config::Config::from_env();

    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if config.webhook_secret.is_none() {
        tracing::warn!("WEBHOOK_SECRET unset, all provider deliveries will be rejected");
    }

    // 2. Install Prometheus metrics recorder
    let prometheus_builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    let metrics_handle = prometheus_builder
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Create the ledger and application state
    let ledger = InMemoryLedger::new();
    let default_state = api::create_default_state(
        ledger,
        config.settlement(),
        config.webhook_secret.clone(),
    );

    // 4. Catch projections up on any existing facts
    default_state
        .state
        .projection_processor
        .run_catch_up()
        .await
        .expect("catch-up failed");

    // 5. Start the settlement sweep
    let sweeper = default_state.sweeper.clone();
    let sweep_interval = std::time::Duration::from_secs(config.sweep_interval_secs);
    let sweep_task = tokio::spawn(async move {
        sweeper.run(sweep_interval).await;
    });

    // 6. Build the application
    let app = api::create_app(default_state.state, metrics_handle);

    // 7. Start server
    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    sweep_task.abort();
    tracing::info!("server shut down gracefully");
}

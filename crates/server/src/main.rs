//! Translation dataplane server entry point

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use lingo_config::{load_settings, Settings};
use lingo_pipeline::PipelineBackends;
use lingo_server::{create_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Env vars (LINGO_*) > explicit file > config/lingo.toml > defaults
    let config_path = std::env::var("LINGO_CONFIG").ok();
    let config = match load_settings(config_path.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            // Tracing not yet initialized, use eprintln for early logging
            eprintln!("Warning: failed to load config: {e}. Using defaults.");
            Settings::default()
        },
    };

    init_tracing(&config);
    tracing::info!("Starting lingo server v{}", env!("CARGO_PKG_VERSION"));

    // Model backends are shared read-only across sessions. Without loaded
    // models the noop set keeps the dataplane runnable end-to-end.
    let backends = PipelineBackends::noop();
    tracing::info!(
        recognizer = backends.recognizer.model_name(),
        translator = backends.translator.model_id(),
        engines = ?backends.engines.engine_names(),
        "Backends initialized"
    );

    let mut state = AppState::new(config.clone(), backends);

    if config.metrics.prometheus {
        match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => {
                tracing::info!("Prometheus metrics exposed at /metrics");
                state = state.with_prometheus(handle);
            },
            Err(e) => {
                tracing::warn!("Failed to install Prometheus recorder: {e}");
            },
        }
    }

    state
        .sessions
        .start_sweeper(Duration::from_millis(config.session.idle_timeout_ms));

    let router = create_router(state);
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!(%addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

fn init_tracing(config: &Settings) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,lingo=debug"));

    let fmt_layer = if config.server.log_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut signal) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            signal.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}

//! Relay bootstrap: tracing, environment configuration, bind, serve.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use intercept_proxy::net::Listener;
use intercept_proxy::{ProxyServer, Relay, RelayConfig, Shutdown};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing subscriber
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "intercept_proxy=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("intercept-proxy v0.1.0 starting");

    let config = RelayConfig::from_env()?;

    tracing::info!(
        port = config.listener.port,
        manager_path = %config.manager.path,
        decision_timeout_ms = config.manager.decision_timeout_ms,
        connect_mode = ?config.connect_mode,
        "Configuration loaded"
    );

    if let Some(metrics_address) = &config.observability.metrics_address {
        match metrics_address.parse() {
            Ok(addr) => intercept_proxy::observability::metrics::init_metrics(addr),
            Err(err) => tracing::error!(
                metrics_address = %metrics_address,
                error = %err,
                "Failed to parse metrics address"
            ),
        }
    }

    // Bind before building shared state so a busy port fails fast.
    let listener = Listener::bind(&config.listener).await?;

    let relay = Relay::new(config);
    let shutdown = Shutdown::new();
    let accept_shutdown = shutdown.subscribe();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
            shutdown.trigger();
        }
    });

    ProxyServer::new(relay).run(listener, accept_shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

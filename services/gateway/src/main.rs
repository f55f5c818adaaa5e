//! Postbox gateway HTTP service entry point.
//!
//! # Purpose
//! Wires configuration, the queue hub, and HTTP routers, then starts the API
//! server and the metrics listener.
//!
//! # Notes
//! The `build_state` helper keeps wiring testable and minimizes main setup logic.
use anyhow::Result;
use gateway::app::{AppState, build_router};
use gateway::config::GatewayConfig;
use gateway::observability;
use postbox_queue::{PathResolver, QueueConfig, QueueHub, QueueStore};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    let config = GatewayConfig::from_env_or_yaml()?;
    run_with_shutdown(config, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
}

async fn run_with_shutdown<F>(config: GatewayConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let metrics_handle = observability::init_observability();
    let metrics_task = tokio::spawn(observability::serve_metrics(
        metrics_handle,
        config.metrics_bind,
    ));

    let state = build_state(&config);
    let app = build_router(&config.route_prefix, state);

    let addr = config.bind_addr;
    tracing::info!(
        %addr,
        root = %config.storage_root.display(),
        prefix = %config.route_prefix,
        "gateway listening"
    );
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tokio::pin!(shutdown);
    tokio::select! {
        result = axum::serve(listener, app.into_make_service()) => {
            result?;
        }
        _ = &mut shutdown => {}
    }

    metrics_task.abort();
    let _ = metrics_task.await;
    Ok(())
}

fn build_state(config: &GatewayConfig) -> AppState {
    let store = QueueStore::new(PathResolver::new(&config.storage_root));
    let hub = QueueHub::new(
        store,
        QueueConfig {
            max_queue_len: config.max_queue_len,
            max_message_bytes: config.max_message_bytes,
        },
    );
    AppState {
        hub: Arc::new(hub),
        connection_timeout: Duration::from_millis(config.connection_timeout_ms),
    }
}

use std::panic;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::constants::STOP_GRACE;
use crate::core::classifier::ResultClassifier;
use crate::core::service::ExecutionService;
use crate::http::services::{AppState, router};
use crate::native::registry::ProcessRegistry;
use crate::native::runner::NativeRunner;

mod config;
mod constants;
mod core;
mod http;
mod native;
#[cfg(test)]
mod stubs;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    set_panic_hook();

    let config = Config::parse();
    config.validate()?;
    tracing::info!(?config, "configuration loaded");

    let registry = Arc::new(ProcessRegistry::new());
    let runner = NativeRunner::new(config.runner_config(), registry.clone());
    let service = ExecutionService::new(
        Arc::new(runner),
        ResultClassifier::new(config.interpreter()),
        &config.service_config(),
    );
    let app = router(AppState::new(Arc::new(service), registry.clone()));

    let listener = TcpListener::bind(config.listen_addr).await?;
    tracing::info!("HTTP server listening on {}", config.listen_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if !registry.is_empty() {
        let stopped = registry.stop_all();
        tracing::warn!(stopped, "stopping executions still running at shutdown");

        let deadline = tokio::time::Instant::now() + STOP_GRACE;
        while !registry.is_empty() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        registry.kill_all();
    }
    tracing::info!("server stopped");

    Ok(())
}

fn set_panic_hook() {
    panic::set_hook(Box::new(|panic_info| {
        tracing::error!(
            message = "panic occurred",
            panic = %panic_info
        );
    }));
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}

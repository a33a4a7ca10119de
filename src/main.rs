use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use workflow_router::config::Config;
use workflow_router::github::{AppAuthenticator, WorkflowClient};
use workflow_router::queue::DurableQueue;
use workflow_router::server::{build_router, AppState};
use workflow_router::types::InstallationId;
use workflow_router::worker::{run_workers, Processor};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "workflow_router=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run().await {
        error!(error = %e, "fatal");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("ROUTER_CONFIG").ok())
        .unwrap_or_else(|| "router.yml".to_string());
    let config = Config::load(&config_path)?;
    info!(path = %config_path, mappings = config.mappings.len(), "configuration loaded");

    let webhook_secret = config.github.webhook_secret()?;
    let private_key = config.github.private_key()?;
    let auth = AppAuthenticator::new(
        config.github.app_id,
        InstallationId::from(config.github.installation_id),
        &private_key,
    )?;
    let api = Arc::new(WorkflowClient::new(auth));

    let queue = Arc::new(DurableQueue::open(&config.queue.dir, config.queue_config())?);
    let processor = Arc::new(Processor::new(
        Arc::clone(&api),
        config.mappings.clone(),
        config.processor_config(),
    ));

    let cancel = CancellationToken::new();
    let workers = tokio::spawn(run_workers(
        Arc::clone(&queue),
        processor,
        config.pool_config(),
        cancel.clone(),
    ));

    let app = build_router(AppState::new(queue, webhook_secret));
    let listener = tokio::net::TcpListener::bind(config.server.bind_addr).await?;
    info!(addr = %config.server.bind_addr, "listening");

    // Serve until a shutdown signal, draining in-flight requests; then stop
    // the workers. Anything they leave unacked redelivers on next startup.
    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());
    if let Err(e) = server.await {
        error!(error = %e, "server exited with an error");
    }

    info!("stopping workers");
    cancel.cancel();
    workers.await?;
    info!("shut down cleanly");
    Ok(())
}

/// Completes on SIGINT or, on unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "cannot listen for ctrl-c");
            std::future::pending::<()>().await
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

//! Service Broker Operators
//!
//! Main entry point. Connects to the Kubernetes API server, then either runs
//! every operator and status poller or performs a single archive job run.

use std::sync::Arc;

use clap::Parser;
use kube::Client;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use service_broker_operator::{
    config::{Cli, Command, OperatorConfig},
    controllers::{Context, OperatorRunner, PollerRunner},
    director::HttpDirectorClient,
    jobs::{ArchiveMeteredEventsJob, FileArchiveStore},
    metrics,
    reconcilers::{
        BoshRestoreStatusPoller, BoshStaggeredDeploymentPoller, DefaultBackupOperator,
        DefaultRestoreOperator, VirtualHostBindOperator,
    },
    services::{HttpServiceFactory, StaticCatalog},
    store::{KubeResourceStore, ResourceStore},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = OperatorConfig::try_from(cli.operator)?;

    let client = Client::try_default().await?;
    info!(namespace = %config.namespace, "Connected to Kubernetes API server");
    let store: Arc<dyn ResourceStore> =
        Arc::new(KubeResourceStore::new(client, config.namespace.clone()));

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_operators(store, config).await,
        Command::ArchiveMeteredEvents => run_archive_job(store, config).await,
    }
}

async fn run_operators(store: Arc<dyn ResourceStore>, config: OperatorConfig) -> anyhow::Result<()> {
    info!("Starting service broker operators");

    let catalog = match &config.catalog_file {
        Some(path) => StaticCatalog::load(path)?,
        None => StaticCatalog::default(),
    };
    let services = HttpServiceFactory::new(config.service_endpoint.clone(), config.http_timeout)?;
    let director = HttpDirectorClient::new(config.director_url.clone(), config.http_timeout)?;
    let ctx = Context::new(
        store.clone(),
        Arc::new(catalog),
        Arc::new(services),
        Arc::new(director),
    );

    // Start metrics server
    let metrics_handle = tokio::spawn(metrics::serve(config.metrics_port));
    info!("Metrics server starting on port {}", config.metrics_port);

    let backup_operator =
        OperatorRunner::new(store.clone(), Arc::new(DefaultBackupOperator::new(ctx.clone())));
    let restore_operator =
        OperatorRunner::new(store.clone(), Arc::new(DefaultRestoreOperator::new(ctx.clone())));
    let bind_operator =
        OperatorRunner::new(store.clone(), Arc::new(VirtualHostBindOperator::new(ctx.clone())));
    let restore_poller = PollerRunner::new(
        store.clone(),
        Arc::new(BoshRestoreStatusPoller::new(
            ctx.clone(),
            config.restore_poll_interval,
        )),
    );
    let deployment_poller = PollerRunner::new(
        store.clone(),
        Arc::new(BoshStaggeredDeploymentPoller::new(
            ctx.clone(),
            config.deployment_poll_interval,
        )),
    );

    // Handle graceful shutdown
    tokio::select! {
        result = backup_operator.run() => {
            error!(result = ?result, "Backup operator exited unexpectedly");
        }
        result = restore_operator.run() => {
            error!(result = ?result, "Restore operator exited unexpectedly");
        }
        result = bind_operator.run() => {
            error!(result = ?result, "Bind operator exited unexpectedly");
        }
        result = restore_poller.run() => {
            error!(result = ?result, "Restore status poller exited unexpectedly");
        }
        result = deployment_poller.run() => {
            error!(result = ?result, "Deployment poller exited unexpectedly");
        }
        _ = metrics_handle => {
            error!("Metrics server exited unexpectedly");
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal, stopping operators");
        }
    }

    metrics::OPERATOR_HEALTH.set(0.0);
    info!("Service broker operators stopped");
    Ok(())
}

async fn run_archive_job(store: Arc<dyn ResourceStore>, config: OperatorConfig) -> anyhow::Result<()> {
    let archive = Arc::new(FileArchiveStore::new(config.archive_dir.clone()));
    let job = ArchiveMeteredEventsJob::new(store, archive, config.archive);
    let summary = job.run().await?;
    info!(
        found = summary.found,
        archived = summary.archived,
        "Archive run finished"
    );
    Ok(())
}

/// Initialize tracing subscriber
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,kube=warn,hyper=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for CTRL+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received CTRL+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}

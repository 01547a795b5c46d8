//! Kiln Orchestrator
//!
//! A continuous integration service that polls git repositories and runs the
//! pipeline found in each new commit inside containers.
//!
//! Architecture:
//! - Configuration: Load settings from environment or defaults
//! - Storage: SQLite persistence of repositories, builds and logs
//! - Engine: Scheduler, poller and runner loops connected by channels
//! - Services: Use cases behind the HTTP API
//! - API: axum routes for managing repositories and reading builds

mod api;
mod config;
mod db;
mod engine;
mod git;
mod pipeline;
mod podman;
mod service;
mod storage;
#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::engine::{Poller, Runner, Scheduler};
use crate::git::GitCloner;
use crate::pipeline::YamlParser;
use crate::podman::PodmanExecutor;
use crate::service::ServiceContext;
use crate::storage::{LogStore, SqliteStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kiln_orchestrator=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Kiln Orchestrator");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;
    info!(
        "Loaded configuration: bind_addr={}, database_url={}, runtime={}",
        config.bind_addr, config.database_url, config.container_runtime
    );

    if let Err(e) = podman::check_available(&config.container_runtime).await {
        warn!("{:#}; builds will fail until it is installed", e);
    }

    // Database
    let pool = db::create_pool(&config.database_url, config.db_max_connections)
        .await
        .context("Failed to create database pool")?;
    db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;

    let store = Arc::new(SqliteStore::new(pool));
    let removed = store
        .delete_orphaned_logs()
        .await
        .context("Failed to remove orphaned logs")?;
    if removed > 0 {
        info!("Removed {} orphaned log(s)", removed);
    }

    // Engine
    let shutdown = CancellationToken::new();
    let mut engine = JoinSet::new();

    let (runner, runner_tx) = Runner::new(
        Arc::new(PodmanExecutor::new(
            config.container_runtime.clone(),
            config.container_working_dir.clone(),
        )),
        store.clone(),
        store.clone(),
        config.max_parallel_builds,
    );
    let (poller, poller_handle) = Poller::new(
        Arc::new(GitCloner::new(config.repositories_dir.clone())),
        Arc::new(YamlParser),
        store.clone(),
        runner_tx,
        config.pipeline_filename.clone(),
    );
    let (scheduler, scheduler_handle) = Scheduler::new(Arc::new(poller_handle), store.clone());

    engine.spawn(runner.run(shutdown.clone()));
    engine.spawn(poller.run(shutdown.clone()));
    engine.spawn(scheduler.run(shutdown.clone()));

    // HTTP API
    let ctx = ServiceContext {
        repositories: store.clone(),
        builds: store.clone(),
        logs: store,
        scheduler: scheduler_handle,
        min_polling_interval: config.min_polling_interval,
    };
    let app = api::create_router(ctx);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;
    info!("Listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    // Stop the engine
    info!("Shutting down engine");
    shutdown.cancel();

    let drain = async {
        while let Some(result) = engine.join_next().await {
            if let Err(e) = result {
                warn!("Engine task failed: {}", e);
            }
        }
    };
    if tokio::time::timeout(config.shutdown_timeout, drain).await.is_err() {
        warn!(
            "Engine did not stop within {}, aborting",
            kiln_core::duration::format(config.shutdown_timeout)
        );
        engine.abort_all();
    }

    info!("Kiln Orchestrator stopped");
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

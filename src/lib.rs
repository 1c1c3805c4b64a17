//! Idea Pipeline - Investment Idea Generation Service
//!
//! Validates generation requests, drives them through a multi-step model
//! pipeline with compliance and risk checks, evaluates market alerts, and
//! delivers completion callbacks.

#[macro_use]
pub mod models;

pub mod access;
pub mod alerts;
pub mod api;
pub mod callback;
pub mod compliance;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod scheduler;
pub mod security;
pub mod state;
pub mod store;
pub mod validation;

use api::ApiServer;
use config::AppConfig;
use error::Result;
use pipeline::WorkerPool;
use scheduler::ExpirySweeper;
use state::AppState;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize logging, start every background task and serve until Ctrl-C
pub async fn run(config: AppConfig) -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "idea_pipeline=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Idea Pipeline v{}...", env!("CARGO_PKG_VERSION"));

    let state = Arc::new(AppState::new(config)?);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();

    if let Some(events) = state.take_callback_receiver() {
        tasks.push(state.dispatcher.clone().spawn(events, shutdown_rx.clone()));
    }

    let worker = &state.config.worker;
    tasks.extend(
        WorkerPool::new(state.pipeline.clone(), worker.workers, worker.poll_interval())
            .start(shutdown_rx.clone()),
    );
    tasks.push(ExpirySweeper::new(state.pipeline.clone(), worker.sweep_interval()).start(shutdown_rx));

    let mut server = ApiServer::new(state.clone());
    server.start().await?;
    tracing::info!("Application state initialized");

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }

    tracing::info!("Shutting down...");
    server.stop();
    let _ = shutdown_tx.send(true);
    for task in tasks {
        if let Err(e) = task.await {
            tracing::error!("Background task ended abnormally: {}", e);
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

//! # Interview Session Backend
//!
//! Real-time interview pipeline: a browser socket per interview drives a live
//! voice conversation with a remote conversational agent, and every finished
//! interview is scored by a retrying background analysis job.
//!
//! ## Application Architecture:
//! - **audio**: PCM frames, microphone capture and gapless playback scheduling
//! - **agent**: wire protocol, transport, session state machine, tool calls and the per-interview driver
//! - **analysis**: session store, analysis job, worker pool, recovery sweeps, profile enrichment
//! - **context**: passage search behind the agent's `retrieve_context` tool
//! - **websocket**: browser bridge at `/ws/interview/{session_id}`
//! - **handlers / health**: REST surface
//! - **config / state / error**: ambient plumbing

mod agent;
mod analysis;
mod audio;
mod config;
mod context;
mod error;
mod handlers;
mod health;
mod state;
mod websocket;

#[cfg(test)]
mod testing;

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::Result;
use crate::analysis::job::{AnalysisJob, AnalysisRules};
use crate::analysis::queue::{AnalysisQueue, RetryPolicy, WorkerPool};
use crate::analysis::recovery::RecoverySweeper;
use crate::analysis::scoring::HttpScoringEngine;
use crate::analysis::store::{InMemorySessionStore, SessionStore};
use crate::config::AppConfig;
use crate::state::AppState;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);
    if config.agent.api_key.is_none() {
        warn!("No agent API key configured; interviews will fail to connect");
    }

    let http = reqwest::Client::builder()
        .timeout(config.backend.request_timeout())
        .build()?;

    let store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
    let (queue, tasks) = AnalysisQueue::new(store.clone());
    let job = Arc::new(AnalysisJob::new(
        store.clone(),
        Arc::new(HttpScoringEngine::new(http.clone(), config.backend.scoring_url.clone())),
        AnalysisRules::from(&config.analysis),
    ));
    let workers = WorkerPool::start(
        config.analysis.workers,
        queue.clone(),
        tasks,
        job,
        RetryPolicy::from(&config.analysis),
    );

    let sweeper = Arc::new(RecoverySweeper::new(store.clone(), queue.clone(), &config.recovery));
    let periodic_sweep = (config.recovery.sweep_interval_secs > 0).then(|| {
        info!(interval_secs = config.recovery.sweep_interval_secs, "Periodic recovery sweep enabled");
        sweeper
            .clone()
            .spawn_periodic(Duration::from_secs(config.recovery.sweep_interval_secs))
    });

    let app_state = AppState::new(config.clone(), store, queue, sweeper, http);
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(Logger::default())
            .wrap(TracingLogger::default())
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/config", web::put().to(handlers::update_config))
                    .route("/tools/context", web::post().to(handlers::retrieve_context))
                    .configure(handlers::sessions::configure),
            )
            .route("/ws/interview/{session_id}", web::get().to(websocket::interview_websocket))
            .route("/health", web::get().to(health::health_check))
    })
    .disable_signals()
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        signal = shutdown_signal() => {
            if let Err(e) = signal {
                error!("Could not listen for shutdown signals: {}", e);
            }
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    if let Some(sweep) = periodic_sweep {
        sweep.abort();
    }
    workers.shutdown().await;

    info!("Server stopped gracefully");
    Ok(())
}

/// `RUST_LOG` wins; the default is debug for this crate and info for actix.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "interview_session_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Resolves on the first SIGTERM or SIGINT.
async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = sigint.recv() => info!("Received SIGINT"),
    }
    Ok(())
}

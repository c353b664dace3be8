//! HTTP server: webhook intake, JSON read endpoints and badges.

mod handlers;

use crate::analysis::{Aggregator, IngestOutcome};
use crate::config::Config;
use crate::error::Result;
use crate::github::GitHubClient;
use crate::models::IncomingReport;
use crate::notifier::Notifier;
use crate::store::Store;
use anyhow::Context;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Shared handles for request handlers and background ingestion.
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub aggregator: Aggregator,
    pub github: Arc<GitHubClient>,
    pub notifier: Option<Arc<Notifier>>,
}

impl AppState {
    pub fn new(store: Store, github: GitHubClient, notify: bool, public_url: &str) -> Self {
        let github = Arc::new(github);
        let notifier = (notify && github.has_token())
            .then(|| Arc::new(Notifier::new(Arc::clone(&github), store.clone(), public_url)));

        Self {
            aggregator: Aggregator::new(store.clone()),
            store,
            github,
            notifier,
        }
    }

    /// Build state from configuration, opening the database.
    pub fn from_config(config: &Config) -> Result<Self> {
        let store = Store::open(&config.database.path)?;
        let github = GitHubClient::new(&config.github)?;
        Ok(Self::new(
            store,
            github,
            config.notifier.enabled,
            &config.server.public_url,
        ))
    }
}

/// Resolve the repository, store the report and optionally post a status.
///
/// A failed lookup or write abandons the report; a failed notification is
/// only logged.
pub async fn process_report(state: &AppState, report: &IncomingReport) -> Result<IngestOutcome> {
    let meta = state.github.fetch_repository(&report.repository).await?;
    let outcome = state.aggregator.ingest(&meta, report).await?;

    if let Some(ref notifier) = state.notifier {
        if let Err(e) = notifier.notify(report, &outcome).await {
            warn!("Status update for {} failed: {}", report.repository, e);
        }
    }

    Ok(outcome)
}

/// Run [`process_report`] in the background, logging its result.
pub fn spawn_report(state: AppState, report: IncomingReport) {
    tokio::spawn(async move {
        if let Err(e) = process_report(&state, &report).await {
            error!(
                "Dropped report for {}@{}: {}",
                report.repository,
                report.short_commit(),
                e
            );
        }
    });
}

/// Build the router with all routes and middleware.
pub fn build_app(state: AppState, enable_cors: bool, max_body_bytes: usize) -> Router {
    let app = Router::new()
        .route("/", get(handlers::list_repositories))
        .route("/healthz", get(handlers::health_check))
        .route(
            "/incoming",
            post(handlers::incoming).layer(DefaultBodyLimit::max(max_body_bytes)),
        )
        .route("/repo/:owner/:name", get(handlers::repository_page))
        .route("/commit/:owner/:name/:commit", get(handlers::commit_page))
        .route("/api/:owner/:name", get(handlers::repository_summary))
        .fallback(handlers::not_found)
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if enable_cors {
        app.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else {
        app
    }
}

/// Open the database and serve until Ctrl-C.
pub async fn serve(config: &Config) -> anyhow::Result<()> {
    let state = AppState::from_config(config).context("Failed to initialize server state")?;
    if config.notifier.enabled {
        info!("Commit status notifications enabled");
    }

    let app = build_app(
        state,
        config.server.enable_cors,
        config.server.max_body_bytes,
    );

    let addr: SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("Invalid bind address: {}", config.server.bind))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Listening at http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

//! Pageforge Server
//!
//! Axum front door for the publish pipeline. Validates the trigger secret,
//! schedules each accepted build as a background task, and acknowledges
//! immediately; round outcomes surface only through logs and recorded state.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use clap::Parser;
use pageforge_core::{
    BuildRequest, LlmGenerator, Orchestrator, Settings, SiteGenerator, TaskStateStore,
};
use serde_json::json;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "pageforge", about = "Publishes LLM-generated sites to GitHub Pages")]
struct Args {
    /// Port to listen on
    #[arg(long, default_value_t = 8080)]
    port: u16,
}

/// Application state shared across handlers.
struct AppState<G> {
    secret: String,
    orchestrator: Orchestrator<G>,
}

fn router<G: SiteGenerator + 'static>(state: Arc<AppState<G>>) -> Router {
    Router::new()
        .route("/build", post(build::<G>))
        .route("/evaluate", post(evaluate))
        .route("/healthz", get(healthz))
        .with_state(state)
}

/// Inbound trigger. Secret mismatch is rejected before any work is scheduled;
/// an accepted request is acknowledged without waiting for the round.
async fn build<G: SiteGenerator + 'static>(
    State(state): State<Arc<AppState<G>>>,
    Json(req): Json<BuildRequest>,
) -> impl IntoResponse {
    if req.secret != state.secret {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({ "detail": "Invalid secret" })),
        );
    }

    tracing::info!(task = %req.task, round = req.round, "build accepted");
    let state = Arc::clone(&state);
    tokio::spawn(async move { state.orchestrator.process(req).await });

    (
        StatusCode::OK,
        Json(json!({ "status": "accepted", "message": "Processing in background" })),
    )
}

/// Local stand-in for an evaluation service, handy for smoke tests.
async fn evaluate(Json(body): Json<serde_json::Value>) -> Json<serde_json::Value> {
    Json(json!({ "received": body, "message": "Evaluation stored (simulated)" }))
}

async fn healthz() -> &'static str {
    "ok"
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before reading settings so the binary runs from any cwd.
    dotenvy::dotenv().ok();
    init_tracing();

    let args = Args::parse();
    let settings = Settings::from_env()?;

    let store = Arc::new(TaskStateStore::open_at(settings.state_path.clone()));
    let generator = LlmGenerator::from_settings(&settings)?;
    let secret = settings.trigger_secret.clone();
    let orchestrator = Orchestrator::new(settings, store, generator);
    let state = Arc::new(AppState {
        secret,
        orchestrator,
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    tracing::info!(%addr, "pageforge server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state)).await?;
    Ok(())
}

//! HTTP route handlers.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::config::Config;
use crate::llm::ChatCompletionsClient;
use crate::pipeline::{Pipeline, RunOutcome, RunSettings};
use crate::task::RunMode;
use crate::tools::WebClient;

type ApiError = (StatusCode, Json<Value>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

/// Finished runs kept in memory; the oldest is evicted past this.
pub const MAX_RECORDED_RUNS: usize = 256;

/// Shared application state.
pub struct AppState {
    pub pipeline: Pipeline,
    pub mode: RunMode,
    pub runs: RwLock<HashMap<Uuid, RunRecord>>,
    run_capacity: usize,
}

impl AppState {
    pub fn new(pipeline: Pipeline, mode: RunMode) -> Self {
        Self::with_run_capacity(pipeline, mode, MAX_RECORDED_RUNS)
    }

    pub fn with_run_capacity(pipeline: Pipeline, mode: RunMode, run_capacity: usize) -> Self {
        Self {
            pipeline,
            mode,
            runs: RwLock::new(HashMap::new()),
            run_capacity: run_capacity.max(1),
        }
    }

    /// Store a finished run, evicting the oldest records beyond capacity.
    async fn record_run(&self, record: RunRecord) {
        let mut runs = self.runs.write().await;
        runs.insert(record.run_id, record);
        while runs.len() > self.run_capacity {
            let oldest = runs
                .values()
                .min_by_key(|r| r.finished_at)
                .map(|r| r.run_id);
            match oldest {
                Some(id) => {
                    runs.remove(&id);
                    tracing::debug!("Evicted run record {}", id);
                }
                None => break,
            }
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RunTaskRequest {
    #[serde(default)]
    pub task: String,
    #[serde(default)]
    pub enable_research: bool,
    #[serde(default)]
    pub verification_targets: Vec<String>,
}

/// Summary kept for every finished run.
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub task: String,
    pub verification_passed: Option<bool>,
    pub retry_count: u32,
    pub review: String,
    pub files: Vec<String>,
    pub audit_findings: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub model: String,
}

/// Router with every route mounted, ready for `axum::serve`.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/run_task", post(run_task))
        .route("/api/runs", get(list_runs))
        .route("/api/runs/:id", get(get_run))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let llm = Arc::new(ChatCompletionsClient::new(config.api_key.clone(), &config.base_url));
    let web = WebClient::new()?;
    let pipeline = Pipeline::new(llm, config.model.clone(), web, config.workspace_root.clone());
    let state = Arc::new(AppState::new(pipeline, config.run_mode()));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!(
        "Server listening on {} (model={}, workspace={})",
        addr,
        config.model,
        config.workspace_root.display()
    );

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

/// Health check endpoint.
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        model: state.pipeline.model().to_string(),
    })
}

/// POST /api/run_task - Run the full pipeline for one request.
async fn run_task(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RunTaskRequest>,
) -> Result<Json<RunOutcome>, ApiError> {
    let task = req.task.trim();
    if task.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "task is required"));
    }

    let started_at = Utc::now();
    let settings = RunSettings {
        enable_research: req.enable_research,
        mode: state.mode,
        verification_targets: req.verification_targets,
    };

    let run = state.pipeline.run(task, settings).await.map_err(|e| {
        tracing::error!("Run failed: {}", e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;

    let files = crate::sandbox::Sandbox::create(&run.sandbox_root)
        .and_then(|sandbox| sandbox.list(""))
        .unwrap_or_default();
    let record = RunRecord {
        run_id: run.outcome.run_id,
        task: task.to_string(),
        verification_passed: run.outcome.verification_passed,
        retry_count: run.outcome.retry_count,
        review: run.outcome.review.clone(),
        files,
        audit_findings: run.state.audit_findings.iter().map(ToString::to_string).collect(),
        started_at,
        finished_at: Utc::now(),
    };
    state.record_run(record).await;

    Ok(Json(run.outcome))
}

/// GET /api/runs - Finished runs, newest first.
async fn list_runs(State(state): State<Arc<AppState>>) -> Json<Vec<RunRecord>> {
    let mut runs: Vec<RunRecord> = state.runs.read().await.values().cloned().collect();
    runs.sort_by(|a, b| b.finished_at.cmp(&a.finished_at));
    Json(runs)
}

/// GET /api/runs/:id - One finished run.
async fn get_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<RunRecord>, ApiError> {
    state
        .runs
        .read()
        .await
        .get(&id)
        .cloned()
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("Run {} not found", id)))
}

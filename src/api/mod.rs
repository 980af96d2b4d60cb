//! HTTP API.
//!
//! ## Endpoints
//! - `GET /api/health` - Health check
//! - `POST /api/run_task` - Run the pipeline for `{task, enable_research, verification_targets}`
//! - `GET /api/runs` - List finished runs
//! - `GET /api/runs/:id` - One finished run

mod routes;

pub use routes::{app, serve, AppState, RunRecord, RunTaskRequest, MAX_RECORDED_RUNS};

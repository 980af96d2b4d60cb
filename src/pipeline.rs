//! Run entry point: builds a run's sandbox, context and task state, then
//! hands the state to the orchestration graph.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::agents::StageContext;
use crate::graph::Orchestrator;
use crate::llm::LlmClient;
use crate::sandbox::{Sandbox, SandboxError};
use crate::task::{RunMode, TaskState};
use crate::tools::{ToolRegistry, WebClient};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("Sandbox root unavailable: {0}")]
    SandboxUnavailable(#[from] SandboxError),
}

/// Per-run options.
#[derive(Debug, Clone, Default)]
pub struct RunSettings {
    pub enable_research: bool,
    pub mode: RunMode,
    /// Explicit targets; when empty, Analyze takes them from the spec.
    pub verification_targets: Vec<String>,
}

/// What the caller of a run gets back.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub verification_passed: Option<bool>,
    pub review: String,
    pub retry_count: u32,
}

#[derive(Debug, Clone)]
pub struct CompletedRun {
    pub outcome: RunOutcome,
    pub sandbox_root: PathBuf,
    pub state: TaskState,
}

/// Shared across concurrent runs; each run gets its own sandbox root under
/// `workspace_root/runs/<run-id>`.
#[derive(Clone)]
pub struct Pipeline {
    llm: Arc<dyn LlmClient>,
    model: String,
    web: WebClient,
    workspace_root: PathBuf,
}

impl Pipeline {
    pub fn new(llm: Arc<dyn LlmClient>, model: impl Into<String>, web: WebClient, workspace_root: PathBuf) -> Self {
        Self {
            llm,
            model: model.into(),
            web,
            workspace_root,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn run_root(&self, run_id: Uuid) -> PathBuf {
        self.workspace_root.join("runs").join(run_id.to_string())
    }

    /// Execute one run to completion. Only an unusable sandbox root is fatal.
    pub async fn run(&self, task: &str, settings: RunSettings) -> Result<CompletedRun, RunError> {
        let run_id = Uuid::new_v4();
        let mut sandbox = Sandbox::create(self.run_root(run_id))?;
        if let Some(name) = self.workspace_root.file_name() {
            sandbox = sandbox.with_alias(name.to_string_lossy());
        }
        tracing::info!(
            "Run {} started in {} (mode={:?}, research={})",
            run_id,
            sandbox.root().display(),
            settings.mode,
            settings.enable_research
        );

        let mut state = TaskState::new(task, settings.mode);
        state.verification_targets = settings
            .verification_targets
            .iter()
            .map(|t| sandbox.normalize(t))
            .filter(|t| !t.is_empty())
            .collect();

        let sandbox_root = sandbox.root().to_path_buf();
        let ctx = StageContext {
            llm: Arc::clone(&self.llm),
            model: self.model.clone(),
            tools: ToolRegistry::new(sandbox, self.web.clone()),
            enable_research: settings.enable_research,
        };

        let state = Orchestrator.run(state, &ctx).await;
        let outcome = RunOutcome {
            run_id,
            verification_passed: state.verification_passed.as_option(),
            review: state.review.clone().unwrap_or_default(),
            retry_count: state.retry_count,
        };
        tracing::info!(
            "Run {} finished: verification_passed={:?}, retry_count={}",
            run_id,
            outcome.verification_passed,
            outcome.retry_count
        );

        Ok(CompletedRun {
            outcome,
            sandbox_root,
            state,
        })
    }
}

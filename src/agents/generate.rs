use async_trait::async_trait;

use super::prompts;
use super::tool_loop::{LoopReport, ToolLoop, Transcript};
use super::{Stage, StageContext, StageKind};
use crate::audit;
use crate::task::{RunMode, TaskState};
use crate::tools::ToolName;

/// Turn cap for building the whole deliverable in one invocation.
pub const SINGLE_SHOT_ITERATIONS: usize = 8;
/// Turn cap per queued work unit.
pub const QUEUED_ITERATIONS: usize = 3;

const GENERATE_TOOLS: &[ToolName] = &[
    ToolName::WriteArtifact,
    ToolName::ReadArtifact,
    ToolName::ListArtifacts,
    ToolName::FetchRemote,
];

/// Writes artifacts into the sandbox. In queued mode each invocation
/// completes the head of the queue; otherwise it builds everything at once.
/// The remote-fetch audit runs after every invocation.
pub struct Generate;

impl Generate {
    fn existing_files(ctx: &StageContext) -> Vec<String> {
        ctx.tools.sandbox().list("").unwrap_or_else(|e| {
            tracing::warn!("Could not list sandbox: {}", e);
            Vec::new()
        })
    }

    async fn single_shot(&self, state: &TaskState, ctx: &StageContext) -> LoopReport {
        let existing = Self::existing_files(ctx);
        let transcript = Transcript::new(prompts::GENERATE_SYSTEM, prompts::generate_user(state, &existing));
        ToolLoop::new(ctx, StageKind::Generate, GENERATE_TOOLS, SINGLE_SHOT_ITERATIONS)
            .run(transcript)
            .await
    }

    async fn queued(&self, mut state: TaskState, ctx: &StageContext) -> TaskState {
        let Some(item) = state.artifact_queue.pop_front() else {
            tracing::debug!("Generate: queue already empty");
            return state;
        };

        tracing::info!("Generate: work unit {} ({})", item.id, item.goal);
        let existing = Self::existing_files(ctx);
        let transcript = Transcript::new(
            prompts::GENERATE_SYSTEM,
            prompts::generate_item_user(&state, &item, &existing),
        );
        let report = ToolLoop::new(ctx, StageKind::Generate, GENERATE_TOOLS, QUEUED_ITERATIONS)
            .run(transcript)
            .await;
        log_report(&report);

        state.completed_artifacts.push(item);
        state
    }
}

fn log_report(report: &LoopReport) {
    tracing::info!(
        "Generate wrote {} file(s) in {} turn(s): {}",
        report.written.len(),
        report.iterations,
        report.written.join(", ")
    );
}

#[async_trait]
impl Stage for Generate {
    fn kind(&self) -> StageKind {
        StageKind::Generate
    }

    async fn run(&self, mut state: TaskState, ctx: &StageContext) -> TaskState {
        if state.task().trim().is_empty() {
            tracing::warn!("Generate skipped: empty task");
            return state;
        }

        state = match state.mode {
            RunMode::SingleShot => {
                let report = self.single_shot(&state, ctx).await;
                log_report(&report);
                state
            }
            RunMode::Queued => self.queued(state, ctx).await,
        };

        match audit::scan_sandbox(ctx.tools.sandbox()).await {
            Ok(findings) => {
                for finding in &findings {
                    tracing::warn!("Audit: {}", finding);
                }
                state.audit_findings = findings;
            }
            Err(e) => tracing::warn!("Audit skipped: {}", e),
        }
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testing::context;
    use crate::llm::scripted::ScriptedLlm;
    use crate::llm::Role;
    use crate::task::{ArtifactItem, CheckOutcome, CheckRecord, VerificationLog};
    use serde_json::json;

    #[tokio::test]
    async fn test_single_shot_writes_files() {
        let (ctx, _llm, _temp) = context(
            vec![
                ScriptedLlm::calls(&[
                    ("write_artifact", json!({"path": "index.html", "content": "<h1>hi</h1>"})),
                    ("write_artifact", json!({"path": "css/site.css", "content": "h1{}"})),
                ]),
                ScriptedLlm::text("wrote the site"),
            ],
            false,
        );

        let state = Generate.run(TaskState::new("site", RunMode::SingleShot), &ctx).await;
        assert_eq!(ctx.tools.sandbox().list("").unwrap(), vec!["css/site.css", "index.html"]);
        assert!(state.audit_findings.is_empty());
    }

    #[tokio::test]
    async fn test_runtime_fetch_is_recorded_as_finding() {
        let page = "<script>fetch('https://export.arxiv.org/api/query').then(r => r.text())</script>";
        let (ctx, _llm, _temp) = context(
            vec![
                ScriptedLlm::calls(&[("write_artifact", json!({"path": "index.html", "content": page}))]),
                ScriptedLlm::text("done"),
            ],
            false,
        );

        let state = Generate.run(TaskState::new("arxiv digest", RunMode::SingleShot), &ctx).await;
        assert_eq!(state.audit_findings.len(), 1);
        assert_eq!(state.audit_findings[0].host, "export.arxiv.org");
    }

    #[tokio::test]
    async fn test_retry_prompt_carries_failures() {
        let (ctx, llm, _temp) = context(vec![ScriptedLlm::text("fixed")], false);
        let mut state = TaskState::new("site", RunMode::SingleShot);
        state.retry_count = 1;
        state.verification_log = VerificationLog::Checks(vec![CheckRecord {
            target: "validate.py".into(),
            outcome: CheckOutcome::Executed {
                command: "python3 'validate.py'".into(),
                exit_code: Some(1),
                output: "missing index.html".into(),
            },
        }]);

        Generate.run(state, &ctx).await;
        let requests = llm.requests();
        let user = requests[0]
            .iter()
            .find(|m| m.role == Role::User)
            .and_then(|m| m.text_content())
            .unwrap();
        assert!(user.contains("Previous verification failures"));
        assert!(user.contains("missing index.html"));
    }

    #[tokio::test]
    async fn test_queued_consumes_one_item() {
        let (ctx, _llm, _temp) = context(
            vec![
                ScriptedLlm::calls(&[("write_artifact", json!({"path": "a.txt", "content": "a"}))]),
                ScriptedLlm::text("unit done"),
            ],
            false,
        );
        let mut state = TaskState::new("notes", RunMode::Queued);
        state.artifact_queue.push_back(ArtifactItem::new("1", "scaffold"));
        state.artifact_queue.push_back(ArtifactItem::new("2", "content"));

        let state = Generate.run(state, &ctx).await;
        assert_eq!(state.artifact_queue.len(), 1);
        assert_eq!(state.completed_artifacts.len(), 1);
        assert_eq!(state.completed_artifacts[0].id, "1");
    }

    #[tokio::test]
    async fn test_collaborator_failure_still_audits() {
        let (ctx, _llm, _temp) = context(vec![], false);
        let state = Generate.run(TaskState::new("site", RunMode::SingleShot), &ctx).await;
        assert!(state.audit_findings.is_empty());
        assert!(ctx.tools.sandbox().list("").unwrap().is_empty());
    }
}

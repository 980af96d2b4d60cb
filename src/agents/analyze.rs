use async_trait::async_trait;
use serde::Deserialize;

use super::prompts;
use super::{Stage, StageContext, StageKind};
use crate::task::{parse_structured, ArtifactItem, ProjectSpec, RunMode, TaskState};

/// Upper bound on planned work units.
pub const MAX_PLANNED_ITEMS: usize = 8;

const SCRIPT_RUNNERS: &[&str] = &["python3", "python", "sh", "bash", "node"];

#[derive(Debug, Deserialize)]
struct Plan {
    #[serde(default)]
    spec: ProjectSpec,
    #[serde(default)]
    tasks: Vec<ArtifactItem>,
}

/// Turns the request into a [`ProjectSpec`], and in queued mode also plans
/// the artifact queue. Any failure leaves `spec` unset.
pub struct Analyze;

impl Analyze {
    async fn extract_spec(&self, state: &TaskState, ctx: &StageContext) -> Option<ProjectSpec> {
        let answer = ctx
            .ask(StageKind::Analyze, prompts::ANALYZE_SYSTEM, prompts::analyze_user(state))
            .await?;
        match parse_structured::<ProjectSpec>(&answer) {
            Ok(spec) => Some(spec),
            Err(e) => {
                tracing::warn!("Analyze produced no spec: {}", e);
                None
            }
        }
    }

    async fn plan(&self, state: &TaskState, ctx: &StageContext) -> Option<Plan> {
        let answer = ctx
            .ask(StageKind::Analyze, prompts::PLAN_SYSTEM, prompts::analyze_user(state))
            .await?;
        match parse_structured::<Plan>(&answer) {
            Ok(mut plan) => {
                plan.tasks.retain(|item| !item.goal.trim().is_empty());
                plan.tasks.truncate(MAX_PLANNED_ITEMS);
                Some(plan)
            }
            Err(e) => {
                tracing::warn!("Planner produced no plan: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl Stage for Analyze {
    fn kind(&self) -> StageKind {
        StageKind::Analyze
    }

    async fn run(&self, mut state: TaskState, ctx: &StageContext) -> TaskState {
        if state.task().trim().is_empty() {
            tracing::warn!("Analyze skipped: empty task");
            return state;
        }

        match state.mode {
            RunMode::SingleShot => {
                state.spec = self.extract_spec(&state, ctx).await;
            }
            RunMode::Queued => {
                if let Some(plan) = self.plan(&state, ctx).await {
                    tracing::info!("Planned {} work unit(s)", plan.tasks.len());
                    state.spec = Some(plan.spec);
                    state.artifact_queue = plan.tasks.into();
                }
            }
        }

        // Explicit targets from the request take precedence over the spec's.
        if state.verification_targets.is_empty() {
            if let Some(spec) = &state.spec {
                let sandbox = ctx.tools.sandbox();
                state.verification_targets = spec
                    .verification_targets
                    .iter()
                    .cloned()
                    .chain(spec.test_commands.iter().filter_map(|c| target_from_command(c)))
                    .map(|t| sandbox.normalize(&t))
                    .filter(|t| !t.is_empty())
                    .collect();
            }
        }

        if let Some(spec) = &state.spec {
            tracing::info!(
                "Analyze: project '{}' with {} expected path(s), {} verification target(s)",
                spec.project_name,
                spec.expected_paths().len(),
                state.verification_targets.len()
            );
        }
        state
    }
}

/// `python3 check.py` → `check.py`. Commands with extra arguments are not targets.
fn target_from_command(command: &str) -> Option<String> {
    let mut parts = command.split_whitespace();
    let runner = parts.next()?;
    let script = parts.next()?;
    if parts.next().is_some() || !SCRIPT_RUNNERS.contains(&runner) {
        return None;
    }
    Some(script.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testing::context;
    use crate::llm::scripted::ScriptedLlm;

    #[tokio::test]
    async fn test_single_shot_extracts_spec_and_targets() {
        let answer = r#"```json
{"project_name": "arxiv-daily",
 "pages": [{"path": "index.html", "purpose": "home"}],
 "verification_targets": ["./validate.py"],
 "test_commands": ["python3 check_links.py", "pytest -q tests/"]}
```"#;
        let (ctx, _llm, _temp) = context(vec![ScriptedLlm::text(answer)], false);
        let state = Analyze
            .run(TaskState::new("daily arxiv digest", RunMode::SingleShot), &ctx)
            .await;

        let spec = state.spec.expect("spec");
        assert_eq!(spec.project_name, "arxiv-daily");
        let targets: Vec<_> = state.verification_targets.iter().cloned().collect();
        assert_eq!(targets, vec!["check_links.py", "validate.py"]);
    }

    #[tokio::test]
    async fn test_request_targets_are_kept() {
        let answer = r#"{"project_name": "x", "verification_targets": ["other.py"]}"#;
        let (ctx, _llm, _temp) = context(vec![ScriptedLlm::text(answer)], false);
        let mut state = TaskState::new("x", RunMode::SingleShot);
        state.verification_targets.insert("mine.py".into());

        let state = Analyze.run(state, &ctx).await;
        assert_eq!(state.verification_targets.len(), 1);
        assert!(state.verification_targets.contains("mine.py"));
    }

    #[tokio::test]
    async fn test_malformed_answer_leaves_spec_empty() {
        let (ctx, _llm, _temp) = context(vec![ScriptedLlm::text("I think you want a website.")], false);
        let state = Analyze.run(TaskState::new("site", RunMode::SingleShot), &ctx).await;
        assert!(state.spec.is_none());
        assert!(state.verification_targets.is_empty());
    }

    #[tokio::test]
    async fn test_collaborator_failure_leaves_spec_empty() {
        let (ctx, _llm, _temp) = context(vec![], false);
        let state = Analyze.run(TaskState::new("site", RunMode::SingleShot), &ctx).await;
        assert!(state.spec.is_none());
    }

    #[tokio::test]
    async fn test_empty_task_makes_no_request() {
        let (ctx, llm, _temp) = context(vec![ScriptedLlm::text("{}")], false);
        let state = Analyze.run(TaskState::new("  ", RunMode::SingleShot), &ctx).await;
        assert!(state.spec.is_none());
        assert_eq!(llm.remaining(), 1);
    }

    #[tokio::test]
    async fn test_queued_mode_plans_queue() {
        let answer = r#"Here is the plan:
{"spec": {"project_name": "notes"},
 "tasks": [{"id": 1, "goal": "scaffold"}, {"id": "2", "goal": "data"}, {"id": 3, "goal": ""}]}"#;
        let (ctx, _llm, _temp) = context(vec![ScriptedLlm::text(answer)], false);
        let state = Analyze.run(TaskState::new("notes app", RunMode::Queued), &ctx).await;

        assert_eq!(state.spec.as_ref().map(|s| s.project_name.as_str()), Some("notes"));
        let ids: Vec<_> = state.artifact_queue.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
    }

    #[test]
    fn test_target_from_command() {
        assert_eq!(target_from_command("python validate.py").as_deref(), Some("validate.py"));
        assert_eq!(target_from_command("node test.js").as_deref(), Some("test.js"));
        assert_eq!(target_from_command("pytest -q"), None);
        assert_eq!(target_from_command("python a.py --flag"), None);
    }
}

use async_trait::async_trait;

use super::prompts;
use super::tool_loop::{ToolLoop, Transcript};
use super::{Stage, StageContext, StageKind};
use crate::task::{parse_structured, Evidence, TaskState};
use crate::tools::ToolName;

pub const MAX_RESEARCH_ITERATIONS: usize = 10;

const RESEARCH_TOOLS: &[ToolName] = &[ToolName::SearchRemote, ToolName::FetchRemote];

/// Gathers external evidence when research is enabled. Disabled research
/// still leaves an (empty) evidence record so later stages can tell it ran.
pub struct Research;

#[async_trait]
impl Stage for Research {
    fn kind(&self) -> StageKind {
        StageKind::Research
    }

    async fn run(&self, mut state: TaskState, ctx: &StageContext) -> TaskState {
        if !ctx.enable_research || state.task().trim().is_empty() {
            state.evidence.get_or_insert_with(Evidence::default);
            return state;
        }

        let transcript = Transcript::new(prompts::RESEARCH_SYSTEM, prompts::research_user(&state));
        let report = ToolLoop::new(ctx, StageKind::Research, RESEARCH_TOOLS, MAX_RESEARCH_ITERATIONS)
            .run(transcript)
            .await;

        let evidence = match report.outcome.output() {
            Some(text) => match parse_structured::<Evidence>(text) {
                Ok(evidence) if !evidence.is_empty() => evidence,
                // Valid JSON with none of the expected fields still carries the answer.
                Ok(_) => Evidence::from_raw(text),
                Err(e) => {
                    tracing::debug!("Research answer kept as raw notes: {}", e);
                    Evidence::from_raw(text)
                }
            },
            None => Evidence::default(),
        };
        tracing::info!(
            "Research: {} source(s), {} note(s) after {} turn(s)",
            evidence.sources.len(),
            evidence.notes.len(),
            report.iterations
        );
        state.evidence = Some(evidence);
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testing::context;
    use crate::llm::scripted::ScriptedLlm;
    use crate::task::RunMode;

    #[tokio::test]
    async fn test_disabled_research_makes_no_request() {
        let (ctx, llm, _temp) = context(vec![ScriptedLlm::text("{}")], false);
        let state = Research.run(TaskState::new("site", RunMode::SingleShot), &ctx).await;

        assert_eq!(state.evidence, Some(Evidence::default()));
        assert!(llm.requests().is_empty());
    }

    #[tokio::test]
    async fn test_structured_evidence_with_aliases() {
        let answer = r#"{"sources": [{"url": "https://arxiv.org/help/api"}],
            "notes": ["Atom feed"], "gotchas": ["3s between requests"],
            "recommended_examples": ["cat:cs.AI"]}"#;
        let (ctx, _llm, _temp) = context(vec![ScriptedLlm::text(answer)], true);
        let state = Research.run(TaskState::new("arxiv", RunMode::SingleShot), &ctx).await;

        let evidence = state.evidence.expect("evidence");
        assert_eq!(evidence.sources.len(), 1);
        assert_eq!(evidence.caveats, vec!["3s between requests"]);
        assert_eq!(evidence.examples, vec!["cat:cs.AI"]);
    }

    #[tokio::test]
    async fn test_unstructured_answer_becomes_raw_note() {
        let (ctx, _llm, _temp) = context(vec![ScriptedLlm::text("Use the Atom API.")], true);
        let state = Research.run(TaskState::new("arxiv", RunMode::SingleShot), &ctx).await;
        assert_eq!(state.evidence, Some(Evidence::from_raw("Use the Atom API.")));
    }

    #[tokio::test]
    async fn test_json_without_known_fields_keeps_answer() {
        let answer = r#"{"summary": "Use the arXiv Atom API at export.arxiv.org"}"#;
        let (ctx, _llm, _temp) = context(vec![ScriptedLlm::text(answer)], true);
        let state = Research.run(TaskState::new("arxiv", RunMode::SingleShot), &ctx).await;

        let evidence = state.evidence.expect("evidence");
        assert!(!evidence.is_empty());
        assert!(evidence.notes[0].contains("export.arxiv.org"));
    }

    #[tokio::test]
    async fn test_collaborator_failure_gives_empty_evidence() {
        let (ctx, _llm, _temp) = context(vec![], true);
        let state = Research.run(TaskState::new("arxiv", RunMode::SingleShot), &ctx).await;
        assert_eq!(state.evidence, Some(Evidence::default()));
    }
}

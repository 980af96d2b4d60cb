//! Bounded tool-call loop between a stage and the reasoning collaborator.
//!
//! Each turn: send the transcript, and if the answer names no tool calls the
//! loop is finished. Otherwise every call runs in order and its result (or
//! error) is appended as a tool message before the next turn. Tool failures
//! never escape the loop. Hitting the iteration cap or losing the
//! collaborator ends the loop with the last text the model produced.

use std::collections::HashSet;

use crate::llm::{ChatMessage, ToolCall};
use crate::tools::{ToolError, ToolInvocation, ToolName, ToolRegistry};

use super::{StageContext, StageKind};

/// Conversation so far. Passed by value from turn to turn.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    messages: Vec<ChatMessage>,
}

impl Transcript {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage::system(system), ChatMessage::user(user)],
        }
    }

    #[must_use]
    pub fn with(mut self, message: ChatMessage) -> Self {
        self.messages.push(message);
        self
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }
}

/// How the loop ended.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopOutcome {
    /// The collaborator answered without requesting tools.
    Finished { answer: String },
    /// The iteration cap was hit while tools were still being requested.
    CapReached { last_output: Option<String> },
    /// The collaborator could not be reached.
    Interrupted {
        last_output: Option<String>,
        error: String,
    },
}

impl LoopOutcome {
    /// Best available output: the final answer, or whatever text came last.
    pub fn output(&self) -> Option<&str> {
        match self {
            Self::Finished { answer } => Some(answer.as_str()),
            Self::CapReached { last_output } | Self::Interrupted { last_output, .. } => {
                last_output.as_deref()
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoopReport {
    pub outcome: LoopOutcome,
    pub transcript: Transcript,
    pub iterations: usize,
    /// Normalised paths successfully written during this loop.
    pub written: Vec<String>,
}

/// Paths written so far in one loop invocation, in write order.
#[derive(Debug, Default)]
struct WrittenPaths {
    seen: HashSet<String>,
    order: Vec<String>,
}

impl WrittenPaths {
    fn contains(&self, path: &str) -> bool {
        self.seen.contains(path)
    }

    fn record(&mut self, path: String) {
        if self.seen.insert(path.clone()) {
            self.order.push(path);
        }
    }
}

pub struct ToolLoop<'a> {
    ctx: &'a StageContext,
    stage: StageKind,
    allowed: &'a [ToolName],
    max_iterations: usize,
}

impl<'a> ToolLoop<'a> {
    pub fn new(ctx: &'a StageContext, stage: StageKind, allowed: &'a [ToolName], max_iterations: usize) -> Self {
        Self {
            ctx,
            stage,
            allowed,
            max_iterations,
        }
    }

    pub async fn run(&self, transcript: Transcript) -> LoopReport {
        let definitions = ToolRegistry::definitions(self.allowed);
        let mut transcript = transcript;
        let mut written = WrittenPaths::default();
        let mut last_output: Option<String> = None;

        for iteration in 1..=self.max_iterations {
            let response = match self
                .ctx
                .llm
                .chat_completion(&self.ctx.model, transcript.messages(), Some(definitions.as_slice()))
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!("{} loop interrupted at turn {}: {}", self.stage, iteration, e);
                    return LoopReport {
                        outcome: LoopOutcome::Interrupted {
                            last_output,
                            error: e.to_string(),
                        },
                        transcript,
                        iterations: iteration - 1,
                        written: written.order,
                    };
                }
            };

            if let Some(text) = response.content.as_deref().filter(|t| !t.trim().is_empty()) {
                last_output = Some(text.to_string());
            }

            let calls = response.requested_calls().to_vec();
            transcript = transcript.with(ChatMessage::assistant(
                response.content.clone(),
                response.tool_calls.clone(),
            ));

            if calls.is_empty() {
                tracing::debug!("{} loop finished after {} turn(s)", self.stage, iteration);
                return LoopReport {
                    outcome: LoopOutcome::Finished {
                        answer: response.content.unwrap_or_default(),
                    },
                    transcript,
                    iterations: iteration,
                    written: written.order,
                };
            }

            transcript = self.execute_turn(transcript, &calls, &mut written).await;
        }

        tracing::warn!(
            "{} loop hit its cap of {} turns without a final answer",
            self.stage,
            self.max_iterations
        );
        LoopReport {
            outcome: LoopOutcome::CapReached { last_output },
            transcript,
            iterations: self.max_iterations,
            written: written.order,
        }
    }

    async fn execute_turn(
        &self,
        transcript: Transcript,
        calls: &[ToolCall],
        written: &mut WrittenPaths,
    ) -> Transcript {
        let mut transcript = transcript;
        for call in calls {
            let result = self.execute_call(call, written).await;
            transcript = transcript.with(ChatMessage::tool_result(call.id.clone(), result));
        }
        transcript
    }

    /// Run one call and render its inline report.
    async fn execute_call(&self, call: &ToolCall, written: &mut WrittenPaths) -> String {
        let name = call.function.name.as_str();
        match ToolName::from_name(name) {
            None => return format!("ERROR: {}", ToolError::UnknownTool(name.to_string())),
            Some(tool) if !self.allowed.contains(&tool) => {
                return format!("ERROR: {}", ToolError::NotPermitted(tool));
            }
            Some(_) => {}
        }

        let invocation = match ToolInvocation::parse(name, &call.function.arguments) {
            Ok(invocation) => invocation,
            Err(e) => {
                tracing::debug!("{} rejected tool call {}: {}", self.stage, name, e);
                return format!("ERROR: {e}");
            }
        };

        let write_key = match &invocation {
            ToolInvocation::WriteArtifact(args) => {
                let key = self.ctx.tools.sandbox().normalize(&args.path);
                if written.contains(&key) {
                    tracing::info!("{} skipped duplicate write to {}", self.stage, key);
                    return format!("SKIP: {} already written in this run", args.path);
                }
                Some(key)
            }
            _ => None,
        };

        match self.ctx.tools.execute(&invocation).await {
            Ok(output) => {
                if let Some(key) = write_key {
                    written.record(key);
                }
                output.render()
            }
            Err(e) => {
                tracing::warn!("{} tool {} failed: {}", self.stage, name, e);
                format!("ERROR: tool failed: {e}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testing::context;
    use crate::llm::scripted::ScriptedLlm;
    use crate::llm::Role;
    use serde_json::json;

    const FILE_TOOLS: &[ToolName] = &[ToolName::WriteArtifact, ToolName::ReadArtifact, ToolName::ListArtifacts];

    fn tool_messages(transcript: &Transcript) -> Vec<String> {
        transcript
            .messages()
            .iter()
            .filter(|m| m.role == Role::Tool)
            .filter_map(|m| m.text_content().map(str::to_string))
            .collect()
    }

    #[tokio::test]
    async fn test_no_tool_calls_finishes_immediately() {
        let (ctx, llm, _temp) = context(vec![ScriptedLlm::text("done")], false);
        let report = ToolLoop::new(&ctx, StageKind::Generate, FILE_TOOLS, 5)
            .run(Transcript::new("sys", "user"))
            .await;

        assert_eq!(report.outcome, LoopOutcome::Finished { answer: "done".into() });
        assert_eq!(report.iterations, 1);
        assert_eq!(llm.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_write_is_suppressed() {
        let (ctx, _llm, _temp) = context(
            vec![
                ScriptedLlm::calls(&[
                    ("write_artifact", json!({"path": "index.html", "content": "first"})),
                    ("write_artifact", json!({"path": "./index.html", "content": "second"})),
                ]),
                ScriptedLlm::text("done"),
            ],
            false,
        );

        let report = ToolLoop::new(&ctx, StageKind::Generate, FILE_TOOLS, 5)
            .run(Transcript::new("sys", "user"))
            .await;

        let tool_results = tool_messages(&report.transcript);
        assert_eq!(tool_results.len(), 2);
        assert!(tool_results[0].contains("index.html"));
        assert!(tool_results[1].starts_with("SKIP:"));
        assert!(tool_results[1].contains("already written"));
        assert_eq!(report.written, vec!["index.html"]);
        assert_eq!(ctx.tools.sandbox().read("index.html").await.unwrap(), "first");
    }

    #[tokio::test]
    async fn test_errors_are_reported_inline_and_loop_continues() {
        let (ctx, _llm, _temp) = context(
            vec![
                ScriptedLlm::calls(&[
                    ("drop_database", json!({})),
                    ("write_artifact", json!({"path": "a.html"})),
                    ("read_artifact", json!({"path": "../etc/passwd"})),
                    ("run_command", json!({"cmd": "ls"})),
                    ("write_artifact", json!({"path": "a.html", "content": "ok"})),
                ]),
                ScriptedLlm::text("finished"),
            ],
            false,
        );

        let report = ToolLoop::new(&ctx, StageKind::Generate, FILE_TOOLS, 5)
            .run(Transcript::new("sys", "user"))
            .await;

        let results = tool_messages(&report.transcript);
        assert_eq!(results.len(), 5);
        assert!(results[0].starts_with("ERROR: unknown tool drop_database"));
        assert!(results[1].starts_with("ERROR: invalid arguments for write_artifact"));
        assert!(results[2].starts_with("ERROR: tool failed: Path escapes"));
        assert!(results[3].contains("not available in this stage"));
        assert!(results[4].contains("a.html"));
        assert_eq!(report.outcome.output(), Some("finished"));
    }

    #[tokio::test]
    async fn test_cap_reached_keeps_last_output() {
        let mut turn = ScriptedLlm::calls(&[("list_artifacts", json!({}))]);
        turn.content = Some("still working".into());
        let (ctx, llm, _temp) = context(vec![turn.clone(), turn.clone(), turn], false);

        let report = ToolLoop::new(&ctx, StageKind::Generate, FILE_TOOLS, 2)
            .run(Transcript::new("sys", "user"))
            .await;

        assert_eq!(
            report.outcome,
            LoopOutcome::CapReached {
                last_output: Some("still working".into())
            }
        );
        assert_eq!(report.iterations, 2);
        assert_eq!(llm.remaining(), 1);
    }

    #[tokio::test]
    async fn test_collaborator_failure_interrupts() {
        let (ctx, _llm, _temp) = context(vec![], false);
        let report = ToolLoop::new(&ctx, StageKind::Research, &[ToolName::SearchRemote], 3)
            .run(Transcript::new("sys", "user"))
            .await;

        assert!(matches!(report.outcome, LoopOutcome::Interrupted { last_output: None, .. }));
        assert_eq!(report.iterations, 0);
    }

    #[tokio::test]
    async fn test_transcript_carries_tool_results_to_next_turn() {
        let (ctx, llm, _temp) = context(
            vec![
                ScriptedLlm::calls(&[("list_artifacts", json!({}))]),
                ScriptedLlm::text("ok"),
            ],
            false,
        );

        ToolLoop::new(&ctx, StageKind::Generate, FILE_TOOLS, 3)
            .run(Transcript::new("sys", "user"))
            .await;

        let requests = llm.requests();
        assert_eq!(requests[0].len(), 2);
        // system, user, assistant(tool call), tool result
        assert_eq!(requests[1].len(), 4);
        assert_eq!(requests[1][3].tool_call_id.as_deref(), Some("call_0"));
    }
}

//! Pipeline stages.
//!
//! A stage takes the task state by value and hands back the updated record.
//! Stages never fail: collaborator errors and malformed answers degrade the
//! stage's contribution to an empty or default value.
//!
//! ```text
//!   Analyze ─▶ Research ─▶ Generate ─▶ Evaluate ─▶ Review
//!                              ▲           │
//!                              └─ retry ───┘
//! ```

mod analyze;
mod evaluate;
mod generate;
mod prompts;
mod research;
mod review;
pub mod tool_loop;

pub use analyze::Analyze;
pub use evaluate::Evaluate;
pub use generate::Generate;
pub use research::Research;
pub use review::Review;
pub use tool_loop::{LoopOutcome, LoopReport, ToolLoop, Transcript};

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::llm::{ChatMessage, LlmClient};
use crate::task::TaskState;
use crate::tools::ToolRegistry;

/// Which stage a node runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Analyze,
    Research,
    Generate,
    Evaluate,
    Review,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Analyze => "analyze",
            Self::Research => "research",
            Self::Generate => "generate",
            Self::Evaluate => "evaluate",
            Self::Review => "review",
        };
        f.write_str(name)
    }
}

/// Everything a stage needs besides the task state. Built once per run.
#[derive(Clone)]
pub struct StageContext {
    pub llm: Arc<dyn LlmClient>,
    pub model: String,
    pub tools: ToolRegistry,
    pub enable_research: bool,
}

impl StageContext {
    /// One-shot request without tools. `None` on transport failure or empty answer.
    pub(crate) async fn ask(&self, stage: StageKind, system: &str, user: String) -> Option<String> {
        let messages = [ChatMessage::system(system), ChatMessage::user(user)];
        match self.llm.chat_completion(&self.model, &messages, None).await {
            Ok(response) => response.content.filter(|text| !text.trim().is_empty()),
            Err(e) => {
                tracing::warn!("{} request failed: {}", stage, e);
                None
            }
        }
    }
}

#[async_trait]
pub trait Stage: Send + Sync {
    fn kind(&self) -> StageKind;

    async fn run(&self, state: TaskState, ctx: &StageContext) -> TaskState;
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use tempfile::TempDir;

    use super::StageContext;
    use crate::llm::scripted::ScriptedLlm;
    use crate::llm::ChatResponse;
    use crate::sandbox::Sandbox;
    use crate::tools::{ToolRegistry, WebClient};

    /// A context over a fresh sandbox driven by a scripted collaborator.
    pub(crate) fn context(
        responses: Vec<ChatResponse>,
        enable_research: bool,
    ) -> (StageContext, Arc<ScriptedLlm>, TempDir) {
        let temp = tempfile::tempdir().unwrap();
        let sandbox = Sandbox::create(temp.path().join("workspace")).unwrap();
        let llm = Arc::new(ScriptedLlm::new(responses));
        let ctx = StageContext {
            llm: llm.clone(),
            model: "test-model".to_string(),
            tools: ToolRegistry::new(sandbox, WebClient::new().unwrap()),
            enable_research,
        };
        (ctx, llm, temp)
    }
}

//! Orchestration graph: the stage state machine and its run loop.
//!
//! The graph is the only owner of a run's [`TaskState`]. Transitions are a pure
//! function of the node just executed and the state it produced; the single
//! conditional edge is Evaluate → Generate (retry) versus Evaluate → Review.

use std::fmt;

use crate::agents::{Analyze, Evaluate, Generate, Research, Review, Stage, StageContext, StageKind};
use crate::task::{ArtifactItem, RunMode, TaskState, VerificationStatus};

/// Evaluate executions after which a failing run goes to Review regardless.
pub const MAX_RETRIES: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Node {
    Analyze,
    Research,
    Generate,
    Evaluate,
    Review,
    Terminated,
}

impl Node {
    pub const INITIAL: Node = Node::Analyze;

    /// The node that follows `self` given the state it produced.
    pub fn next(self, state: &TaskState) -> Node {
        match self {
            Node::Analyze => Node::Research,
            Node::Research => Node::Generate,
            Node::Generate => Node::Evaluate,
            Node::Evaluate => {
                if state.verification_passed == VerificationStatus::Failed
                    && state.retry_count < MAX_RETRIES
                {
                    Node::Generate
                } else {
                    Node::Review
                }
            }
            Node::Review | Node::Terminated => Node::Terminated,
        }
    }

    fn stage(self) -> Option<&'static dyn Stage> {
        match self {
            Node::Analyze => Some(&Analyze),
            Node::Research => Some(&Research),
            Node::Generate => Some(&Generate),
            Node::Evaluate => Some(&Evaluate),
            Node::Review => Some(&Review),
            Node::Terminated => None,
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.stage() {
            Some(stage) => write!(f, "{}", stage.kind()),
            None => f.write_str("terminated"),
        }
    }
}

/// Drives one run from [`Node::INITIAL`] to [`Node::Terminated`].
#[derive(Debug, Default, Clone, Copy)]
pub struct Orchestrator;

impl Orchestrator {
    pub async fn run(&self, state: TaskState, ctx: &StageContext) -> TaskState {
        let mut state = state;
        let mut node = Node::INITIAL;

        while let Some(stage) = node.stage() {
            tracing::info!("Entering {} (retry_count={})", node, state.retry_count);
            state = match stage.kind() {
                StageKind::Generate => generate_pass(stage, state, ctx).await,
                _ => stage.run(state, ctx).await,
            };

            if node == Node::Analyze {
                state = resolve_mode(state);
            }

            let next = node.next(&state);
            if node == Node::Evaluate && next == Node::Generate {
                tracing::info!(
                    "Verification failed (attempt {} of {}), regenerating",
                    state.retry_count,
                    MAX_RETRIES
                );
                if state.mode == RunMode::Queued {
                    let item = repair_item(&state);
                    state.artifact_queue.push_back(item);
                }
            }
            node = next;
        }

        tracing::info!(
            "Run finished: verification={:?} retry_count={}",
            state.verification_passed,
            state.retry_count
        );
        state
    }
}

/// One visit to the Generate node. Queued mode drains every unit that was
/// pending on entry, one stage invocation each.
async fn generate_pass(stage: &dyn Stage, state: TaskState, ctx: &StageContext) -> TaskState {
    match state.mode {
        RunMode::SingleShot => stage.run(state, ctx).await,
        RunMode::Queued => {
            let pending = state.artifact_queue.len();
            let mut state = state;
            for _ in 0..pending {
                state = stage.run(state, ctx).await;
            }
            state
        }
    }
}

/// Queued mode without a queue falls back to single-shot, decided once.
fn resolve_mode(mut state: TaskState) -> TaskState {
    if state.mode == RunMode::Queued && state.artifact_queue.is_empty() {
        tracing::info!("No work units planned; switching to single-shot generation");
        state.mode = RunMode::SingleShot;
    }
    state
}

fn repair_item(state: &TaskState) -> ArtifactItem {
    let failures = state.verification_log.failures();
    let targets: Vec<String> = failures.iter().map(|r| r.target.clone()).collect();
    let mut item = ArtifactItem::new(
        format!("repair-{}", state.retry_count),
        format!("Fix the project so these verification targets pass: {}", targets.join(", ")),
    );
    item.inputs = targets;
    item
}

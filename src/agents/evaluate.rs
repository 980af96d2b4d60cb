use std::time::Duration;

use async_trait::async_trait;

use super::{Stage, StageContext, StageKind};
use crate::sandbox::{Sandbox, MAX_COMMAND_TIMEOUT};
use crate::task::{CheckOutcome, CheckRecord, TaskState, VerificationLog, VerificationStatus};

pub const TARGET_TIMEOUT: Duration = MAX_COMMAND_TIMEOUT;

/// Runs every verification target in the sandbox and records the verdict.
///
/// No collaborator is involved. Every invocation increments `retry_count`,
/// including the vacuous pass when there are no targets.
pub struct Evaluate;

/// Interpreter for a target, chosen by extension.
fn interpreter_for(target: &str) -> Option<&'static str> {
    let (_, ext) = target.rsplit_once('.')?;
    match ext.to_ascii_lowercase().as_str() {
        "py" => Some("python3"),
        "sh" => Some("sh"),
        "js" | "mjs" => Some("node"),
        _ => None,
    }
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

async fn check_target(sandbox: &Sandbox, target: &str) -> CheckOutcome {
    let Some(interpreter) = interpreter_for(target) else {
        return CheckOutcome::Skipped {
            reason: "unsupported target type".to_string(),
        };
    };

    let path = sandbox.normalize(target);
    let command = format!("{} {}", interpreter, shell_quote(&path));
    if let Err(e) = sandbox.resolve(&path) {
        return CheckOutcome::Errored {
            command,
            error: e.to_string(),
        };
    }

    match sandbox.run_command(&command, TARGET_TIMEOUT).await {
        Ok(output) => CheckOutcome::Executed {
            command,
            exit_code: output.exit_code,
            output: output.output,
        },
        Err(e) => CheckOutcome::Errored {
            command,
            error: e.to_string(),
        },
    }
}

#[async_trait]
impl Stage for Evaluate {
    fn kind(&self) -> StageKind {
        StageKind::Evaluate
    }

    async fn run(&self, mut state: TaskState, ctx: &StageContext) -> TaskState {
        state.retry_count += 1;

        if state.verification_targets.is_empty() {
            tracing::info!("Evaluate: no tests requested (attempt {})", state.retry_count);
            state.verification_passed = VerificationStatus::Passed;
            state.verification_log = VerificationLog::NoTestsRequested;
            return state;
        }

        let mut records = Vec::with_capacity(state.verification_targets.len());
        for target in &state.verification_targets {
            let outcome = check_target(ctx.tools.sandbox(), target).await;
            records.push(CheckRecord {
                target: target.clone(),
                outcome,
            });
        }

        let log = VerificationLog::Checks(records);
        state.verification_passed = VerificationStatus::from_passed(log.all_passed());
        tracing::info!(
            "Evaluate: {:?} with {} failure(s) (attempt {})",
            state.verification_passed,
            log.failures().len(),
            state.retry_count
        );
        state.verification_log = log;
        state
    }
}

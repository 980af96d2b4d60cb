use async_trait::async_trait;

use super::prompts;
use super::{Stage, StageContext, StageKind};
use crate::task::{TaskState, VerificationLog, VerificationStatus};

/// Produces the final review text. Only `review` is written.
pub struct Review;

impl Review {
    /// Deterministic review used when the collaborator gives nothing back.
    fn fallback(state: &TaskState, files: &[String]) -> String {
        let mut lines = Vec::new();
        let name = state
            .spec
            .as_ref()
            .map(|s| s.project_name.as_str())
            .filter(|n| !n.is_empty())
            .unwrap_or("project");
        lines.push(format!("Automated summary for {} ({} file(s) generated).", name, files.len()));

        let verdict = match (state.verification_passed, &state.verification_log) {
            (_, VerificationLog::NoTestsRequested) => {
                "No tests were requested; the result was assessed from structure only.".to_string()
            }
            (VerificationStatus::Passed, _) => format!(
                "Verification passed after {} attempt(s).",
                state.retry_count
            ),
            (VerificationStatus::Failed, log) => format!(
                "Verification failed after {} attempt(s): {} failing target(s).",
                state.retry_count,
                log.failures().len()
            ),
            (VerificationStatus::Unknown, _) => "Verification did not run.".to_string(),
        };
        lines.push(verdict);

        if let Some(spec) = &state.spec {
            let missing: Vec<&str> = spec
                .expected_paths()
                .into_iter()
                .filter(|p| !files.iter().any(|f| f == p))
                .collect();
            if !missing.is_empty() {
                lines.push(format!("Missing expected files: {}.", missing.join(", ")));
            }
        }
        for finding in &state.audit_findings {
            lines.push(format!("Audit: {finding}."));
        }
        lines.join("\n")
    }
}

#[async_trait]
impl Stage for Review {
    fn kind(&self) -> StageKind {
        StageKind::Review
    }

    async fn run(&self, mut state: TaskState, ctx: &StageContext) -> TaskState {
        let files = ctx.tools.sandbox().list("").unwrap_or_default();
        let has_evidence = matches!(&state.verification_log, VerificationLog::Checks(_));

        let review = match ctx
            .ask(
                StageKind::Review,
                prompts::REVIEW_SYSTEM,
                prompts::review_user(&state, &files, has_evidence),
            )
            .await
        {
            Some(text) => text.trim().to_string(),
            None => Self::fallback(&state, &files),
        };
        state.review = Some(review);
        state
    }
}

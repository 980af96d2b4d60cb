//! The task state record and the structured values stages put into it.

use std::collections::{BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::structured::{lenient_strings, string_or_number};
use super::verification::{VerificationLog, VerificationStatus};
use crate::audit::AuditFinding;

/// How Generate consumes work, fixed once at run start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Build the full deliverable in one Generate invocation.
    #[default]
    SingleShot,
    /// Work through `artifact_queue`, one head item per Generate invocation.
    Queued,
}

/// A file the project is expected to contain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileSpec {
    pub path: String,
    #[serde(default)]
    pub purpose: String,
}

/// Structured project specification produced by Analyze.
///
/// Every field is optional in the collaborator's output; unknown keys are kept
/// in `extra` so nothing the model said is lost.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectSpec {
    #[serde(default)]
    pub project_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub repo_type: String,
    #[serde(default)]
    pub pages: Vec<FileSpec>,
    #[serde(default)]
    pub files: Vec<FileSpec>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub assets: Vec<String>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub notes: Vec<String>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub build_instructions: Vec<String>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub test_commands: Vec<String>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub acceptance_criteria: Vec<String>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub verification_targets: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProjectSpec {
    /// Paths the spec says should exist (pages first, then files, then assets).
    pub fn expected_paths(&self) -> Vec<&str> {
        self.pages
            .iter()
            .chain(self.files.iter())
            .map(|f| f.path.as_str())
            .chain(self.assets.iter().map(String::as_str))
            .collect()
    }
}

/// One unit of staged work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactItem {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub goal: String,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub inputs: Vec<String>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub outputs: Vec<String>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub notes: Vec<String>,
}

impl ArtifactItem {
    pub fn new(id: impl Into<String>, goal: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            goal: goal.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            notes: Vec::new(),
        }
    }
}

/// Research findings gathered before generation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    #[serde(default)]
    pub sources: Vec<Value>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub notes: Vec<String>,
    #[serde(default, alias = "gotchas", deserialize_with = "lenient_strings")]
    pub caveats: Vec<String>,
    #[serde(
        default,
        alias = "recommended_examples",
        deserialize_with = "lenient_strings"
    )]
    pub examples: Vec<String>,
}

impl Evidence {
    /// Fallback when the research answer is not structured.
    pub fn from_raw(text: impl Into<String>) -> Self {
        Self {
            notes: vec![text.into()],
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
            && self.notes.is_empty()
            && self.caveats.is_empty()
            && self.examples.is_empty()
    }
}

/// The single mutable record threaded through a run.
///
/// `task` is fixed at construction. Only the orchestration graph owns a
/// `TaskState`; stages receive it by value and hand back the updated record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskState {
    task: String,
    pub mode: RunMode,
    pub spec: Option<ProjectSpec>,
    pub artifact_queue: VecDeque<ArtifactItem>,
    pub completed_artifacts: Vec<ArtifactItem>,
    /// `None` until Research has run; empty when research was skipped.
    pub evidence: Option<Evidence>,
    pub verification_targets: BTreeSet<String>,
    pub verification_passed: VerificationStatus,
    pub verification_log: VerificationLog,
    pub retry_count: u32,
    pub audit_findings: Vec<AuditFinding>,
    pub review: Option<String>,
}

impl TaskState {
    pub fn new(task: impl Into<String>, mode: RunMode) -> Self {
        Self {
            task: task.into(),
            mode,
            spec: None,
            artifact_queue: VecDeque::new(),
            completed_artifacts: Vec::new(),
            evidence: None,
            verification_targets: BTreeSet::new(),
            verification_passed: VerificationStatus::Unknown,
            verification_log: VerificationLog::NotRun,
            retry_count: 0,
            audit_findings: Vec::new(),
            review: None,
        }
    }

    /// The original request.
    pub fn task(&self) -> &str {
        &self.task
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::parse_structured;

    #[test]
    fn test_new_state_defaults() {
        let state = TaskState::new("build a site", RunMode::SingleShot);
        assert_eq!(state.task(), "build a site");
        assert_eq!(state.verification_passed, VerificationStatus::Unknown);
        assert_eq!(state.retry_count, 0);
        assert!(state.evidence.is_none());
        assert!(state.review.is_none());
    }

    #[test]
    fn test_spec_parsing_is_lenient() {
        let spec: ProjectSpec = parse_structured(
            r#"{
                "project_name": "arxiv-daily",
                "pages": [{"path": "index.html", "purpose": "home"}],
                "assets": ["css/site.css", {"path": "js/app.js"}],
                "notes": "single note",
                "deploy": "static"
            }"#,
        )
        .unwrap();

        assert_eq!(spec.project_name, "arxiv-daily");
        assert_eq!(spec.notes, vec!["single note"]);
        assert_eq!(spec.assets[0], "css/site.css");
        assert_eq!(spec.extra["deploy"], "static");
        assert_eq!(spec.expected_paths()[0], "index.html");
    }

    #[test]
    fn test_evidence_aliases() {
        let evidence: Evidence = parse_structured(
            r#"{"sources": [{"title": "API", "url": "https://x"}],
                "gotchas": ["rate limits"],
                "recommended_examples": ["curl ..."]}"#,
        )
        .unwrap();
        assert_eq!(evidence.caveats, vec!["rate limits"]);
        assert_eq!(evidence.examples, vec!["curl ..."]);
        assert!(!evidence.is_empty());
        assert!(Evidence::default().is_empty());
    }

    #[test]
    fn test_artifact_item_numeric_id() {
        let item: ArtifactItem =
            serde_json::from_str(r#"{"id": 3, "goal": "write validate.py"}"#).unwrap();
        assert_eq!(item.id, "3");
    }
}

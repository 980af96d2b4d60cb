//! System prompts and user-message builders for each stage.

use crate::task::{ArtifactItem, TaskState};

pub(super) const ANALYZE_SYSTEM: &str = "You turn a natural-language software request into a \
structured project specification. Respond with a single JSON object and nothing else, with keys: \
project_name, description, repo_type, pages (list of {path, purpose}), files (list of {path, purpose}), \
assets (list of paths), notes (list of strings), test_commands (list of shell commands), \
acceptance_criteria (list of strings), verification_targets (list of relative script paths that \
should exit 0 when the project works). Prefer a static site with pre-generated local data when \
the request involves remote data.";

pub(super) const PLAN_SYSTEM: &str = "You plan a software project as a short sequence of work \
units. Respond with a single JSON object and nothing else: {\"spec\": {...project specification \
with the keys project_name, description, repo_type, pages, files, assets, notes, test_commands, \
acceptance_criteria, verification_targets...}, \"tasks\": [{\"id\": 1, \"goal\": \"...\", \
\"inputs\": [], \"outputs\": [\"paths\"], \"notes\": []}]}. Use between 3 and 8 tasks, each \
small enough to finish in a few file writes.";

pub(super) const RESEARCH_SYSTEM: &str = "You research how to build the requested project. Use \
search_remote to find documentation and fetch_remote to read it. When done, answer with a single \
JSON object: {\"sources\": [{\"url\": \"...\", \"title\": \"...\"}], \"notes\": [\"...\"], \
\"caveats\": [\"...\"], \"examples\": [\"...\"]}. Keep notes concrete: endpoints, formats, limits.";

pub(super) const GENERATE_SYSTEM: &str = "You write project files into a sandboxed workspace \
using write_artifact, read_artifact and list_artifacts. Paths are relative to the workspace root. \
Write every file completely. Never make runtime requests to external hosts from browser code: use \
fetch_remote now, and write the data you need into a local data file (for example data/items.json) \
that the page loads instead. Do not write the same file twice. When every file is written, reply \
with a short summary and no tool calls.";

pub(super) const REVIEW_SYSTEM: &str = "You review a generated software project. Give a concise \
review: what was built, whether it meets the request, the verification result, and concrete \
problems. Do not claim tests passed unless the verification log shows they did.";

fn push_json<T: serde::Serialize>(out: &mut String, heading: &str, value: &T) {
    if let Ok(text) = serde_json::to_string_pretty(value) {
        out.push_str(&format!("\n\n## {heading}\n{text}"));
    }
}

pub(super) fn analyze_user(state: &TaskState) -> String {
    format!("Request:\n{}", state.task())
}

pub(super) fn research_user(state: &TaskState) -> String {
    let mut out = format!("Request:\n{}", state.task());
    if let Some(spec) = &state.spec {
        push_json(&mut out, "Specification", spec);
    }
    out
}

/// Context shared by both generation modes, plus retry feedback when present.
fn generate_context(state: &TaskState) -> String {
    let mut out = format!("Request:\n{}", state.task());
    if let Some(spec) = &state.spec {
        push_json(&mut out, "Specification", spec);
    }
    if let Some(evidence) = state.evidence.as_ref().filter(|e| !e.is_empty()) {
        push_json(&mut out, "Research", evidence);
    }
    if !state.verification_targets.is_empty() {
        let targets: Vec<&str> = state.verification_targets.iter().map(String::as_str).collect();
        out.push_str(&format!(
            "\n\n## Verification\nThese scripts must exist and exit 0: {}",
            targets.join(", ")
        ));
    }

    let failures = state.verification_log.failures();
    if !failures.is_empty() {
        out.push_str("\n\n## Previous verification failures\nFix the project so these pass:");
        for record in failures {
            let detail = serde_json::to_string(&record.outcome).unwrap_or_default();
            out.push_str(&format!("\n- {}: {}", record.target, detail));
        }
    }
    if !state.audit_findings.is_empty() {
        out.push_str("\n\n## Audit findings\nReplace these runtime requests with local data files:");
        for finding in &state.audit_findings {
            out.push_str(&format!("\n- {finding}"));
        }
    }
    out
}

pub(super) fn generate_user(state: &TaskState, existing: &[String]) -> String {
    let mut out = generate_context(state);
    if !existing.is_empty() {
        out.push_str(&format!("\n\n## Existing files\n{}", existing.join("\n")));
    }
    out.push_str("\n\nWrite the complete project now.");
    out
}

pub(super) fn generate_item_user(state: &TaskState, item: &ArtifactItem, existing: &[String]) -> String {
    let mut out = generate_context(state);
    if !state.completed_artifacts.is_empty() {
        out.push_str("\n\n## Completed work");
        for done in &state.completed_artifacts {
            out.push_str(&format!("\n- {}: {}", done.id, done.goal));
        }
    }
    if !existing.is_empty() {
        out.push_str(&format!("\n\n## Existing files\n{}", existing.join("\n")));
    }
    push_json(&mut out, "Current work unit", item);
    out.push_str("\n\nComplete only the current work unit.");
    out
}

pub(super) fn review_user(state: &TaskState, files: &[String], has_evidence: bool) -> String {
    let mut out = format!("Request:\n{}", state.task());
    if let Some(spec) = &state.spec {
        push_json(&mut out, "Specification", spec);
    }
    out.push_str(&format!(
        "\n\n## Files\n{}",
        if files.is_empty() { "(none)".to_string() } else { files.join("\n") }
    ));
    out.push_str(&format!(
        "\n\n## Verification (attempts: {})\n{}",
        state.retry_count,
        state.verification_log.render()
    ));
    if !has_evidence {
        out.push_str("\nNo test evidence exists: assess from structure and description only.");
    }
    if !state.audit_findings.is_empty() {
        out.push_str("\n\n## Audit findings");
        for finding in &state.audit_findings {
            out.push_str(&format!("\n- {finding}"));
        }
    }
    out
}

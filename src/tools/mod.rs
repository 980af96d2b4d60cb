//! Tool registry: the closed set of operations a stage may ask for.
//!
//! The collaborator names a tool and passes JSON arguments. [`ToolInvocation::parse`]
//! turns that into one typed variant (unknown name or bad arguments are errors
//! the loop reports inline); [`ToolRegistry::execute`] dispatches with an
//! exhaustive match.
//!
//! ## Tools
//! - `write_artifact(path, content)` → absolute path
//! - `read_artifact(path)` → content
//! - `list_artifacts(path = "")` → sorted relative paths
//! - `run_command(cmd, timeout_s ≤ 120)` → exit code + merged output
//! - `fetch_remote(url, timeout_s, max_bytes)` → status / error / body, never fails
//! - `search_remote(query, max_results ≤ 10)` → hits, never fails

mod file_ops;
mod terminal;
mod web;

pub use file_ops::{ListArtifactsArgs, ReadArtifactArgs, WriteArtifactArgs};
pub use terminal::{CommandResult, RunCommandArgs};
pub use web::{FetchRemoteArgs, FetchResult, SearchHit, SearchRemoteArgs, WebClient};

use std::fmt;
use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::llm::{FunctionDefinition, ToolDefinition};
use crate::sandbox::{Sandbox, SandboxError};

/// Names of every tool in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolName {
    WriteArtifact,
    ReadArtifact,
    ListArtifacts,
    RunCommand,
    FetchRemote,
    SearchRemote,
}

impl ToolName {
    pub const ALL: [ToolName; 6] = [
        Self::WriteArtifact,
        Self::ReadArtifact,
        Self::ListArtifacts,
        Self::RunCommand,
        Self::FetchRemote,
        Self::SearchRemote,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WriteArtifact => "write_artifact",
            Self::ReadArtifact => "read_artifact",
            Self::ListArtifacts => "list_artifacts",
            Self::RunCommand => "run_command",
            Self::FetchRemote => "fetch_remote",
            Self::SearchRemote => "search_remote",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tool| tool.as_str() == name)
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::WriteArtifact => "Write a file inside the project workspace. Creates parent directories. Each path may be written only once per run of this stage; include the full final content.",
            Self::ReadArtifact => "Read a file from the project workspace and return its content.",
            Self::ListArtifacts => "List all files under a workspace directory (default: the whole workspace). Returns sorted relative paths.",
            Self::RunCommand => "Run a shell command with the workspace as working directory. Returns the exit code and merged stdout/stderr.",
            Self::FetchRemote => "Fetch a URL (HTML page or API endpoint). Returns status, error and the decoded body text (truncated to max_bytes). Never fails; inspect status and error.",
            Self::SearchRemote => "Search the web. Returns a list of {title, url, snippet}.",
        }
    }

    pub fn parameters_schema(&self) -> Value {
        match self {
            Self::WriteArtifact => json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Path relative to the workspace, e.g. 'index.html' or 'js/app.js'. Do not prefix with the workspace directory."
                    },
                    "content": {
                        "type": "string",
                        "description": "Full file content to write"
                    }
                },
                "required": ["path", "content"]
            }),
            Self::ReadArtifact => json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Path relative to the workspace"
                    }
                },
                "required": ["path"]
            }),
            Self::ListArtifacts => json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Directory relative to the workspace (default: whole workspace)"
                    }
                }
            }),
            Self::RunCommand => json!({
                "type": "object",
                "properties": {
                    "cmd": {
                        "type": "string",
                        "description": "Shell command to run inside the workspace"
                    },
                    "timeout_s": {
                        "type": "integer",
                        "minimum": 1,
                        "maximum": 120,
                        "description": "Timeout in seconds (default: 30)"
                    }
                },
                "required": ["cmd"]
            }),
            Self::FetchRemote => json!({
                "type": "object",
                "properties": {
                    "url": {
                        "type": "string",
                        "description": "http(s) URL to fetch"
                    },
                    "timeout_s": {
                        "type": "integer",
                        "minimum": 5,
                        "maximum": 60,
                        "description": "Per-request timeout in seconds (default: 20)"
                    },
                    "max_bytes": {
                        "type": "integer",
                        "minimum": 1000,
                        "maximum": 200000,
                        "description": "Maximum response bytes to read (default: 50000)"
                    }
                },
                "required": ["url"]
            }),
            Self::SearchRemote => json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Search query"
                    },
                    "max_results": {
                        "type": "integer",
                        "minimum": 1,
                        "maximum": 10,
                        "description": "Maximum number of results (default: 5)"
                    }
                },
                "required": ["query"]
            }),
        }
    }

    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: self.as_str().to_string(),
                description: self.description().to_string(),
                parameters: self.parameters_schema(),
            },
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool {0}")]
    UnknownTool(String),

    #[error("tool {0} is not available in this stage")]
    NotPermitted(ToolName),

    #[error("invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: ToolName, reason: String },

    #[error(transparent)]
    Sandbox(#[from] SandboxError),
}

/// A fully validated tool call.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolInvocation {
    WriteArtifact(WriteArtifactArgs),
    ReadArtifact(ReadArtifactArgs),
    ListArtifacts(ListArtifactsArgs),
    RunCommand(RunCommandArgs),
    FetchRemote(FetchRemoteArgs),
    SearchRemote(SearchRemoteArgs),
}

impl ToolInvocation {
    /// Validate a named call with JSON-string arguments.
    pub fn parse(name: &str, arguments: &str) -> Result<Self, ToolError> {
        let tool = ToolName::from_name(name).ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;

        let raw: Value = if arguments.trim().is_empty() {
            json!({})
        } else {
            serde_json::from_str(arguments).map_err(|e| ToolError::InvalidArguments {
                tool,
                reason: format!("arguments are not valid JSON: {e}"),
            })?
        };

        let invocation = match tool {
            ToolName::WriteArtifact => Self::WriteArtifact(decode(tool, raw)?),
            ToolName::ReadArtifact => Self::ReadArtifact(decode(tool, raw)?),
            ToolName::ListArtifacts => Self::ListArtifacts(decode(tool, raw)?),
            ToolName::RunCommand => Self::RunCommand(decode(tool, raw)?),
            ToolName::FetchRemote => Self::FetchRemote(decode(tool, raw)?),
            ToolName::SearchRemote => Self::SearchRemote(decode(tool, raw)?),
        };

        invocation
            .validate()
            .map_err(|reason| ToolError::InvalidArguments { tool, reason })?;
        Ok(invocation)
    }

    pub fn name(&self) -> ToolName {
        match self {
            Self::WriteArtifact(_) => ToolName::WriteArtifact,
            Self::ReadArtifact(_) => ToolName::ReadArtifact,
            Self::ListArtifacts(_) => ToolName::ListArtifacts,
            Self::RunCommand(_) => ToolName::RunCommand,
            Self::FetchRemote(_) => ToolName::FetchRemote,
            Self::SearchRemote(_) => ToolName::SearchRemote,
        }
    }

    fn validate(&self) -> Result<(), String> {
        match self {
            Self::WriteArtifact(args) => args.validate(),
            Self::ReadArtifact(args) => args.validate(),
            Self::ListArtifacts(_) => Ok(()),
            Self::RunCommand(args) => args.validate(),
            Self::FetchRemote(args) => args.validate(),
            Self::SearchRemote(args) => args.validate(),
        }
    }
}

fn decode<T: DeserializeOwned>(tool: ToolName, raw: Value) -> Result<T, ToolError> {
    serde_json::from_value(raw).map_err(|e| ToolError::InvalidArguments {
        tool,
        reason: e.to_string(),
    })
}

/// Structured result of a successful tool call.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ToolOutput {
    Written { path: PathBuf },
    Content(String),
    Listing(Vec<String>),
    Command(CommandResult),
    Fetch(FetchResult),
    Search(Vec<SearchHit>),
}

impl ToolOutput {
    /// Text fed back to the collaborator.
    pub fn render(&self) -> String {
        match self {
            Self::Content(text) => text.clone(),
            other => serde_json::to_string(other).unwrap_or_else(|e| format!("unrenderable output: {e}")),
        }
    }
}

/// Executes validated invocations against one sandbox.
///
/// Stateless per call; cloning shares the HTTP connection pool.
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    sandbox: Sandbox,
    web: WebClient,
}

impl ToolRegistry {
    pub fn new(sandbox: Sandbox, web: WebClient) -> Self {
        Self { sandbox, web }
    }

    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    /// Definitions advertised to the collaborator for a stage's tool subset.
    pub fn definitions(allowed: &[ToolName]) -> Vec<ToolDefinition> {
        allowed.iter().map(ToolName::definition).collect()
    }

    pub async fn execute(&self, invocation: &ToolInvocation) -> Result<ToolOutput, ToolError> {
        tracing::debug!("Executing tool {}", invocation.name());

        let output = match invocation {
            ToolInvocation::WriteArtifact(args) => file_ops::write(&self.sandbox, args).await?,
            ToolInvocation::ReadArtifact(args) => file_ops::read(&self.sandbox, args).await?,
            ToolInvocation::ListArtifacts(args) => file_ops::list(&self.sandbox, args)?,
            ToolInvocation::RunCommand(args) => terminal::run(&self.sandbox, args).await?,
            ToolInvocation::FetchRemote(args) => ToolOutput::Fetch(self.web.fetch(args).await),
            ToolInvocation::SearchRemote(args) => ToolOutput::Search(self.web.search(args).await),
        };

        Ok(output)
    }
}

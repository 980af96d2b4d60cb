//! Artifact tools: write, read and list files inside the sandbox.

use serde::Deserialize;

use super::ToolOutput;
use crate::sandbox::{Sandbox, SandboxResult};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WriteArtifactArgs {
    pub path: String,
    pub content: String,
}

impl WriteArtifactArgs {
    pub(super) fn validate(&self) -> Result<(), String> {
        if self.path.trim().is_empty() {
            return Err("'path' must not be empty".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReadArtifactArgs {
    pub path: String,
}

impl ReadArtifactArgs {
    pub(super) fn validate(&self) -> Result<(), String> {
        if self.path.trim().is_empty() {
            return Err("'path' must not be empty".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ListArtifactsArgs {
    #[serde(default)]
    pub path: String,
}

pub(super) async fn write(sandbox: &Sandbox, args: &WriteArtifactArgs) -> SandboxResult<ToolOutput> {
    let path = sandbox.write(&args.path, &args.content).await?;
    tracing::info!("Wrote artifact {} ({} bytes)", args.path, args.content.len());
    Ok(ToolOutput::Written { path })
}

pub(super) async fn read(sandbox: &Sandbox, args: &ReadArtifactArgs) -> SandboxResult<ToolOutput> {
    sandbox.read(&args.path).await.map(ToolOutput::Content)
}

pub(super) fn list(sandbox: &Sandbox, args: &ListArtifactsArgs) -> SandboxResult<ToolOutput> {
    sandbox.list(&args.path).map(ToolOutput::Listing)
}

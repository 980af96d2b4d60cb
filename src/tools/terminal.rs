//! Shell command tool. Commands always run with the sandbox root as working directory.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ToolOutput;
use crate::sandbox::{Sandbox, SandboxResult, MAX_COMMAND_TIMEOUT};

const DEFAULT_TIMEOUT_SECS: u64 = 30;

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RunCommandArgs {
    #[serde(alias = "command")]
    pub cmd: String,
    #[serde(default = "default_timeout", alias = "timeout_secs")]
    pub timeout_s: u64,
}

impl RunCommandArgs {
    pub(super) fn validate(&self) -> Result<(), String> {
        if self.cmd.trim().is_empty() {
            return Err("'cmd' must not be empty".to_string());
        }
        Ok(())
    }

    /// Requested timeout, clamped to `[1s, MAX_COMMAND_TIMEOUT]`.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_s.clamp(1, MAX_COMMAND_TIMEOUT.as_secs()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandResult {
    pub exit_code: Option<i32>,
    pub output: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
}

pub(super) async fn run(sandbox: &Sandbox, args: &RunCommandArgs) -> SandboxResult<ToolOutput> {
    let output = sandbox.run_command(&args.cmd, args.timeout()).await?;
    Ok(ToolOutput::Command(CommandResult {
        exit_code: output.exit_code,
        output: output.output,
        truncated: output.truncated,
    }))
}

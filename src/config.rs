//! Process configuration, read once from the environment at startup.
//!
//! - `LLM_API_KEY` (or `OPENAI_API_KEY`): bearer token for the chat-completions endpoint
//! - `LLM_BASE_URL`: OpenAI-compatible base URL
//! - `LLM_MODEL` (or `OPENAI_MODEL`): model name
//! - `WORKSPACE_ROOT`: parent of every run's sandbox root
//! - `HOST` / `PORT`: HTTP bind address
//! - `ENABLE_PLANNING`: start runs in queued mode

use std::path::PathBuf;

use thiserror::Error;

use crate::task::RunMode;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("LLM_API_KEY (or OPENAI_API_KEY) must be set")]
    MissingApiKey,

    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub workspace_root: PathBuf,
    pub host: String,
    pub port: u16,
    pub enable_planning: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let api_key = get("LLM_API_KEY")
            .or_else(|| get("OPENAI_API_KEY"))
            .ok_or(ConfigError::MissingApiKey)?;

        let port = match get("PORT") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                name: "PORT",
                value: raw,
            })?,
            None => 5000,
        };

        let enable_planning = match get("ENABLE_PLANNING") {
            Some(raw) => parse_flag(&raw).ok_or(ConfigError::InvalidValue {
                name: "ENABLE_PLANNING",
                value: raw,
            })?,
            None => false,
        };

        Ok(Self {
            api_key,
            base_url: get("LLM_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: get("LLM_MODEL")
                .or_else(|| get("OPENAI_MODEL"))
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            workspace_root: get("WORKSPACE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("workspace")),
            host: get("HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port,
            enable_planning,
        })
    }

    pub fn run_mode(&self) -> RunMode {
        if self.enable_planning {
            RunMode::Queued
        } else {
            RunMode::SingleShot
        }
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

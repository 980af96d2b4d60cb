//! Replays canned responses in order; records every request it receives.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use super::{ChatMessage, ChatResponse, LlmClient, ToolCall, ToolDefinition};

pub(crate) struct ScriptedLlm {
    responses: Mutex<VecDeque<ChatResponse>>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedLlm {
    pub(crate) fn new(responses: Vec<ChatResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A final answer with no tool calls.
    pub(crate) fn text(content: impl Into<String>) -> ChatResponse {
        ChatResponse {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    /// A turn requesting the given `(tool name, arguments)` calls.
    pub(crate) fn calls(calls: &[(&str, Value)]) -> ChatResponse {
        let tool_calls = calls
            .iter()
            .enumerate()
            .map(|(i, (name, args))| ToolCall::function(format!("call_{i}"), *name, args.to_string()))
            .collect();
        ChatResponse {
            tool_calls: Some(tool_calls),
            ..Default::default()
        }
    }

    pub(crate) fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn remaining(&self) -> usize {
        self.responses.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn chat_completion(
        &self,
        _model: &str,
        messages: &[ChatMessage],
        _tools: Option<&[ToolDefinition]>,
    ) -> anyhow::Result<ChatResponse> {
        self.requests.lock().unwrap().push(messages.to_vec());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("script exhausted"))
    }
}

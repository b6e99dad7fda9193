//! Chat-completion wire shapes
//!
//! Output-only records produced by the [`Translator`]: a single aggregated
//! response for batch callers and `{choices: [..]}` delta chunks for streaming
//! callers.

mod translator;

use serde::Serialize;

use crate::error::Result;
use crate::llm::{FinishReason, ToolCall};

pub use translator::{ToolView, Translator, format_message};

/// Header selecting the assistant rendering of tool envelopes
pub const INTERFACE_HEADER: &str = "X-Ai-Interface";

/// Terminal line of an SSE response
pub const SSE_DONE: &str = "data: [DONE]\n\n";

/// Role attached to an outbound message or delta
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeltaRole {
    Assistant,
    Tool,
}

/// One outbound message or incremental update
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ChatDelta {
    /// Plain assistant text
    Content { role: DeltaRole, content: String },
    /// OpenAI-style tool call array (raw view)
    ToolCalls { role: DeltaRole, tool_calls: Vec<ToolCall> },
    /// Tool identity envelope (raw view)
    ToolResult {
        role: DeltaRole,
        id: Option<String>,
        tool_call_id: String,
        name: Option<String>,
        content: String,
    },
    /// Tool activity rendered for an assistant UI
    Step { role: DeltaRole, step_details: StepDetails },
}

impl ChatDelta {
    pub fn content(content: impl Into<String>) -> Self {
        ChatDelta::Content {
            role: DeltaRole::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepDetails {
    ToolResponse {
        id: Option<String>,
        tool_call_id: String,
        name: Option<String>,
        content: String,
    },
    ToolCalls { tool_calls: Vec<StepToolCall> },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepToolCall {
    pub id: String,
    pub name: String,
    /// Raw argument blob as returned by the model
    pub args: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ChatChoice {
    /// Batch choice; `message` is null when the final message has nothing to render
    Message { index: usize, message: Option<ChatDelta> },
    /// Streamed choice; a null `finish_reason` means more is coming
    Delta {
        index: usize,
        delta: ChatDelta,
        finish_reason: Option<FinishReason>,
    },
}

impl ChatChoice {
    pub fn finish_reason(&self) -> Option<&FinishReason> {
        match self {
            ChatChoice::Delta { finish_reason, .. } => finish_reason.as_ref(),
            ChatChoice::Message { .. } => None,
        }
    }
}

/// `{choices: [..]}` body shared by batch responses and stream chunks
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatChunk {
    pub choices: Vec<ChatChoice>,
}

impl ChatChunk {
    pub fn single(choice: ChatChoice) -> Self {
        Self { choices: vec![choice] }
    }

    /// Render as one SSE `data:` event
    pub fn to_sse(&self) -> Result<String> {
        Ok(format!("data: {}\n\n", serde_json::to_string(self)?))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseHeaders {
    #[serde(rename = "Content-Type")]
    pub content_type: String,
}

impl Default for ResponseHeaders {
    fn default() -> Self {
        Self {
            content_type: "application/json".to_string(),
        }
    }
}

/// Aggregated response of a batch request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchResponse {
    pub headers: ResponseHeaders,
    pub body: ChatChunk,
}

impl BatchResponse {
    pub fn new(message: Option<ChatDelta>) -> Self {
        Self {
            headers: ResponseHeaders::default(),
            body: ChatChunk::single(ChatChoice::Message { index: 0, message }),
        }
    }
}

//! LLM integration - OpenAI-compatible API
//!
//! This module provides:
//! - HTTP client for chat completions, forced tool calls and embeddings
//! - Request/response types matching the OpenAI-compatible API
//! - Streaming response support
//! - The `ChatModel` and `Embedder` seams the workflow depends on

mod client;
mod streaming;
mod types;

use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;

use crate::error::Result;

pub use client::{LlmClient, LlmClientBuilder};
pub use streaming::{StreamChoice, StreamChunk, StreamDelta, StreamEvent, parse_sse_line};
pub use types::{
    ChatRequest, ChatResponse, Choice, FinishReason, FunctionCall, FunctionDefinition, LlmResponse, Message,
    MessageRole, ToolCall, ToolChoice, ToolDefinition, Usage,
};

/// Boxed stream of parsed streaming-completion events
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// Chat completion collaborator
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Completion forced to call `tool`
    async fn chat_with_tool(&self, messages: Vec<Message>, tool: ToolDefinition) -> Result<Message>;

    /// Streaming completion
    async fn chat_stream(&self, messages: Vec<Message>) -> Result<TokenStream>;
}

/// Text embedding collaborator
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

//! graphrag Core Library
//!
//! This crate provides the core functionality for graphrag, including:
//! - Routed retrieval workflow (router, graph search, vector retrieval, generation)
//! - Knowledge graph access (Neo4j, fuzzy full-text lookup, entity extraction)
//! - LLM integration (OpenAI-compatible chat, tool calls, streaming, embeddings)
//! - Chat-completion protocol translation (batch responses and delta streams)
//! - Configuration and error handling

pub mod config;
pub mod error;
pub mod knowledge;
pub mod llm;
pub mod protocol;
pub mod service;
pub mod workflow;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::protocol::{BatchResponse, ChatChunk, ToolView};
    pub use crate::service::{ChatService, InboundRequest};
    pub use crate::workflow::{ConversationState, Route, WorkflowFactory};
}

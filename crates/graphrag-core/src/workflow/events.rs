//! Events produced while a workflow executes

use tokio::sync::mpsc;

use crate::llm::{FinishReason, Message};

use super::graph::NodeId;
use super::state::ConversationState;

/// Incremental model output published while a node is still running
#[derive(Debug, Clone, PartialEq)]
pub struct TokenEvent {
    /// Node that produced the token
    pub node: NodeId,
    /// Completion id shared by every token of one message
    pub id: Option<String>,
    /// Content fragment, possibly empty on the final token
    pub content: String,
    /// Set on the last token of a message
    pub finish_reason: Option<FinishReason>,
}

/// Messages a node appended to the state
#[derive(Debug, Clone, PartialEq)]
pub struct StepEvent {
    pub node: NodeId,
    pub messages: Vec<Message>,
}

/// Event emitted by `Workflow::stream`
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowEvent {
    Token(TokenEvent),
    Step(StepEvent),
    /// Terminal state, always the last event of a successful run
    Finished(ConversationState),
}

/// Channel nodes publish tokens on
pub type TokenSender = mpsc::UnboundedSender<TokenEvent>;

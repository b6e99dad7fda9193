//! Workflow output to chat-completion translation

use tracing::debug;

use crate::error::{Error, Result};
use crate::llm::{FinishReason, Message, MessageRole};
use crate::workflow::{ConversationState, NodeId, StepEvent, TokenEvent, WorkflowEvent};

use super::{
    BatchResponse, ChatChoice, ChatChunk, ChatDelta, DeltaRole, INTERFACE_HEADER, StepDetails, StepToolCall,
};

/// How tool activity is rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToolView {
    /// `step_details` envelopes for assistant UIs
    Assistant,
    /// OpenAI-style tool messages and `tool_calls` arrays
    #[default]
    Raw,
}

impl ToolView {
    /// Select the view from the value of the interface header
    pub fn from_header(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some("assistant") => ToolView::Assistant,
            _ => ToolView::Raw,
        }
    }

    /// Select the view from request headers; header names match case-insensitively
    pub fn from_headers<'a, I>(headers: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let value = headers
            .into_iter()
            .find(|(name, _)| name.trim().eq_ignore_ascii_case(INTERFACE_HEADER))
            .map(|(_, value)| value);
        Self::from_header(value)
    }
}

/// Render one message, or `None` when it has neither content nor tool calls
pub fn format_message(message: &Message, view: ToolView) -> Result<Option<ChatDelta>> {
    if !message.content.is_empty() {
        return match message.role {
            MessageRole::Assistant => Ok(Some(ChatDelta::content(message.content.clone()))),
            MessageRole::Tool => tool_result(message, view).map(Some),
            _ => Ok(None),
        };
    }

    if message.role != MessageRole::Assistant {
        return Ok(None);
    }
    let Some(call) = message.tool_calls.first() else {
        return Ok(None);
    };
    if call.id.is_empty() {
        return Err(Error::ProtocolError(format!(
            "tool call '{}' has no id",
            call.function.name
        )));
    }

    let delta = match view {
        ToolView::Assistant => ChatDelta::Step {
            role: DeltaRole::Assistant,
            step_details: StepDetails::ToolCalls {
                tool_calls: vec![StepToolCall {
                    id: call.id.clone(),
                    name: call.function.name.clone(),
                    args: call.function.arguments.clone(),
                }],
            },
        },
        ToolView::Raw => ChatDelta::ToolCalls {
            role: DeltaRole::Assistant,
            tool_calls: vec![call.clone()],
        },
    };
    Ok(Some(delta))
}

fn tool_result(message: &Message, view: ToolView) -> Result<ChatDelta> {
    let tool_call_id = message
        .tool_call_id
        .clone()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| Error::ProtocolError("tool message is not correlated to a tool call".to_string()))?;

    Ok(match view {
        ToolView::Assistant => ChatDelta::Step {
            role: DeltaRole::Assistant,
            step_details: StepDetails::ToolResponse {
                id: message.id.clone(),
                tool_call_id,
                name: message.name.clone(),
                content: message.content.clone(),
            },
        },
        ToolView::Raw => ChatDelta::ToolResult {
            role: DeltaRole::Tool,
            id: message.id.clone(),
            tool_call_id,
            name: message.name.clone(),
            content: message.content.clone(),
        },
    })
}

/// Maps workflow results and events onto the wire shapes
#[derive(Debug, Clone, Copy, Default)]
pub struct Translator {
    view: ToolView,
}

impl Translator {
    pub fn new(view: ToolView) -> Self {
        Self { view }
    }

    pub fn view(&self) -> ToolView {
        self.view
    }

    /// Single choice for the last message of a finished run
    pub fn batch(&self, state: &ConversationState) -> Result<BatchResponse> {
        let message = match state.last_message() {
            Some(last) => format_message(last, self.view)?,
            None => None,
        };
        Ok(BatchResponse::new(message))
    }

    /// Chunk for one event, or `None` if the event is not forwarded
    pub fn translate(&self, event: &WorkflowEvent) -> Result<Option<ChatChunk>> {
        match event {
            WorkflowEvent::Token(token) => Ok(token_chunk(token)),
            WorkflowEvent::Step(step) => self.step(step),
            WorkflowEvent::Finished(_) => Ok(None),
        }
    }

    fn step(&self, step: &StepEvent) -> Result<Option<ChatChunk>> {
        let Some(message) = step.messages.first() else {
            return Ok(None);
        };

        match step.node {
            NodeId::Agent => {
                if message.finish_reason == Some(FinishReason::Stop) {
                    debug!(node = %step.node, "Suppressing step already delivered as tokens");
                    return Ok(None);
                }
            }
            NodeId::VectorRetriever => {}
            NodeId::GraphSearch | NodeId::Generate => return Ok(None),
        }

        Ok(format_message(message, self.view)?.map(|delta| chunk(delta, message.finish_reason.clone())))
    }
}

/// Tokens follow the message rule: no content, no chunk, whatever the finish reason
fn token_chunk(token: &TokenEvent) -> Option<ChatChunk> {
    if token.content.is_empty() {
        return None;
    }
    Some(chunk(
        ChatDelta::content(token.content.clone()),
        token.finish_reason.clone(),
    ))
}

fn chunk(delta: ChatDelta, finish_reason: Option<FinishReason>) -> ChatChunk {
    ChatChunk::single(ChatChoice::Delta {
        index: 0,
        delta,
        finish_reason,
    })
}

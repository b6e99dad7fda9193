//! Request handling: inbound chat bodies in, batch responses or chunk streams out

use std::pin::Pin;
use std::sync::Arc;

use futures_core::Stream;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::knowledge::Neo4jStore;
use crate::llm::{LlmClient, Message, MessageRole};
use crate::protocol::{BatchResponse, ChatChunk, ToolView, Translator};
use crate::workflow::{Collaborators, ConversationState, EventStream, WorkflowFactory, drain};

/// Stream of protocol chunks for one request
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<ChatChunk>> + Send>>;

/// `{role, content}` as sent by callers
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InboundMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
}

/// Body of a chat request
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InboundRequest {
    #[serde(default)]
    pub messages: Vec<InboundMessage>,
}

impl InboundRequest {
    pub fn from_json(body: &str) -> Result<Self> {
        Ok(serde_json::from_str(body)?)
    }

    /// Single user question
    pub fn question(text: impl Into<String>) -> Self {
        Self {
            messages: vec![InboundMessage {
                role: "user".to_string(),
                content: Some(text.into()),
            }],
        }
    }

    /// Prepend a system message that overrides the default persona
    pub fn with_system(mut self, text: impl Into<String>) -> Self {
        self.messages.insert(
            0,
            InboundMessage {
                role: "system".to_string(),
                content: Some(text.into()),
            },
        );
        self
    }

    /// Split into the persona override and the conversation
    ///
    /// Only a leading system message overrides the persona; system messages
    /// elsewhere stay in the conversation. Unknown roles are treated as user input.
    pub fn into_conversation(self) -> Result<(Option<String>, Vec<Message>)> {
        if self.messages.is_empty() {
            return Err(Error::InvalidInput("request has no messages".to_string()));
        }

        let mut messages: Vec<Message> = self
            .messages
            .into_iter()
            .map(|m| {
                let content = m.content.unwrap_or_default();
                match m.role.as_str() {
                    "assistant" => Message::assistant(content),
                    "system" => Message::system(content),
                    _ => Message::user(content),
                }
            })
            .collect();

        let system = if messages[0].role == MessageRole::System {
            Some(messages.remove(0).content)
        } else {
            None
        };
        Ok((system, messages))
    }
}

/// Runs requests against a workflow compiled per request
#[derive(Clone)]
pub struct ChatService {
    factory: WorkflowFactory,
}

impl ChatService {
    pub fn new(factory: WorkflowFactory) -> Self {
        Self { factory }
    }

    /// Wire the LLM client and, when configured, the Neo4j store
    ///
    /// Fails fast on invalid configuration, a missing API key or an unreachable
    /// graph. Without a graph connection the retrieval route reports
    /// `RetrievalUnavailable` per request.
    pub async fn connect(config: &Config) -> Result<Self> {
        config.validate().map_err(config_error)?;

        let api_key = config
            .llm
            .resolved_api_key()
            .map_err(config_error)?
            .ok_or_else(|| Error::ConfigError("no API key in GRAPHRAG_API_KEY or OPENAI_API_KEY".to_string()))?;
        let client = Arc::new(LlmClient::new(config.llm.clone(), api_key)?);

        let mut deps = Collaborators::new(client.clone());
        match config.graph.resolve().map_err(config_error)? {
            Some(connection) => {
                let store = Arc::new(Neo4jStore::connect(&connection, config.retrieval.clone(), client).await?);
                deps = deps.with_graph(store.clone()).with_vectors(store);
            }
            None => warn!("No graph database configured; retrieval route is unavailable"),
        }

        Ok(Self::new(WorkflowFactory::from_config(deps, config)?))
    }

    fn start(&self, request: InboundRequest, cancel: CancellationToken) -> Result<EventStream> {
        let (system, messages) = request.into_conversation()?;
        debug!(
            messages = messages.len(),
            system_override = system.is_some(),
            "Starting workflow"
        );

        let workflow = self.factory.build(system)?;
        Ok(workflow.stream(ConversationState::new(messages), cancel))
    }

    /// Run to completion and render the final message
    pub async fn generate(
        &self,
        request: InboundRequest,
        view: ToolView,
        cancel: CancellationToken,
    ) -> Result<BatchResponse> {
        let state = drain(self.start(request, cancel)?).await?;

        info!(
            route = state.route.map(|r| r.as_str()).unwrap_or("none"),
            messages = state.messages.len(),
            "Request completed"
        );
        Translator::new(view).batch(&state)
    }

    /// Forward workflow events as chunks while the workflow runs
    pub fn generate_stream(
        &self,
        request: InboundRequest,
        view: ToolView,
        cancel: CancellationToken,
    ) -> Result<ChunkStream> {
        let events = self.start(request, cancel)?;
        Ok(Box::pin(forward(events, Translator::new(view))))
    }
}

fn config_error(err: anyhow::Error) -> Error {
    Error::ConfigError(err.to_string())
}

fn forward(mut events: EventStream, translator: Translator) -> impl Stream<Item = Result<ChatChunk>> + Send + 'static {
    async_stream::try_stream! {
        let mut sent = 0usize;
        while let Some(event) = events.next().await {
            if let Some(chunk) = translator.translate(&event?)? {
                sent += 1;
                yield chunk;
            }
        }
        info!(chunks = sent, "Stream completed");
    }
}

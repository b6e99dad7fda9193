//! Node handlers: router, graph search, passage retrieval and generation

use std::sync::Arc;

use futures_util::StreamExt;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::RetrievalConfig;
use crate::error::{Error, Result};
use crate::knowledge::{EntityExtractor, GraphRetriever, GraphStore, VectorStore};
use crate::llm::{ChatModel, FinishReason, Message, MessageRole, StreamEvent, ToolDefinition};

use super::events::{TokenEvent, TokenSender};
use super::graph::NodeId;
use super::state::{ConversationState, Route, StateUpdate};

/// Name of the routing tool; also names the tool message carrying retrieved context
pub const ROUTER_TOOL: &str = "Router";

const GRAPH_INSTRUCTION: &str = "Answer the question based only on the context retrieved from graph knowledge graph.";
const OWN_KNOWLEDGE_INSTRUCTION: &str = "Answer the question based only on the own knowledge.";

/// External collaborators shared by every workflow execution
#[derive(Clone)]
pub struct Collaborators {
    pub chat: Arc<dyn ChatModel>,
    pub graph: Option<Arc<dyn GraphStore>>,
    pub vectors: Option<Arc<dyn VectorStore>>,
}

impl Collaborators {
    /// Chat model only; retrieval nodes report the stores as unavailable
    pub fn new(chat: Arc<dyn ChatModel>) -> Self {
        Self {
            chat,
            graph: None,
            vectors: None,
        }
    }

    pub fn with_graph(mut self, graph: Arc<dyn GraphStore>) -> Self {
        self.graph = Some(graph);
        self
    }

    pub fn with_vectors(mut self, vectors: Arc<dyn VectorStore>) -> Self {
        self.vectors = Some(vectors);
        self
    }
}

#[derive(Debug, Deserialize)]
struct RouterArgs {
    route: String,
}

fn router_tool() -> ToolDefinition {
    ToolDefinition::function(
        ROUTER_TOOL,
        "Select the next step of the workflow.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "route": {
                    "type": "string",
                    "enum": [Route::GraphKnowledgeBase.as_str(), Route::FinalAnswer.as_str()],
                    "description": "Use 'graph_knowledge_base' when the knowledge graph can answer the question, otherwise 'final_answer'."
                }
            },
            "required": ["route"]
        }),
    )
}

fn router_prompt(description: &str) -> String {
    format!(
        "You are helpful assistant who specializes in routing the workflow. \
         You have access to the knowledge graph database.\n\
         The knowledge graph description: {}. \
         If the user's question concerns information contained in the knowledge graph please respond with \
         'graph_knowledge_base'. Otherwise, respond with 'final_answer'.",
        description
    )
}

/// Context handed to the generator as the tool result
pub fn compose_context(structured_data: &str, passages: &[String]) -> String {
    let documents = passages
        .iter()
        .map(|text| format!("#Document:\n{}\n", text))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Structured data:\n{}\nUnstructured data:\n{}\n",
        structured_data, documents
    )
}

/// Per-execution node handlers
pub(crate) struct NodeHandlers {
    chat: Arc<dyn ChatModel>,
    extractor: EntityExtractor,
    graph: Option<GraphRetriever>,
    vectors: Option<Arc<dyn VectorStore>>,
    top_k: usize,
    system_prompt: String,
    graph_description: String,
}

impl NodeHandlers {
    pub(crate) fn new(
        deps: &Collaborators,
        retrieval: &RetrievalConfig,
        system_prompt: String,
        graph_description: String,
    ) -> Result<Self> {
        let graph = match &deps.graph {
            Some(store) => Some(GraphRetriever::new(store.clone(), retrieval.clone())?),
            None => None,
        };

        Ok(Self {
            chat: deps.chat.clone(),
            extractor: EntityExtractor::new(deps.chat.clone()),
            graph,
            vectors: deps.vectors.clone(),
            top_k: retrieval.top_k,
            system_prompt,
            graph_description,
        })
    }

    pub(crate) fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub(crate) async fn run(
        &self,
        node: NodeId,
        state: &ConversationState,
        tokens: TokenSender,
    ) -> Result<StateUpdate> {
        match node {
            NodeId::Agent => self.route(state).await,
            NodeId::GraphSearch => self.graph_search(state).await,
            NodeId::VectorRetriever => self.retrieve_passages(state).await,
            NodeId::Generate => self.generate(state, tokens).await,
        }
    }

    async fn route(&self, state: &ConversationState) -> Result<StateUpdate> {
        let last = state
            .last_message()
            .ok_or_else(|| Error::InvalidInput("conversation has no messages".to_string()))?;
        if last.role != MessageRole::User {
            return Err(Error::InvalidInput(format!(
                "last message must come from the user, got '{}'",
                last.role
            )));
        }
        let question = last.content.clone();

        let messages = vec![
            Message::system(router_prompt(&self.graph_description)),
            Message::user(format!("User query: {}", question)),
        ];
        let response = self.chat.chat_with_tool(messages, router_tool()).await?;

        let call = response
            .tool_calls
            .first()
            .ok_or_else(|| Error::RoutingFailed("model returned no tool call".to_string()))?;
        let args: RouterArgs = call
            .parse_arguments()
            .map_err(|e| Error::RoutingFailed(format!("undecodable Router arguments: {}", e)))?;
        let route: Route = args.route.parse()?;

        info!(route = %route, "Route selected");

        let messages = match route {
            Route::GraphKnowledgeBase => vec![response.with_finish_reason(FinishReason::ToolCalls)],
            Route::FinalAnswer => Vec::new(),
        };

        Ok(StateUpdate {
            question: Some(question),
            route: Some(route),
            messages,
            ..StateUpdate::default()
        })
    }

    async fn graph_search(&self, state: &ConversationState) -> Result<StateUpdate> {
        let retriever = self
            .graph
            .as_ref()
            .ok_or_else(|| Error::RetrievalUnavailable("graph store is not configured".to_string()))?;

        let entities = self.extractor.extract(&state.question).await?;
        if entities.is_empty() {
            debug!("No entities found, skipping graph lookup");
        }

        let lines = retriever.retrieve(&entities).await?;
        info!(
            entities = entities.len(),
            relationships = lines.len(),
            "Graph search complete"
        );

        Ok(StateUpdate {
            structured_data: Some(lines.join("\n")),
            ..StateUpdate::default()
        })
    }

    async fn retrieve_passages(&self, state: &ConversationState) -> Result<StateUpdate> {
        let store = self
            .vectors
            .as_ref()
            .ok_or_else(|| Error::RetrievalUnavailable("vector store is not configured".to_string()))?;

        let tool_call_id = pending_tool_call_id(state)?;

        let passages = store
            .similarity_search(&state.question, self.top_k)
            .await
            .map_err(|e| match e {
                Error::RetrievalUnavailable(_) => e,
                other => Error::RetrievalUnavailable(format!("similarity search failed: {}", other)),
            })?;

        let texts: Vec<String> = passages.into_iter().map(|p| p.text).collect();
        let context = compose_context(&state.structured_data, &texts);
        info!(passages = texts.len(), "Passage retrieval complete");

        Ok(StateUpdate {
            unstructured_data: Some(texts),
            messages: vec![Message::tool(context, tool_call_id, ROUTER_TOOL)],
            ..StateUpdate::default()
        })
    }

    async fn generate(&self, state: &ConversationState, tokens: TokenSender) -> Result<StateUpdate> {
        let instruction = if state.structured_data.trim().is_empty() {
            OWN_KNOWLEDGE_INSTRUCTION
        } else {
            GRAPH_INSTRUCTION
        };

        let mut messages = Vec::with_capacity(state.messages.len() + 2);
        messages.push(Message::system(self.system_prompt.clone()));
        messages.extend(state.messages.iter().cloned());
        messages.push(Message::user(format!(
            "{}\n\nQuestion: {}",
            instruction, state.question
        )));

        let mut stream = self.chat.chat_stream(messages).await?;

        let mut id: Option<String> = None;
        let mut content = String::new();
        let mut finish_reason = None;

        while let Some(event) = stream.next().await {
            match event? {
                StreamEvent::Chunk(chunk) => {
                    if id.is_none() && !chunk.id.is_empty() {
                        id = Some(chunk.id.clone());
                    }
                    let fragment = chunk.content().unwrap_or_default().to_string();
                    let reason = chunk.finish_reason().cloned();
                    if fragment.is_empty() && reason.is_none() {
                        continue;
                    }

                    content.push_str(&fragment);
                    if reason.is_some() {
                        finish_reason = reason.clone();
                    }
                    publish(&tokens, id.clone(), fragment, reason);
                }
                StreamEvent::Done => break,
                StreamEvent::Error(message) => return Err(Error::LLMError(message)),
            }
        }

        let finish_reason = finish_reason.unwrap_or(FinishReason::Stop);
        let mut answer = Message::assistant(content).with_finish_reason(finish_reason);
        answer.id = id;

        Ok(StateUpdate {
            messages: vec![answer],
            ..StateUpdate::default()
        })
    }
}

fn publish(tokens: &TokenSender, id: Option<String>, content: String, finish_reason: Option<FinishReason>) {
    let event = TokenEvent {
        node: NodeId::Generate,
        id,
        content,
        finish_reason,
    };
    if tokens.send(event).is_err() {
        warn!("Token receiver dropped");
    }
}

/// Id of the tool call the retrieved context answers
fn pending_tool_call_id(state: &ConversationState) -> Result<String> {
    let last = state
        .last_message()
        .filter(|m| m.role == MessageRole::Assistant)
        .ok_or_else(|| Error::ProtocolError("expected an assistant tool-call message before retrieval".to_string()))?;

    match last.tool_calls.first() {
        Some(call) if !call.id.trim().is_empty() => Ok(call.id.clone()),
        Some(_) => Err(Error::ProtocolError("tool call id is empty".to_string())),
        None => Err(Error::ProtocolError(
            "assistant message carries no tool call to answer".to_string(),
        )),
    }
}

//! graphrag Core Integration Tests

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use graphrag_core::{
    Error, Result,
    config::{Config, RetrievalConfig, WorkflowConfig},
    knowledge::{GraphStore, Params, Passage, Row, VectorStore, build_fuzzy_query},
    llm::{
        ChatModel, FinishReason, Message, MessageRole, StreamChunk, StreamEvent, TokenStream, ToolCall,
        ToolDefinition,
    },
    protocol::{ToolView, Translator},
    service::{ChatService, InboundRequest},
    workflow::{
        Collaborators, ConversationState, NodeId, Route, StepEvent, TokenEvent, WorkflowEvent, WorkflowFactory,
    },
};

const QUESTION: &str = "Who supplies Globex?";

/// Chat model replaying a fixed route, entity list and token sequence
struct ScriptedChat {
    route: Option<&'static str>,
    tokens: Vec<&'static str>,
    prompts: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedChat {
    fn new(route: Option<&'static str>, tokens: Vec<&'static str>) -> Arc<Self> {
        Arc::new(Self {
            route,
            tokens,
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn generation_prompt(&self) -> Vec<Message> {
        self.prompts.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl ChatModel for ScriptedChat {
    async fn chat_with_tool(&self, messages: Vec<Message>, tool: ToolDefinition) -> Result<Message> {
        self.prompts.lock().unwrap().push(messages);
        let calls = match (tool.name(), self.route) {
            ("Router", Some(route)) => vec![ToolCall::new(
                "call_route",
                "Router",
                format!(r#"{{"route":"{}"}}"#, route),
            )],
            ("Router", None) => Vec::new(),
            _ => vec![ToolCall::new("call_entities", "Entities", r#"{"names":["Acme","Globex"]}"#)],
        };
        Ok(Message::assistant_tool_calls(calls)
            .with_id("chatcmpl-tool")
            .with_finish_reason(FinishReason::Stop))
    }

    async fn chat_stream(&self, messages: Vec<Message>) -> Result<TokenStream> {
        self.prompts.lock().unwrap().push(messages);
        let mut events: Vec<Result<StreamEvent>> = self
            .tokens
            .iter()
            .map(|t| Ok(StreamEvent::Chunk(StreamChunk::delta("chatcmpl-gen", Some(*t), None))))
            .collect();
        events.push(Ok(StreamEvent::Chunk(StreamChunk::delta(
            "chatcmpl-gen",
            None,
            Some(FinishReason::Stop),
        ))));
        events.push(Ok(StreamEvent::Done));
        Ok(Box::pin(futures_util::stream::iter(events)))
    }
}

struct FixedGraph;

#[async_trait]
impl GraphStore for FixedGraph {
    async fn query(&self, _cypher: &str, params: Params, _columns: &[&str]) -> Result<Vec<Row>> {
        let query = params.get("query").and_then(Value::as_str).unwrap_or_default();
        let line = if query.starts_with("Acme") {
            "Acme - SUPPLIES -> Globex"
        } else {
            "Globex - LOCATED_IN -> Springfield"
        };
        Ok(vec![Row::from([("output".to_string(), json!(line))])])
    }
}

struct FixedVectors {
    passages: Vec<&'static str>,
}

#[async_trait]
impl VectorStore for FixedVectors {
    async fn similarity_search(&self, _query: &str, k: usize) -> Result<Vec<Passage>> {
        Ok(self
            .passages
            .iter()
            .take(k)
            .map(|p| Passage::new(*p, 0.8))
            .collect())
    }
}

struct DownVectors;

#[async_trait]
impl VectorStore for DownVectors {
    async fn similarity_search(&self, _query: &str, _k: usize) -> Result<Vec<Passage>> {
        Err(Error::Other("connection refused".to_string()))
    }
}

fn stores(chat: Arc<ScriptedChat>) -> Collaborators {
    Collaborators::new(chat)
        .with_graph(Arc::new(FixedGraph))
        .with_vectors(Arc::new(FixedVectors {
            passages: vec!["Acme has supplied Globex since 1998."],
        }))
}

fn factory(deps: Collaborators) -> WorkflowFactory {
    WorkflowFactory::new(deps, RetrievalConfig::default(), WorkflowConfig::default()).unwrap()
}

fn service(deps: Collaborators) -> ChatService {
    ChatService::new(factory(deps))
}

async fn run(deps: Collaborators) -> Result<ConversationState> {
    factory(deps)
        .build(None)?
        .invoke(
            ConversationState::new(vec![Message::user(QUESTION)]),
            CancellationToken::new(),
        )
        .await
}

#[test]
fn test_fuzzy_query_examples() {
    assert_eq!(build_fuzzy_query("Galaxium Travels").unwrap(), "Galaxium~2 AND Travels~2");
    assert_eq!(build_fuzzy_query("Acme").unwrap(), "Acme~2");
}

#[tokio::test]
async fn test_retrieval_path() {
    let chat = ScriptedChat::new(Some("graph_knowledge_base"), vec!["Acme ", "does."]);
    let state = run(stores(chat.clone())).await.unwrap();

    assert_eq!(state.route, Some(Route::GraphKnowledgeBase));
    assert_eq!(state.question, QUESTION);
    assert_eq!(
        state.structured_data,
        "Acme - SUPPLIES -> Globex\nGlobex - LOCATED_IN -> Springfield"
    );
    assert_eq!(state.unstructured_data, vec!["Acme has supplied Globex since 1998."]);

    let roles: Vec<MessageRole> = state.messages.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![
            MessageRole::User,
            MessageRole::Assistant,
            MessageRole::Tool,
            MessageRole::Assistant
        ]
    );

    let router = &state.messages[1];
    let tool = &state.messages[2];
    assert_eq!(router.finish_reason, Some(FinishReason::ToolCalls));
    assert_eq!(tool.tool_call_id.as_deref(), Some(router.tool_calls[0].id.as_str()));
    assert!(tool.content.starts_with("Structured data:\nAcme - SUPPLIES -> Globex"));
    assert!(tool.content.contains("#Document:\nAcme has supplied Globex since 1998."));

    let answer = state.answer().unwrap();
    assert_eq!(answer.content, "Acme does.");
    assert_eq!(answer.finish_reason, Some(FinishReason::Stop));

    let prompt = chat.generation_prompt();
    let instruction = &prompt.last().unwrap().content;
    assert!(instruction.contains("context retrieved from graph knowledge graph"));
    assert!(instruction.ends_with(&format!("Question: {}", QUESTION)));
}

#[tokio::test]
async fn test_direct_path() {
    let chat = ScriptedChat::new(Some("final_answer"), vec!["Hello"]);
    let deps = Collaborators::new(chat.clone());

    let events: Vec<WorkflowEvent> = factory(deps)
        .build(None)
        .unwrap()
        .stream(
            ConversationState::new(vec![Message::user("Hi there")]),
            CancellationToken::new(),
        )
        .map(|e| e.unwrap())
        .collect()
        .await;

    let steps: Vec<NodeId> = events
        .iter()
        .filter_map(|e| match e {
            WorkflowEvent::Step(step) => Some(step.node),
            _ => None,
        })
        .collect();
    assert_eq!(steps, vec![NodeId::Agent, NodeId::Generate]);

    let Some(WorkflowEvent::Finished(state)) = events.last() else {
        panic!("last event must carry the terminal state");
    };
    assert_eq!(state.route, Some(Route::FinalAnswer));
    assert_eq!(state.messages.len(), 2);
    assert!(state.structured_data.is_empty());
    assert!(chat.generation_prompt().last().unwrap().content.contains("own knowledge"));
}

#[tokio::test]
async fn test_idempotent_runs() {
    let first = run(stores(ScriptedChat::new(Some("graph_knowledge_base"), vec!["Yes"])))
        .await
        .unwrap();
    let second = run(stores(ScriptedChat::new(Some("graph_knowledge_base"), vec!["Yes"])))
        .await
        .unwrap();

    assert_eq!(first.route, second.route);
    assert_eq!(first.messages, second.messages);
}

#[tokio::test]
async fn test_batch_hello() {
    let svc = service(Collaborators::new(ScriptedChat::new(Some("final_answer"), vec!["Hel", "lo"])));
    let response = svc
        .generate(InboundRequest::question("Hi"), ToolView::Raw, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        serde_json::to_value(&response).unwrap(),
        json!({
            "headers": {"Content-Type": "application/json"},
            "body": {"choices": [{"index": 0, "message": {"role": "assistant", "content": "Hello"}}]}
        })
    );
}

#[tokio::test]
async fn test_system_override() {
    let chat = ScriptedChat::new(Some("final_answer"), vec!["Ok"]);
    let svc = service(Collaborators::new(chat.clone()));
    let request = InboundRequest::question("Hi").with_system("Answer like a pirate.");

    svc.generate(request, ToolView::Raw, CancellationToken::new())
        .await
        .unwrap();

    let prompt = chat.generation_prompt();
    assert_eq!(prompt[0].role, MessageRole::System);
    assert_eq!(prompt[0].content, "Answer like a pirate.");
    assert!(!prompt[1..].iter().any(|m| m.role == MessageRole::System));
}

#[tokio::test]
async fn test_stream_raw_view() {
    let svc = service(stores(ScriptedChat::new(Some("graph_knowledge_base"), vec!["Acme", "."])));
    let chunks: Vec<Value> = svc
        .generate_stream(InboundRequest::question(QUESTION), ToolView::Raw, CancellationToken::new())
        .unwrap()
        .map(|c| serde_json::to_value(c.unwrap()).unwrap())
        .collect()
        .await;

    let choices: Vec<&Value> = chunks.iter().map(|c| &c["choices"][0]).collect();
    assert_eq!(choices.len(), 4);

    assert_eq!(choices[0]["delta"]["tool_calls"][0]["id"], "call_route");
    assert_eq!(choices[0]["finish_reason"], "tool_calls");

    assert_eq!(choices[1]["delta"]["role"], "tool");
    assert_eq!(choices[1]["delta"]["tool_call_id"], "call_route");
    assert!(choices[1]["finish_reason"].is_null());

    assert_eq!(choices[2]["delta"]["content"], "Acme");
    assert!(choices[2]["finish_reason"].is_null());
    assert_eq!(choices[3]["delta"]["content"], ".");
    assert!(choices.iter().all(|c| c["delta"]["content"] != ""));
}

#[tokio::test]
async fn test_stream_assistant_view() {
    let svc = service(stores(ScriptedChat::new(Some("graph_knowledge_base"), vec!["Acme"])));
    let chunks: Vec<Value> = svc
        .generate_stream(
            InboundRequest::question(QUESTION),
            ToolView::from_header(Some("assistant")),
            CancellationToken::new(),
        )
        .unwrap()
        .map(|c| serde_json::to_value(c.unwrap()).unwrap())
        .collect()
        .await;

    let details: Vec<&Value> = chunks
        .iter()
        .map(|c| &c["choices"][0]["delta"]["step_details"]["type"])
        .filter(|t| !t.is_null())
        .collect();
    assert_eq!(details, vec!["tool_calls", "tool_response"]);
}

#[test]
fn test_stop_step_suppressed_but_token_forwarded() {
    let translator = Translator::new(ToolView::Raw);
    let finished = Message::assistant("Hello").with_finish_reason(FinishReason::Stop);

    let step = WorkflowEvent::Step(StepEvent {
        node: NodeId::Agent,
        messages: vec![finished],
    });
    assert!(translator.translate(&step).unwrap().is_none());

    let token = WorkflowEvent::Token(TokenEvent {
        node: NodeId::Generate,
        id: Some("chatcmpl-gen".to_string()),
        content: "Hel".to_string(),
        finish_reason: None,
    });
    let chunk = translator.translate(&token).unwrap().unwrap();
    assert_eq!(chunk.choices.len(), 1);
    let value = serde_json::to_value(&chunk).unwrap();
    assert_eq!(value["choices"][0]["delta"]["content"], "Hel");
}

#[tokio::test]
async fn test_routing_failure_is_not_defaulted() {
    let err = run(stores(ScriptedChat::new(None, vec!["unused"]))).await.unwrap_err();
    assert!(matches!(err, Error::RoutingFailed(_)));
    assert_eq!(err.status_code(), 502);

    let err = run(stores(ScriptedChat::new(Some("maybe"), vec!["unused"]))).await.unwrap_err();
    assert!(matches!(err, Error::RoutingFailed(_)));
}

#[tokio::test]
async fn test_retrieval_unavailable_without_stores() {
    let chat = ScriptedChat::new(Some("graph_knowledge_base"), vec!["unused"]);
    let err = run(Collaborators::new(chat)).await.unwrap_err();

    assert!(matches!(err, Error::RetrievalUnavailable(_)));
    assert_eq!(err.status_code(), 503);
}

#[tokio::test]
async fn test_vector_failure_distinct_from_no_results() {
    let chat = ScriptedChat::new(Some("graph_knowledge_base"), vec!["Ok"]);
    let down = Collaborators::new(chat.clone())
        .with_graph(Arc::new(FixedGraph))
        .with_vectors(Arc::new(DownVectors));
    let err = run(down).await.unwrap_err();
    assert!(matches!(err, Error::RetrievalUnavailable(_)));

    let empty = Collaborators::new(chat)
        .with_graph(Arc::new(FixedGraph))
        .with_vectors(Arc::new(FixedVectors { passages: Vec::new() }));
    let state = run(empty).await.unwrap();
    assert!(state.unstructured_data.is_empty());
    assert_eq!(state.answer().unwrap().content, "Ok");
}

#[tokio::test]
async fn test_batch_and_stream_agree() {
    let chat = || ScriptedChat::new(Some("graph_knowledge_base"), vec!["Acme", " supplies", " Globex."]);

    let batch = service(stores(chat()))
        .generate(InboundRequest::question(QUESTION), ToolView::Raw, CancellationToken::new())
        .await
        .unwrap();
    let batch = serde_json::to_value(&batch.body).unwrap();

    let streamed: String = service(stores(chat()))
        .generate_stream(InboundRequest::question(QUESTION), ToolView::Raw, CancellationToken::new())
        .unwrap()
        .map(|c| serde_json::to_value(c.unwrap()).unwrap())
        .collect::<Vec<Value>>()
        .await
        .iter()
        .filter_map(|c| c["choices"][0]["delta"]["content"].as_str().map(str::to_string))
        .collect();

    assert_eq!(batch["choices"][0]["message"]["content"], "Acme supplies Globex.");
    assert_eq!(streamed, "Acme supplies Globex.");
}

#[tokio::test]
async fn test_empty_request_rejected_by_both_entry_points() {
    let svc = service(Collaborators::new(ScriptedChat::new(Some("final_answer"), vec!["Hi"])));
    let empty = || InboundRequest { messages: Vec::new() };

    let err = svc
        .generate(empty(), ToolView::Raw, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    let err = svc
        .generate_stream(empty(), ToolView::Raw, CancellationToken::new())
        .err()
        .unwrap();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[tokio::test]
async fn test_stream_surfaces_errors() {
    let svc = service(stores(ScriptedChat::new(None, vec!["unused"])));
    let results: Vec<Result<_>> = svc
        .generate_stream(InboundRequest::question(QUESTION), ToolView::Raw, CancellationToken::new())
        .unwrap()
        .collect()
        .await;

    assert_eq!(results.len(), 1);
    assert!(matches!(results[0], Err(Error::RoutingFailed(_))));
}

#[test]
fn test_factory_from_default_config() {
    let config = Config::default();
    let chat = ScriptedChat::new(Some("final_answer"), vec![]);
    let factory = WorkflowFactory::from_config(Collaborators::new(chat), &config).unwrap();
    assert_eq!(
        factory.build(None).unwrap().system_prompt(),
        config.workflow.default_system_prompt
    );
}

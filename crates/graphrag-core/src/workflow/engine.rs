//! Workflow execution
//!
//! A `Workflow` is compiled per conversation and consumed by a single run. The run
//! is one event stream: batch callers drain it for the final state, streaming
//! callers forward token and step events as they arrive.

use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_core::Stream;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::{Config, RetrievalConfig, WorkflowConfig};
use crate::error::{Error, Result};
use crate::knowledge::GraphRetriever;

use super::events::{StepEvent, TokenEvent, TokenSender, WorkflowEvent};
use super::graph::{NodeId, Target, WorkflowGraph};
use super::nodes::{Collaborators, NodeHandlers};
use super::state::{ConversationState, StateUpdate};

/// Stream of workflow events; dropping it cancels the run
pub type EventStream = Pin<Box<dyn Stream<Item = Result<WorkflowEvent>> + Send>>;

/// Builds one `Workflow` per conversation from shared collaborators
#[derive(Clone)]
pub struct WorkflowFactory {
    deps: Collaborators,
    retrieval: RetrievalConfig,
    settings: WorkflowConfig,
    graph: WorkflowGraph,
}

impl WorkflowFactory {
    pub fn new(deps: Collaborators, retrieval: RetrievalConfig, settings: WorkflowConfig) -> Result<Self> {
        let graph = WorkflowGraph::standard();
        graph.validate()?;

        GraphRetriever::cypher(&retrieval.excluded_relationship)?;

        Ok(Self {
            deps,
            retrieval,
            settings,
            graph,
        })
    }

    pub fn from_config(deps: Collaborators, config: &Config) -> Result<Self> {
        Self::new(deps, config.retrieval.clone(), config.workflow.clone())
    }

    /// Compile a workflow, using `system_message` as the generator persona when given
    pub fn build(&self, system_message: Option<String>) -> Result<Workflow> {
        let system_prompt = system_message
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| self.settings.default_system_prompt.clone());

        let handlers = NodeHandlers::new(
            &self.deps,
            &self.retrieval,
            system_prompt,
            self.settings.knowledge_graph_description.clone(),
        )?;

        Ok(Workflow {
            graph: self.graph.clone(),
            handlers: Arc::new(handlers),
            node_timeout: self.settings.node_timeout_secs.map(Duration::from_secs),
        })
    }
}

/// A compiled workflow for one conversation
pub struct Workflow {
    graph: WorkflowGraph,
    handlers: Arc<NodeHandlers>,
    node_timeout: Option<Duration>,
}

impl std::fmt::Debug for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("entry", &self.graph.entry())
            .field("node_timeout", &self.node_timeout)
            .finish()
    }
}

enum Progress {
    Token(TokenEvent),
    Done(Result<StateUpdate>),
    Cancelled,
}

impl Workflow {
    /// Persona the generator will use
    pub fn system_prompt(&self) -> &str {
        self.handlers.system_prompt()
    }

    /// Execute the workflow, yielding token and step events and finally the terminal state
    pub fn stream(self, state: ConversationState, cancel: CancellationToken) -> EventStream {
        Box::pin(execute(self, state, cancel))
    }

    /// Run to completion and return the terminal state
    pub async fn invoke(self, state: ConversationState, cancel: CancellationToken) -> Result<ConversationState> {
        drain(self.stream(state, cancel)).await
    }
}

/// Consume `events` and return the terminal state, failing on the first error
pub async fn drain(mut events: EventStream) -> Result<ConversationState> {
    while let Some(event) = events.next().await {
        if let WorkflowEvent::Finished(state) = event? {
            return Ok(state);
        }
    }
    Err(Error::Other("workflow ended without a terminal state".to_string()))
}

fn execute(
    workflow: Workflow,
    state: ConversationState,
    cancel: CancellationToken,
) -> impl Stream<Item = Result<WorkflowEvent>> + Send + 'static {
    let Workflow {
        graph,
        handlers,
        node_timeout,
    } = workflow;

    async_stream::try_stream! {
        let mut state = state;
        let mut current = graph.entry();

        loop {
            let started = Instant::now();
            let (tx, mut rx) = mpsc::unbounded_channel();

            let result = {
                let work = run_node(&handlers, current, &state, tx, node_timeout);
                tokio::pin!(work);

                let result = loop {
                    let progress = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => Progress::Cancelled,
                        Some(token) = rx.recv() => Progress::Token(token),
                        result = &mut work => Progress::Done(result),
                    };

                    match progress {
                        Progress::Token(token) => yield WorkflowEvent::Token(token),
                        Progress::Done(result) => break result,
                        Progress::Cancelled => {
                            info!(node = %current, "Workflow cancelled");
                            break Err(Error::Cancelled);
                        }
                    }
                };

                while let Ok(token) = rx.try_recv() {
                    yield WorkflowEvent::Token(token);
                }
                result
            };

            let update = result.map_err(|e| {
                if !matches!(e, Error::Cancelled) {
                    error!(node = %current, code = e.code(), error = %e, "Node failed");
                }
                e
            })?;

            let appended = update.messages.clone();
            state.apply(current.name(), update)?;

            info!(
                node = %current,
                appended = appended.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Node completed"
            );

            yield WorkflowEvent::Step(StepEvent {
                node: current,
                messages: appended,
            });

            match graph.next(current, &state)? {
                Target::Node(next) => {
                    debug!(from = %current, to = %next, "Transition");
                    current = next;
                }
                Target::End => break,
            }
        }

        yield WorkflowEvent::Finished(state);
    }
}

async fn run_node(
    handlers: &NodeHandlers,
    node: NodeId,
    state: &ConversationState,
    tokens: TokenSender,
    deadline: Option<Duration>,
) -> Result<StateUpdate> {
    let work = handlers.run(node, state, tokens);
    match deadline {
        Some(limit) => tokio::time::timeout(limit, work)
            .await
            .map_err(|_| Error::NodeTimeout {
                node: node.to_string(),
                secs: limit.as_secs(),
            })?,
        None => work.await,
    }
}

//! Routed retrieval workflow
//!
//! `agent` classifies the question. The `graph_knowledge_base` route runs
//! `graph_search` and `vector_retriever` before `generate`; `final_answer`
//! goes straight to `generate`.

mod engine;
mod events;
mod graph;
mod nodes;
mod state;

pub use engine::{EventStream, Workflow, WorkflowFactory, drain};
pub use events::{StepEvent, TokenEvent, TokenSender, WorkflowEvent};
pub use graph::{Edge, NodeId, Target, WorkflowGraph};
pub use nodes::{Collaborators, ROUTER_TOOL, compose_context};
pub use state::{ConversationState, Route, StateUpdate};

//! Conversation state threaded through the workflow

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::llm::{Message, MessageRole};

/// Route selected by the router node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    /// Retrieve from the knowledge graph before answering
    GraphKnowledgeBase,
    /// Answer directly from the conversation
    FinalAnswer,
}

impl Route {
    pub const ALL: [Route; 2] = [Route::GraphKnowledgeBase, Route::FinalAnswer];

    pub fn as_str(&self) -> &'static str {
        match self {
            Route::GraphKnowledgeBase => "graph_knowledge_base",
            Route::FinalAnswer => "final_answer",
        }
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Route {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Route::ALL
            .into_iter()
            .find(|route| route.as_str() == s.trim())
            .ok_or_else(|| Error::RoutingFailed(format!("unknown route label '{}'", s)))
    }
}

/// State for one workflow execution
///
/// `messages` only grows and `route` is written at most once.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationState {
    pub question: String,
    pub structured_data: String,
    pub unstructured_data: Vec<String>,
    pub messages: Vec<Message>,
    pub route: Option<Route>,
}

impl ConversationState {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Merge a node's output into the state
    pub fn apply(&mut self, node: &str, update: StateUpdate) -> Result<()> {
        if let Some(route) = update.route {
            if let Some(existing) = self.route {
                return Err(Error::InvalidTransition {
                    from: node.to_string(),
                    reason: format!("route already set to '{}', cannot change to '{}'", existing, route),
                });
            }
            self.route = Some(route);
        }
        if let Some(question) = update.question {
            self.question = question;
        }
        if let Some(structured) = update.structured_data {
            self.structured_data = structured;
        }
        if let Some(unstructured) = update.unstructured_data {
            self.unstructured_data = unstructured;
        }
        self.messages.extend(update.messages);
        Ok(())
    }

    /// The final assistant message, if the last message is one
    pub fn answer(&self) -> Option<&Message> {
        self.last_message()
            .filter(|m| m.role == MessageRole::Assistant && !m.has_tool_calls())
    }
}

/// Partial state produced by a node; `messages` are appended
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    pub question: Option<String>,
    pub route: Option<Route>,
    pub structured_data: Option<String>,
    pub unstructured_data: Option<Vec<String>>,
    pub messages: Vec<Message>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_labels() {
        assert_eq!("graph_knowledge_base".parse::<Route>().unwrap(), Route::GraphKnowledgeBase);
        assert_eq!("final_answer".parse::<Route>().unwrap(), Route::FinalAnswer);
        assert!(matches!("web_search".parse::<Route>(), Err(Error::RoutingFailed(_))));
        assert_eq!(
            serde_json::to_string(&Route::GraphKnowledgeBase).unwrap(),
            "\"graph_knowledge_base\""
        );
    }

    #[test]
    fn test_apply_appends_messages() {
        let mut state = ConversationState::new(vec![Message::user("Hi")]);
        state
            .apply(
                "generate",
                StateUpdate {
                    messages: vec![Message::assistant("Hello")],
                    ..StateUpdate::default()
                },
            )
            .unwrap();

        assert_eq!(state.messages.len(), 2);
        assert_eq!(state.answer().unwrap().content, "Hello");
    }

    #[test]
    fn test_route_written_once() {
        let mut state = ConversationState::default();
        let set_route = |route| StateUpdate {
            route: Some(route),
            ..StateUpdate::default()
        };

        state.apply("agent", set_route(Route::FinalAnswer)).unwrap();
        let err = state.apply("agent", set_route(Route::GraphKnowledgeBase)).unwrap_err();

        assert!(matches!(err, Error::InvalidTransition { .. }));
        assert_eq!(state.route, Some(Route::FinalAnswer));
    }

    #[test]
    fn test_answer_ignores_tool_call_messages() {
        let state = ConversationState::new(vec![Message::assistant_tool_calls(vec![
            crate::llm::ToolCall::new("call_1", "Router", "{}"),
        ])]);
        assert!(state.answer().is_none());
    }
}

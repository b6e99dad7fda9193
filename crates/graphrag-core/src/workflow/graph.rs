//! Workflow topology: node identifiers and the edge table

use std::collections::HashSet;

use crate::error::{Error, Result};

use super::state::{ConversationState, Route};

/// Processing nodes of the workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeId {
    Agent,
    GraphSearch,
    VectorRetriever,
    Generate,
}

impl NodeId {
    pub const ALL: [NodeId; 4] = [
        NodeId::Agent,
        NodeId::GraphSearch,
        NodeId::VectorRetriever,
        NodeId::Generate,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            NodeId::Agent => "agent",
            NodeId::GraphSearch => "graph_search",
            NodeId::VectorRetriever => "vector_retriever",
            NodeId::Generate => "generate",
        }
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Where an edge leads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Node(NodeId),
    End,
}

/// Outgoing edge of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Always(Target),
    ByRoute {
        graph_knowledge_base: Target,
        final_answer: Target,
    },
}

impl Edge {
    fn targets(&self) -> Vec<Target> {
        match *self {
            Edge::Always(target) => vec![target],
            Edge::ByRoute {
                graph_knowledge_base,
                final_answer,
            } => vec![graph_knowledge_base, final_answer],
        }
    }
}

/// Directed graph with a single entry node
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    entry: NodeId,
    edges: Vec<(NodeId, Edge)>,
}

impl WorkflowGraph {
    /// `agent` routes to either the retrieval chain or straight to `generate`
    pub fn standard() -> Self {
        Self {
            entry: NodeId::Agent,
            edges: vec![
                (
                    NodeId::Agent,
                    Edge::ByRoute {
                        graph_knowledge_base: Target::Node(NodeId::GraphSearch),
                        final_answer: Target::Node(NodeId::Generate),
                    },
                ),
                (NodeId::GraphSearch, Edge::Always(Target::Node(NodeId::VectorRetriever))),
                (NodeId::VectorRetriever, Edge::Always(Target::Node(NodeId::Generate))),
                (NodeId::Generate, Edge::Always(Target::End)),
            ],
        }
    }

    pub fn entry(&self) -> NodeId {
        self.entry
    }

    pub fn edge(&self, node: NodeId) -> Option<Edge> {
        self.edges
            .iter()
            .find(|(from, _)| *from == node)
            .map(|(_, edge)| *edge)
    }

    /// Resolve the successor of `node` for the current state
    pub fn next(&self, node: NodeId, state: &ConversationState) -> Result<Target> {
        match self.edge(node) {
            Some(Edge::Always(target)) => Ok(target),
            Some(Edge::ByRoute {
                graph_knowledge_base,
                final_answer,
            }) => match state.route {
                Some(Route::GraphKnowledgeBase) => Ok(graph_knowledge_base),
                Some(Route::FinalAnswer) => Ok(final_answer),
                None => Err(Error::InvalidTransition {
                    from: node.to_string(),
                    reason: "route is not set".to_string(),
                }),
            },
            None => Err(Error::InvalidTransition {
                from: node.to_string(),
                reason: "node has no outgoing edge".to_string(),
            }),
        }
    }

    /// Every reachable node has an edge, every path ends, and no path revisits a node
    pub fn validate(&self) -> Result<()> {
        let mut on_path = HashSet::new();
        self.walk(self.entry, &mut on_path)
    }

    fn walk(&self, node: NodeId, on_path: &mut HashSet<NodeId>) -> Result<()> {
        if !on_path.insert(node) {
            return Err(Error::InvalidTransition {
                from: node.to_string(),
                reason: "cycle detected".to_string(),
            });
        }

        let edge = self.edge(node).ok_or_else(|| Error::InvalidTransition {
            from: node.to_string(),
            reason: "node has no outgoing edge".to_string(),
        })?;

        for target in edge.targets() {
            if let Target::Node(next) = target {
                self.walk(next, on_path)?;
            }
        }

        on_path.remove(&node);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn routed(route: Route) -> ConversationState {
        ConversationState {
            route: Some(route),
            ..ConversationState::default()
        }
    }

    #[test]
    fn test_standard_graph_is_valid() {
        let graph = WorkflowGraph::standard();
        assert_eq!(graph.entry(), NodeId::Agent);
        graph.validate().unwrap();
    }

    #[test]
    fn test_retrieval_path() {
        let graph = WorkflowGraph::standard();
        let state = routed(Route::GraphKnowledgeBase);

        let mut path = vec![graph.entry()];
        while let Target::Node(next) = graph.next(*path.last().unwrap(), &state).unwrap() {
            path.push(next);
        }

        assert_eq!(
            path,
            vec![NodeId::Agent, NodeId::GraphSearch, NodeId::VectorRetriever, NodeId::Generate]
        );
    }

    #[test]
    fn test_direct_path() {
        let graph = WorkflowGraph::standard();
        let state = routed(Route::FinalAnswer);

        assert_eq!(graph.next(NodeId::Agent, &state).unwrap(), Target::Node(NodeId::Generate));
        assert_eq!(graph.next(NodeId::Generate, &state).unwrap(), Target::End);
    }

    #[test]
    fn test_unset_route_is_invalid() {
        let graph = WorkflowGraph::standard();
        let err = graph.next(NodeId::Agent, &ConversationState::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
    }

    #[test]
    fn test_cycle_rejected() {
        let graph = WorkflowGraph {
            entry: NodeId::Agent,
            edges: vec![
                (NodeId::Agent, Edge::Always(Target::Node(NodeId::Generate))),
                (NodeId::Generate, Edge::Always(Target::Node(NodeId::Agent))),
            ],
        };
        assert!(graph.validate().is_err());
    }

    #[test]
    fn test_missing_edge_rejected() {
        let graph = WorkflowGraph {
            entry: NodeId::Agent,
            edges: vec![(NodeId::Agent, Edge::Always(Target::Node(NodeId::Generate)))],
        };
        assert!(graph.validate().is_err());
    }

    #[test]
    fn test_node_names() {
        let names: Vec<&str> = NodeId::ALL.iter().map(|n| n.name()).collect();
        assert_eq!(names, vec!["agent", "graph_search", "vector_retriever", "generate"]);
    }
}

//! Knowledge retrieval
//!
//! Entity extraction, fuzzy full-text queries, one-hop relationship lookup and
//! passage similarity search, behind the `GraphStore` and `VectorStore` seams.

pub mod extractor;
pub mod fulltext;
mod neo4j;
mod retriever;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use extractor::EntityExtractor;
pub use fulltext::{build_fuzzy_query, remove_lucene_chars};
pub use neo4j::Neo4jStore;
pub use retriever::GraphRetriever;

/// Query parameters keyed by name
pub type Params = serde_json::Map<String, serde_json::Value>;

/// One result row, keyed by the requested column names
pub type Row = HashMap<String, serde_json::Value>;

/// Parameterized Cypher executor
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Run `cypher` and return the requested `columns` of every row
    async fn query(&self, cypher: &str, params: Params, columns: &[&str]) -> Result<Vec<Row>>;
}

/// A ranked passage returned by similarity search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub text: String,
    pub score: f64,
}

impl Passage {
    pub fn new(text: impl Into<String>, score: f64) -> Self {
        Self {
            text: text.into(),
            score,
        }
    }
}

/// Similarity search over the document index
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Return at most `k` passages, best first
    async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<Passage>>;
}

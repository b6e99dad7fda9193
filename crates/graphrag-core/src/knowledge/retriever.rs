//! One-hop relationship retrieval around fuzzily matched entities

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::RetrievalConfig;
use crate::error::{Error, Result};

use super::fulltext::build_fuzzy_query;
use super::{GraphStore, Params};

/// Looks up entities in the full-text index and lists their relationships in both
/// directions, skipping the relationship that links entities to source documents
#[derive(Clone)]
pub struct GraphRetriever {
    store: Arc<dyn GraphStore>,
    settings: RetrievalConfig,
    cypher: String,
}

impl GraphRetriever {
    pub fn new(store: Arc<dyn GraphStore>, settings: RetrievalConfig) -> Result<Self> {
        let cypher = Self::cypher(&settings.excluded_relationship)?;
        Ok(Self {
            store,
            settings,
            cypher,
        })
    }

    /// Traversal query; the excluded relationship type cannot be a parameter
    pub fn cypher(excluded_relationship: &str) -> Result<String> {
        if excluded_relationship.is_empty()
            || !excluded_relationship
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(Error::ConfigError(format!(
                "invalid relationship type '{}'",
                excluded_relationship
            )));
        }

        Ok(format!(
            "CALL db.index.fulltext.queryNodes($index, $query, {{limit: $hits}}) YIELD node, score
CALL {{
  WITH node
  MATCH (node)-[r:!{rel}]->(neighbor)
  RETURN node.id + ' - ' + type(r) + ' -> ' + neighbor.id AS output
  UNION
  WITH node
  MATCH (node)<-[r:!{rel}]-(neighbor)
  RETURN neighbor.id + ' - ' + type(r) + ' -> ' + node.id AS output
}}
RETURN output LIMIT $limit",
            rel = excluded_relationship
        ))
    }

    /// Relationship lines for a single entity
    pub async fn relationships(&self, entity: &str) -> Result<Vec<String>> {
        let query = build_fuzzy_query(entity)?;

        let mut params = Params::new();
        params.insert("index".to_string(), self.settings.fulltext_index.clone().into());
        params.insert("query".to_string(), query.clone().into());
        params.insert("hits".to_string(), (self.settings.fulltext_hits as i64).into());
        params.insert("limit".to_string(), (self.settings.max_relationships as i64).into());

        let rows = self
            .store
            .query(&self.cypher, params, &["output"])
            .await
            .map_err(|e| Error::RetrievalUnavailable(format!("graph query failed: {}", e)))?;

        let lines: Vec<String> = rows
            .into_iter()
            .filter_map(|mut row| match row.remove("output") {
                Some(serde_json::Value::String(line)) => Some(line),
                _ => None,
            })
            .take(self.settings.max_relationships)
            .collect();

        debug!(entity = %entity, query = %query, lines = lines.len(), "Graph lookup complete");
        Ok(lines)
    }

    /// Relationship lines for every entity, in entity order
    pub async fn retrieve(&self, entities: &[String]) -> Result<Vec<String>> {
        let mut lines = Vec::new();
        for entity in entities {
            match self.relationships(entity).await {
                Ok(found) => lines.extend(found),
                Err(Error::InvalidInput(reason)) => {
                    warn!(entity = %entity, reason = %reason, "Skipping unsearchable entity");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(lines)
    }
}

//! Neo4j-backed graph and vector store

use std::sync::Arc;

use async_trait::async_trait;
use neo4rs::{ConfigBuilder, Graph, Query};
use tracing::{debug, info, warn};

use crate::config::{GraphConnection, RetrievalConfig, SearchType};
use crate::error::{Error, Result};
use crate::llm::Embedder;

use super::fulltext::remove_lucene_chars;
use super::{GraphStore, Params, Passage, Row, VectorStore};

/// Neo4j store for relationship queries and passage search
///
/// Vector search embeds the question and queries the vector index. In hybrid
/// mode the keyword index is queried as well and each source's scores are
/// normalized against its best hit before merging.
#[derive(Clone)]
pub struct Neo4jStore {
    graph: Arc<Graph>,
    embedder: Arc<dyn Embedder>,
    settings: RetrievalConfig,
    uri: String,
}

impl std::fmt::Debug for Neo4jStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Neo4jStore")
            .field("uri", &self.uri)
            .field("search_type", &self.settings.search_type)
            .finish()
    }
}

impl Neo4jStore {
    /// Connect and verify the connection with a trivial query
    pub async fn connect(
        connection: &GraphConnection,
        settings: RetrievalConfig,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        let graph = open(connection).await?;
        ping(&graph).await?;

        info!(uri = %connection.uri, "Connected to Neo4j");
        Ok(Self {
            graph: Arc::new(graph),
            embedder,
            settings,
            uri: connection.uri.clone(),
        })
    }

    /// Check reachability with `RETURN 1` without building a store
    pub async fn probe(connection: &GraphConnection) -> Result<()> {
        ping(&open(connection).await?).await
    }

    fn passage_query(&self) -> String {
        let text = &self.settings.text_property;
        match self.settings.search_type {
            SearchType::Vector => format!(
                "CALL db.index.vector.queryNodes($index, $k, $embedding) YIELD node, score
RETURN node.`{text}` AS text, score
ORDER BY score DESC"
            ),
            SearchType::Hybrid => format!(
                "CALL {{
  CALL db.index.vector.queryNodes($index, $k, $embedding) YIELD node, score
  WITH collect({{node: node, score: score}}) AS nodes, max(score) AS max
  UNWIND nodes AS n
  RETURN n.node AS node, (n.score / max) AS score
  UNION
  CALL db.index.fulltext.queryNodes($keyword_index, $keyword, {{limit: $k}}) YIELD node, score
  WITH collect({{node: node, score: score}}) AS nodes, max(score) AS max
  UNWIND nodes AS n
  RETURN n.node AS node, (n.score / max) AS score
}}
WITH node, max(score) AS score ORDER BY score DESC LIMIT $k
RETURN node.`{text}` AS text, score"
            ),
        }
    }
}

fn build_query(cypher: &str, params: Params) -> Query {
    let mut q = Query::new(cypher.to_string());

    for (key, value) in params {
        match value {
            serde_json::Value::Null => {}
            serde_json::Value::Bool(b) => q = q.param(&key, b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    q = q.param(&key, i);
                } else if let Some(f) = n.as_f64() {
                    q = q.param(&key, f);
                }
            }
            serde_json::Value::String(s) => q = q.param(&key, s.as_str()),
            serde_json::Value::Array(items) => {
                if items.iter().all(|v| v.is_number()) {
                    let numbers: Vec<f64> = items.iter().filter_map(|v| v.as_f64()).collect();
                    q = q.param(&key, numbers);
                } else {
                    let strings: Vec<String> = items
                        .iter()
                        .map(|v| match v {
                            serde_json::Value::String(s) => s.clone(),
                            other => other.to_string(),
                        })
                        .collect();
                    q = q.param(&key, strings);
                }
            }
            serde_json::Value::Object(_) => {
                warn!(param = %key, "Skipping object parameter");
            }
        }
    }

    q
}

fn column_value(row: &neo4rs::Row, column: &str) -> serde_json::Value {
    if let Ok(value) = row.get::<String>(column) {
        return value.into();
    }
    if let Ok(value) = row.get::<i64>(column) {
        return value.into();
    }
    if let Ok(value) = row.get::<f64>(column) {
        return value.into();
    }
    if let Ok(value) = row.get::<bool>(column) {
        return value.into();
    }
    serde_json::Value::Null
}

async fn open(connection: &GraphConnection) -> Result<Graph> {
    let mut builder = ConfigBuilder::default()
        .uri(connection.uri.as_str())
        .user(connection.username.as_str())
        .password(connection.password.as_str())
        .max_connections(connection.max_connections);

    if let Some(db) = &connection.database {
        builder = builder.db(db.as_str());
    }

    Ok(Graph::connect(builder.build()?).await?)
}

async fn ping(graph: &Graph) -> Result<()> {
    let mut result = graph.execute(Query::new("RETURN 1 AS test".to_string())).await?;
    match result.next().await? {
        Some(_) => Ok(()),
        None => Err(Error::RetrievalUnavailable(
            "health check returned no rows".to_string(),
        )),
    }
}

#[async_trait]
impl GraphStore for Neo4jStore {
    async fn query(&self, cypher: &str, params: Params, columns: &[&str]) -> Result<Vec<Row>> {
        debug!(params = params.len(), "Executing Cypher query");

        let mut result = self.graph.execute(build_query(cypher, params)).await?;

        let mut rows = Vec::new();
        while let Some(row) = result.next().await? {
            let mapped: Row = columns
                .iter()
                .map(|column| (column.to_string(), column_value(&row, column)))
                .collect();
            rows.push(mapped);
        }

        Ok(rows)
    }
}

#[async_trait]
impl VectorStore for Neo4jStore {
    async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<Passage>> {
        let embedding = self.embedder.embed(query).await?;
        let embedding: Vec<f64> = embedding.into_iter().map(f64::from).collect();

        let mut params = Params::new();
        params.insert("index".to_string(), self.settings.vector_index.clone().into());
        params.insert("k".to_string(), (k as i64).into());
        params.insert("embedding".to_string(), embedding.into());
        if self.settings.search_type == SearchType::Hybrid {
            let keyword = remove_lucene_chars(query);
            params.insert("keyword_index".to_string(), self.settings.keyword_index.clone().into());
            params.insert("keyword".to_string(), keyword.trim().to_string().into());
        }

        let rows = self.query(&self.passage_query(), params, &["text", "score"]).await?;

        let passages: Vec<Passage> = rows
            .into_iter()
            .filter_map(|row| {
                let text = row.get("text")?.as_str()?.to_string();
                let score = row.get("score").and_then(|s| s.as_f64()).unwrap_or(0.0);
                Some(Passage { text, score })
            })
            .take(k)
            .collect();

        debug!(k, found = passages.len(), search_type = %self.settings.search_type, "Similarity search complete");
        Ok(passages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_query_accepts_all_param_kinds() {
        let mut params = Params::new();
        params.insert("s".to_string(), "text".into());
        params.insert("i".to_string(), 2.into());
        params.insert("f".to_string(), 0.5.into());
        params.insert("b".to_string(), true.into());
        params.insert("v".to_string(), serde_json::json!([0.1, 0.2]));
        params.insert("l".to_string(), serde_json::json!(["a", "b"]));
        params.insert("n".to_string(), serde_json::Value::Null);

        // Construction must not panic on any supported kind.
        let _ = build_query("RETURN $s, $i, $f, $b, $v, $l", params);
    }

    #[cfg(feature = "integration-tests")]
    #[tokio::test]
    async fn test_live_probe() {
        use crate::config::GraphConfig;

        let Some(connection) = GraphConfig::default().resolve().unwrap() else {
            return;
        };
        Neo4jStore::probe(&connection).await.unwrap();
    }
}

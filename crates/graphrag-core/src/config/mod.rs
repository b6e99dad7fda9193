//! Configuration management with file persistence

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variables checked for the LLM API key, in order
pub const API_KEY_ENV_VARS: [&str; 2] = ["GRAPHRAG_API_KEY", "OPENAI_API_KEY"];

/// graphrag configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub base_url: String,
    pub default_model: String,
    pub embedding_model: String,
    pub temperature: f32,
    pub max_tokens: usize,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://openrouter.ai/api/v1".to_string(),
            default_model: "mistralai/mistral-large".to_string(),
            embedding_model: "openai/text-embedding-3-small".to_string(),
            temperature: 0.0,
            max_tokens: 2048,
            timeout_secs: 120,
        }
    }
}

/// Neo4j connection settings. The password is only ever read from the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub uri: Option<String>,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub database: Option<String>,
    pub max_connections: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            uri: None,
            username: "neo4j".to_string(),
            password: None,
            database: None,
            max_connections: 16,
        }
    }
}

/// Fully resolved graph connection, available only when a URI is configured
#[derive(Clone, PartialEq, Eq)]
pub struct GraphConnection {
    pub uri: String,
    pub username: String,
    pub password: String,
    pub database: Option<String>,
    pub max_connections: usize,
}

impl std::fmt::Debug for GraphConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphConnection")
            .field("uri", &self.uri)
            .field("username", &self.username)
            .field("database", &self.database)
            .finish()
    }
}

/// How the vector retriever queries the document index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchType {
    Vector,
    #[default]
    Hybrid,
}

impl std::str::FromStr for SearchType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "vector" => Ok(Self::Vector),
            "hybrid" => Ok(Self::Hybrid),
            other => Err(anyhow!("Invalid search type: {}. Valid options: vector, hybrid", other)),
        }
    }
}

impl std::fmt::Display for SearchType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SearchType::Vector => write!(f, "vector"),
            SearchType::Hybrid => write!(f, "hybrid"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub fulltext_index: String,
    pub fulltext_hits: usize,
    pub max_relationships: usize,
    pub excluded_relationship: String,
    pub vector_index: String,
    pub keyword_index: String,
    pub search_type: SearchType,
    pub top_k: usize,
    pub text_property: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            fulltext_index: "entity".to_string(),
            fulltext_hits: 2,
            max_relationships: 20,
            excluded_relationship: "MENTIONS".to_string(),
            vector_index: "vector".to_string(),
            keyword_index: "keyword".to_string(),
            search_type: SearchType::Hybrid,
            top_k: 4,
            text_property: "text".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub knowledge_graph_description: String,
    pub default_system_prompt: String,
    pub node_timeout_secs: Option<u64>,
}

/// Assistant persona used when a request does not supply its own system message
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant, please respond to the user's query to the best of your ability! \
     If relevant, please use knowledge from the provided documents.";

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            knowledge_graph_description: "The knowledge graph contains organizations, people and products \
                 extracted from company documents, together with the relationships between them."
                .to_string(),
            default_system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            node_timeout_secs: None,
        }
    }
}

impl LlmConfig {
    pub fn resolved_api_key(&self) -> anyhow::Result<Option<String>> {
        self.resolved_api_key_from(|name| env::var(name).ok())
    }

    /// Resolve the API key through an arbitrary variable lookup
    pub fn resolved_api_key_from<F>(&self, lookup: F) -> anyhow::Result<Option<String>>
    where
        F: Fn(&str) -> Option<String>,
    {
        self.enforce_env_only()?;

        Ok(API_KEY_ENV_VARS
            .iter()
            .find_map(|name| lookup(name).filter(|v| !v.trim().is_empty())))
    }

    pub fn redacted_api_key(&self) -> anyhow::Result<Option<String>> {
        self.resolved_api_key().map(|opt| opt.map(|key| redact(&key)))
    }

    pub fn enforce_env_only(&self) -> anyhow::Result<()> {
        if self.api_key.is_some() {
            return Err(anyhow!(
                "LLM API keys must be provided via environment variables, not stored in configuration"
            ));
        }
        Ok(())
    }
}

impl GraphConfig {
    pub fn resolve(&self) -> anyhow::Result<Option<GraphConnection>> {
        self.resolve_from(|name| env::var(name).ok())
    }

    /// Apply `NEO4J_*` overrides and return the connection, or `None` when no URI is set
    pub fn resolve_from<F>(&self, lookup: F) -> anyhow::Result<Option<GraphConnection>>
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.password.is_some() {
            return Err(anyhow!(
                "Graph passwords must be provided via NEO4J_PASSWORD, not stored in configuration"
            ));
        }

        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let Some(uri) = non_empty("NEO4J_URI").or_else(|| self.uri.clone()) else {
            return Ok(None);
        };
        let username = non_empty("NEO4J_USERNAME").unwrap_or_else(|| self.username.clone());
        let password = non_empty("NEO4J_PASSWORD")
            .ok_or_else(|| anyhow!("NEO4J_PASSWORD must be set when a graph URI is configured"))?;
        let database = non_empty("NEO4J_DATABASE").or_else(|| self.database.clone());

        Ok(Some(GraphConnection {
            uri,
            username,
            password,
            database,
            max_connections: self.max_connections,
        }))
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("GRAPHRAG_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("graphrag")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file, or defaults if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        self.validate()?;

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        self.llm.enforce_env_only()?;

        if self.graph.password.is_some() {
            return Err(anyhow!(
                "Graph passwords must be provided via NEO4J_PASSWORD, not stored in configuration"
            ));
        }
        if self.llm.base_url.trim().is_empty() {
            return Err(anyhow!("llm.base_url must not be empty"));
        }
        if self.llm.default_model.trim().is_empty() {
            return Err(anyhow!("llm.default_model must not be empty"));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(anyhow!("Temperature must be between 0.0 and 2.0"));
        }

        let retrieval = &self.retrieval;
        for (key, value) in [
            ("retrieval.fulltext_index", &retrieval.fulltext_index),
            ("retrieval.excluded_relationship", &retrieval.excluded_relationship),
            ("retrieval.vector_index", &retrieval.vector_index),
            ("retrieval.keyword_index", &retrieval.keyword_index),
            ("retrieval.text_property", &retrieval.text_property),
        ] {
            if !is_identifier(value) {
                return Err(anyhow!(
                    "{} must be a plain identifier (letters, digits, underscore), got '{}'",
                    key,
                    value
                ));
            }
        }
        if retrieval.fulltext_hits == 0 || retrieval.max_relationships == 0 || retrieval.top_k == 0 {
            return Err(anyhow!(
                "retrieval.fulltext_hits, retrieval.max_relationships and retrieval.top_k must be positive"
            ));
        }
        if self.workflow.node_timeout_secs == Some(0) {
            return Err(anyhow!("workflow.node_timeout_secs must be positive when set"));
        }

        Ok(())
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        match key {
            // LLM settings
            "llm.base_url" => Ok(self.llm.base_url.clone()),
            "llm.default_model" => Ok(self.llm.default_model.clone()),
            "llm.embedding_model" => Ok(self.llm.embedding_model.clone()),
            "llm.temperature" => Ok(self.llm.temperature.to_string()),
            "llm.max_tokens" => Ok(self.llm.max_tokens.to_string()),
            "llm.timeout_secs" => Ok(self.llm.timeout_secs.to_string()),

            // Graph settings
            "graph.uri" => Ok(self.graph.uri.clone().unwrap_or_else(|| "(not set)".to_string())),
            "graph.username" => Ok(self.graph.username.clone()),
            "graph.database" => Ok(self.graph.database.clone().unwrap_or_else(|| "(default)".to_string())),
            "graph.max_connections" => Ok(self.graph.max_connections.to_string()),

            // Retrieval settings
            "retrieval.fulltext_index" => Ok(self.retrieval.fulltext_index.clone()),
            "retrieval.fulltext_hits" => Ok(self.retrieval.fulltext_hits.to_string()),
            "retrieval.max_relationships" => Ok(self.retrieval.max_relationships.to_string()),
            "retrieval.excluded_relationship" => Ok(self.retrieval.excluded_relationship.clone()),
            "retrieval.vector_index" => Ok(self.retrieval.vector_index.clone()),
            "retrieval.keyword_index" => Ok(self.retrieval.keyword_index.clone()),
            "retrieval.search_type" => Ok(self.retrieval.search_type.to_string()),
            "retrieval.top_k" => Ok(self.retrieval.top_k.to_string()),
            "retrieval.text_property" => Ok(self.retrieval.text_property.clone()),

            // Workflow settings
            "workflow.knowledge_graph_description" => Ok(self.workflow.knowledge_graph_description.clone()),
            "workflow.default_system_prompt" => Ok(self.workflow.default_system_prompt.clone()),
            "workflow.node_timeout_secs" => Ok(self
                .workflow
                .node_timeout_secs
                .map(|s| s.to_string())
                .unwrap_or_else(|| "(none)".to_string())),

            // API key (special handling - show redacted)
            "llm.api_key" | "api_key" => match self.llm.redacted_api_key()? {
                Some(redacted) => Ok(redacted),
                None => Ok("(not set - use GRAPHRAG_API_KEY or OPENAI_API_KEY env var)".to_string()),
            },

            _ => Err(anyhow!(
                "Unknown configuration key: {}. Use `graphrag config list` to see available keys.",
                key
            )),
        }
    }

    /// Set a configuration value by key
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            // LLM settings
            "llm.base_url" => self.llm.base_url = value.trim_end_matches('/').to_string(),
            "llm.default_model" => self.llm.default_model = value.to_string(),
            "llm.embedding_model" => self.llm.embedding_model = value.to_string(),
            "llm.temperature" => {
                let temp: f32 = value
                    .parse()
                    .with_context(|| format!("Invalid temperature value: {}", value))?;
                if !(0.0..=2.0).contains(&temp) {
                    return Err(anyhow!("Temperature must be between 0.0 and 2.0"));
                }
                self.llm.temperature = temp;
            }
            "llm.max_tokens" => {
                self.llm.max_tokens = value
                    .parse()
                    .with_context(|| format!("Invalid max_tokens value: {}", value))?;
            }
            "llm.timeout_secs" => {
                self.llm.timeout_secs = value
                    .parse()
                    .with_context(|| format!("Invalid timeout_secs value: {}", value))?;
            }

            // Graph settings
            "graph.uri" => self.graph.uri = non_empty(value),
            "graph.username" => self.graph.username = value.to_string(),
            "graph.database" => self.graph.database = non_empty(value),
            "graph.max_connections" => {
                self.graph.max_connections = value
                    .parse()
                    .with_context(|| format!("Invalid max_connections value: {}", value))?;
            }

            // Retrieval settings
            "retrieval.fulltext_index" => self.retrieval.fulltext_index = identifier(key, value)?,
            "retrieval.excluded_relationship" => {
                self.retrieval.excluded_relationship = identifier(key, value)?
            }
            "retrieval.vector_index" => self.retrieval.vector_index = identifier(key, value)?,
            "retrieval.keyword_index" => self.retrieval.keyword_index = identifier(key, value)?,
            "retrieval.text_property" => self.retrieval.text_property = identifier(key, value)?,
            "retrieval.fulltext_hits" => self.retrieval.fulltext_hits = positive(key, value)?,
            "retrieval.max_relationships" => self.retrieval.max_relationships = positive(key, value)?,
            "retrieval.top_k" => self.retrieval.top_k = positive(key, value)?,
            "retrieval.search_type" => self.retrieval.search_type = value.parse()?,

            // Workflow settings
            "workflow.knowledge_graph_description" => {
                self.workflow.knowledge_graph_description = value.to_string()
            }
            "workflow.default_system_prompt" => self.workflow.default_system_prompt = value.to_string(),
            "workflow.node_timeout_secs" => {
                self.workflow.node_timeout_secs = match value {
                    "" | "none" => None,
                    v => Some(positive(key, v)? as u64),
                };
            }

            // Secrets cannot be set via config
            "llm.api_key" | "api_key" => {
                return Err(anyhow!(
                    "API keys cannot be stored in configuration for security. \
                     Set the GRAPHRAG_API_KEY or OPENAI_API_KEY environment variable instead."
                ));
            }
            "graph.password" => {
                return Err(anyhow!(
                    "Graph passwords cannot be stored in configuration. Set NEO4J_PASSWORD instead."
                ));
            }

            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `graphrag config list` to see available keys.",
                    key
                ));
            }
        }
        Ok(())
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        let keys = vec![
            "llm.base_url",
            "llm.default_model",
            "llm.embedding_model",
            "llm.temperature",
            "llm.max_tokens",
            "llm.timeout_secs",
            "llm.api_key",
            "graph.uri",
            "graph.username",
            "graph.database",
            "graph.max_connections",
            "retrieval.fulltext_index",
            "retrieval.fulltext_hits",
            "retrieval.max_relationships",
            "retrieval.excluded_relationship",
            "retrieval.vector_index",
            "retrieval.keyword_index",
            "retrieval.search_type",
            "retrieval.top_k",
            "retrieval.text_property",
            "workflow.knowledge_graph_description",
            "workflow.default_system_prompt",
            "workflow.node_timeout_secs",
        ];

        keys.into_iter()
            .map(|key| {
                let value = self.get(key)?;
                Ok((key.to_string(), value))
            })
            .collect()
    }

    /// Reset configuration to defaults
    pub fn reset() -> anyhow::Result<()> {
        let path = Self::config_path()?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove config file: {}", path.display()))?;
        }
        Ok(())
    }
}

fn redact(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 4 {
        "***".to_string()
    } else {
        format!("***{}", chars[chars.len() - 4..].iter().collect::<String>())
    }
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn is_identifier(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn identifier(key: &str, value: &str) -> anyhow::Result<String> {
    if !is_identifier(value) {
        return Err(anyhow!(
            "{} must be a plain identifier (letters, digits, underscore), got '{}'",
            key,
            value
        ));
    }
    Ok(value.to_string())
}

fn positive(key: &str, value: &str) -> anyhow::Result<usize> {
    let parsed: usize = value
        .parse()
        .with_context(|| format!("Invalid {} value: {}", key, value))?;
    if parsed == 0 {
        return Err(anyhow!("{} must be positive", key));
    }
    Ok(parsed)
}

//! Error types for graphrag

use thiserror::Error;

/// Result type alias using graphrag's Error
pub type Result<T> = std::result::Result<T, Error>;

/// graphrag error types with helpful messages and suggestions
#[derive(Error, Debug)]
pub enum Error {
    // Config errors (E100-E199)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Routing errors (E200-E299)
    #[error("Routing failed: {0}")]
    RoutingFailed(String),

    // Retrieval errors (E300-E399)
    #[error("Retrieval unavailable: {0}. The knowledge store could not be queried.")]
    RetrievalUnavailable(String),

    #[error("Entity extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("Graph database error: {0}")]
    GraphError(#[from] neo4rs::Error),

    // Protocol errors (E400-E499)
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Malformed request body: {0}")]
    MalformedRequest(#[from] serde_json::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Generation errors (E500-E599)
    #[error("LLM API error: {0}. Check the key in GRAPHRAG_API_KEY or OPENAI_API_KEY.")]
    LLMError(String),

    #[error("Network error: {0}. Check your internet connection.")]
    NetworkError(#[from] reqwest::Error),

    #[error("Rate limited. Waiting {0} seconds before retry.")]
    RateLimited(u64),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    // Workflow errors (E600-E699)
    #[error("Invalid workflow transition from '{from}': {reason}")]
    InvalidTransition { from: String, reason: String },

    #[error("Node '{node}' exceeded its {secs}s deadline")]
    NodeTimeout { node: String, secs: u64 },

    #[error("Request cancelled")]
    Cancelled,

    // Generic errors
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigError(_) => "E100",
            Self::RoutingFailed(_) => "E200",
            Self::RetrievalUnavailable(_) => "E300",
            Self::ExtractionFailed(_) => "E301",
            Self::GraphError(_) => "E302",
            Self::ProtocolError(_) => "E400",
            Self::MalformedRequest(_) => "E401",
            Self::InvalidInput(_) => "E402",
            Self::LLMError(_) => "E500",
            Self::NetworkError(_) => "E501",
            Self::RateLimited(_) => "E502",
            Self::EmbeddingFailed(_) => "E503",
            Self::InvalidTransition { .. } => "E600",
            Self::NodeTimeout { .. } => "E601",
            Self::Cancelled => "E602",
            Self::Other(_) | Self::Io(_) => "E9999",
        }
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::ConfigError(_) => Some("graphrag config list".to_string()),
            Self::RetrievalUnavailable(_) | Self::GraphError(_) => {
                Some("Set NEO4J_URI, NEO4J_USERNAME and NEO4J_PASSWORD, then run `graphrag doctor`".to_string())
            }
            Self::LLMError(_) => Some("Set GRAPHRAG_API_KEY, then run `graphrag doctor`".to_string()),
            Self::NetworkError(_) => Some("Check internet connection".to_string()),
            Self::MalformedRequest(_) => {
                Some(r#"Send a body of the form {"messages": [{"role": "user", "content": "..."}]}"#.to_string())
            }
            Self::NodeTimeout { .. } => Some("graphrag config set workflow.node_timeout_secs <secs>".to_string()),
            _ => None,
        }
    }

    /// HTTP-equivalent status class used when surfacing the error to a caller
    pub fn status_code(&self) -> u16 {
        match self {
            Self::ProtocolError(_) | Self::MalformedRequest(_) | Self::InvalidInput(_) => 400,
            Self::Cancelled => 499,
            Self::RoutingFailed(_)
            | Self::ExtractionFailed(_)
            | Self::LLMError(_)
            | Self::NetworkError(_)
            | Self::RateLimited(_)
            | Self::EmbeddingFailed(_) => 502,
            Self::RetrievalUnavailable(_) | Self::GraphError(_) => 503,
            Self::NodeTimeout { .. } => 504,
            Self::ConfigError(_) | Self::InvalidTransition { .. } | Self::Other(_) | Self::Io(_) => 500,
        }
    }

    /// Whether the caller sent something the service cannot accept
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code()) && !matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::ConfigError("x".into()).code(), "E100");
        assert_eq!(Error::RoutingFailed("x".into()).code(), "E200");
        assert_eq!(Error::RetrievalUnavailable("x".into()).code(), "E300");
        assert_eq!(Error::ProtocolError("x".into()).code(), "E400");
        assert_eq!(Error::Cancelled.code(), "E602");
    }

    #[test]
    fn test_protocol_errors_are_client_errors() {
        assert!(Error::ProtocolError("tool call id mismatch".into()).is_client_error());
        assert!(Error::InvalidInput("empty".into()).is_client_error());

        let malformed = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        assert!(Error::from(malformed).is_client_error());
    }

    #[test]
    fn test_retrieval_unavailable_is_distinct() {
        let err = Error::RetrievalUnavailable("graph store not configured".into());
        assert_eq!(err.status_code(), 503);
        assert!(!err.is_client_error());
        assert!(err.to_string().contains("could not be queried"));
        assert!(err.suggestion().unwrap().contains("NEO4J_URI"));
    }

    #[test]
    fn test_cancelled_is_not_client_error() {
        assert_eq!(Error::Cancelled.status_code(), 499);
        assert!(!Error::Cancelled.is_client_error());
    }

    #[test]
    fn test_timeout_display() {
        let err = Error::NodeTimeout {
            node: "generate".to_string(),
            secs: 30,
        };
        assert!(err.to_string().contains("generate"));
        assert!(err.to_string().contains("30"));
        assert_eq!(err.status_code(), 504);
    }
}

//! Entity extraction from user questions using a forced tool call

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::llm::{ChatModel, Message, ToolDefinition};

/// Name of the structured-output tool the model must call
pub const ENTITIES_TOOL: &str = "Entities";

const EXTRACTION_SYSTEM_PROMPT: &str = "You are a helpful assistant who specializes in extracting entities such as \
     people, organizations, or companies from user text. ";

#[derive(Debug, Deserialize)]
struct EntitiesArgs {
    #[serde(default)]
    names: Vec<String>,
}

/// Extracts person, organization and business names from free text
#[derive(Clone)]
pub struct EntityExtractor {
    model: Arc<dyn ChatModel>,
}

impl EntityExtractor {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }

    /// Tool schema with a single `names: [string]` field
    pub fn tool() -> ToolDefinition {
        ToolDefinition::function(
            ENTITIES_TOOL,
            "Identifying information about entities.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "names": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "All the person, organization, or business entities that appear in the text."
                    }
                },
                "required": ["names"]
            }),
        )
    }

    /// Extract entity names; an empty list is a valid answer
    pub async fn extract(&self, text: &str) -> Result<Vec<String>> {
        let messages = vec![
            Message::system(EXTRACTION_SYSTEM_PROMPT),
            Message::user(format!(
                "Use a given format to extract information from the user input: {}",
                text
            )),
        ];

        let response = self.model.chat_with_tool(messages, Self::tool()).await?;

        let call = response
            .tool_calls
            .iter()
            .find(|call| call.function.name == ENTITIES_TOOL)
            .ok_or_else(|| Error::ExtractionFailed("model did not call the Entities tool".to_string()))?;

        let args: EntitiesArgs = call
            .parse_arguments()
            .map_err(|e| Error::ExtractionFailed(format!("undecodable Entities arguments: {}", e)))?;

        let mut names: Vec<String> = Vec::with_capacity(args.names.len());
        for name in args.names {
            let name = name.trim().to_string();
            if !name.is_empty() && !names.contains(&name) {
                names.push(name);
            }
        }

        debug!(raw = %call.function.arguments, "Entity extraction response");
        info!(entities = names.len(), "Entities extracted");

        Ok(names)
    }
}

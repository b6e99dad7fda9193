//! Server-Sent Events (SSE) parsing for streaming chat completions

use serde::Deserialize;

use super::types::{FinishReason, MessageRole};

/// A delta update in a streaming response
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamDelta {
    /// Role of the message (only present in first chunk)
    pub role: Option<MessageRole>,
    /// Content fragment
    pub content: Option<String>,
}

/// A streaming choice (partial response)
#[derive(Debug, Clone, Deserialize)]
pub struct StreamChoice {
    #[serde(default)]
    pub index: usize,
    #[serde(default)]
    pub delta: StreamDelta,
    /// Reason for finishing (only in final chunk)
    pub finish_reason: Option<FinishReason>,
}

/// A chunk from a streaming response
#[derive(Debug, Clone, Deserialize)]
pub struct StreamChunk {
    /// Completion id, identical for every chunk of one response
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub model: String,
    pub choices: Vec<StreamChoice>,
}

impl StreamChunk {
    /// Build a single-choice chunk
    pub fn delta(id: impl Into<String>, content: Option<&str>, finish_reason: Option<FinishReason>) -> Self {
        Self {
            id: id.into(),
            model: String::new(),
            choices: vec![StreamChoice {
                index: 0,
                delta: StreamDelta {
                    role: Some(MessageRole::Assistant),
                    content: content.map(str::to_string),
                },
                finish_reason,
            }],
        }
    }

    /// Get the content from this chunk (if any)
    pub fn content(&self) -> Option<&str> {
        self.choices.first()?.delta.content.as_deref()
    }

    /// Check if this is the final chunk
    pub fn is_done(&self) -> bool {
        self.finish_reason().is_some()
    }

    /// Get the finish reason (if this is the final chunk)
    pub fn finish_reason(&self) -> Option<&FinishReason> {
        self.choices.first()?.finish_reason.as_ref()
    }
}

/// Event from streaming response parsing
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A content chunk was received
    Chunk(StreamChunk),
    /// Stream completed
    Done,
    /// Error parsing chunk
    Error(String),
}

/// Parse a Server-Sent Events line into a StreamEvent
pub fn parse_sse_line(line: &str) -> Option<StreamEvent> {
    let line = line.trim();

    // Skip empty lines and comments
    if line.is_empty() || line.starts_with(':') {
        return None;
    }

    let data = line.strip_prefix("data:")?.trim_start();

    if data == "[DONE]" {
        return Some(StreamEvent::Done);
    }

    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => Some(StreamEvent::Chunk(chunk)),
        Err(e) => Some(StreamEvent::Error(format!("Failed to parse chunk: {}", e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sse_content_chunk() {
        let line = r#"data: {"id":"gen-123","object":"chat.completion.chunk","created":1234567890,"model":"test","choices":[{"index":0,"delta":{"content":"Hello"},"finish_reason":null}]}"#;

        let event = parse_sse_line(line).unwrap();
        match event {
            StreamEvent::Chunk(chunk) => {
                assert_eq!(chunk.id, "gen-123");
                assert_eq!(chunk.content(), Some("Hello"));
                assert!(!chunk.is_done());
            }
            _ => panic!("Expected Chunk event"),
        }
    }

    #[test]
    fn test_parse_sse_done() {
        assert!(matches!(parse_sse_line("data: [DONE]"), Some(StreamEvent::Done)));
        assert!(matches!(parse_sse_line("data:[DONE]"), Some(StreamEvent::Done)));
    }

    #[test]
    fn test_parse_sse_ignored_lines() {
        assert!(parse_sse_line("").is_none());
        assert!(parse_sse_line("   ").is_none());
        assert!(parse_sse_line(": keep-alive").is_none());
        assert!(parse_sse_line("event: message").is_none());
    }

    #[test]
    fn test_parse_sse_final_chunk() {
        let line = r#"data: {"id":"gen-123","model":"test","choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}"#;

        match parse_sse_line(line).unwrap() {
            StreamEvent::Chunk(chunk) => {
                assert!(chunk.is_done());
                assert_eq!(chunk.content(), None);
                assert_eq!(chunk.finish_reason(), Some(&FinishReason::Stop));
            }
            _ => panic!("Expected Chunk event"),
        }
    }

    #[test]
    fn test_parse_sse_malformed() {
        assert!(matches!(parse_sse_line("data: {oops"), Some(StreamEvent::Error(_))));
    }

    #[test]
    fn test_delta_constructor() {
        let chunk = StreamChunk::delta("gen-1", Some("Hi"), None);
        assert_eq!(chunk.content(), Some("Hi"));
        assert!(!chunk.is_done());

        let last = StreamChunk::delta("gen-1", None, Some(FinishReason::Stop));
        assert!(last.is_done());
    }
}

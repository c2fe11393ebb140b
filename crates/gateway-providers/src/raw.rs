//! Raw upstream wire types.
//!
//! These mirror the OpenAI chat-completions response and chunk shapes with
//! every reasoning field the supported providers are known to emit. They are
//! deliberately permissive: unknown fields are ignored and almost everything
//! is optional, so the normalizer decides what a missing field means.

use gateway_core::{ToolCall, ToolCallDelta};
use serde::{Deserialize, Serialize};

/// Buffered completion body
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawCompletion {
    /// Response id
    #[serde(default)]
    pub id: String,
    /// Unix seconds
    #[serde(default)]
    pub created: i64,
    /// Model that answered
    #[serde(default)]
    pub model: String,
    /// Choices, only the first is used
    #[serde(default)]
    pub choices: Vec<RawChoice>,
    /// Token usage
    #[serde(default)]
    pub usage: Option<RawUsage>,
}

/// One buffered choice
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawChoice {
    /// Choice index
    #[serde(default)]
    pub index: u32,
    /// Assistant message
    #[serde(default)]
    pub message: RawMessage,
    /// Finish reason as sent by the provider
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Assistant message or streaming delta
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawMessage {
    /// Role, usually only on the first delta
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Answer text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Complete tool calls (buffered responses)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Plain reasoning string (OpenRouter, Groq)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Plain reasoning string (DeepSeek)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
    /// Structured reasoning list (OpenRouter)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_details: Option<Vec<RawReasoningDetail>>,
}

/// Streaming delta carrying positional tool-call fragments
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawDelta {
    /// Role, usually only on the first delta
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Answer text fragment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Tool-call fragments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
    /// Plain reasoning fragment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Plain reasoning fragment (DeepSeek)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
    /// Structured reasoning fragments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_details: Option<Vec<RawReasoningDetail>>,
}

/// Entry of a `reasoning_details` list.
///
/// `detail_type` is one of `reasoning.text`, `reasoning.summary` or
/// `reasoning.encrypted`; the payload lives in `text`, `summary` or `data`
/// respectively.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawReasoningDetail {
    /// Detail type tag
    #[serde(rename = "type", default)]
    pub detail_type: String,
    /// Text payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Summary payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Encrypted payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// Provider format tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    /// Detail id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Signature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    /// Position, when the provider numbers details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
}

/// Token usage as reported upstream
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawUsage {
    /// Prompt tokens
    #[serde(default)]
    pub prompt_tokens: u32,
    /// Completion tokens
    #[serde(default)]
    pub completion_tokens: u32,
    /// Total tokens
    #[serde(default)]
    pub total_tokens: u32,
    /// Completion breakdown
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens_details: Option<RawCompletionDetails>,
    /// Flat reasoning count, sent by some providers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u32>,
    /// Cost in USD (OpenRouter)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

impl RawUsage {
    /// Reasoning tokens from whichever field carried them
    #[must_use]
    pub fn reported_reasoning_tokens(&self) -> Option<u32> {
        self.completion_tokens_details
            .as_ref()
            .and_then(|d| d.reasoning_tokens)
            .or(self.reasoning_tokens)
    }
}

/// `completion_tokens_details`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCompletionDetails {
    /// Reasoning share of the completion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u32>,
}

/// One streamed chunk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawChunk {
    /// Response id, repeated on every chunk
    #[serde(default)]
    pub id: String,
    /// Unix seconds
    #[serde(default)]
    pub created: i64,
    /// Model
    #[serde(default)]
    pub model: String,
    /// Chunk choices, usually one
    #[serde(default)]
    pub choices: Vec<RawChunkChoice>,
    /// Usage, on the final chunk when requested
    #[serde(default)]
    pub usage: Option<RawUsage>,
}

/// One streamed choice
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawChunkChoice {
    /// Choice index
    #[serde(default)]
    pub index: u32,
    /// Delta
    #[serde(default)]
    pub delta: RawDelta,
    /// Present on the last content chunk
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Upstream error body, `{"error": {...}}`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawErrorBody {
    /// Error object
    #[serde(default)]
    pub error: RawError,
}

/// Upstream error object
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawError {
    /// Message
    #[serde(default)]
    pub message: String,
    /// Error type
    #[serde(rename = "type", default)]
    pub error_type: Option<String>,
    /// Error code, a string or a number depending on the provider
    #[serde(default)]
    pub code: Option<serde_json::Value>,
}

impl RawError {
    /// Code as text, falling back to the error type
    #[must_use]
    pub fn code_str(&self) -> Option<String> {
        match &self.code {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            _ => self.error_type.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_openrouter_message() {
        let raw: RawCompletion = serde_json::from_value(serde_json::json!({
            "id": "gen-1",
            "created": 1_700_000_000,
            "model": "deepseek/deepseek-r1",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": "4",
                    "reasoning": "2+2",
                    "reasoning_details": [
                        {"type": "reasoning.text", "text": "2+2", "format": "unknown"},
                        {"type": "reasoning.encrypted", "data": "b64=="}
                    ]
                },
                "finish_reason": "stop"
            }],
            "usage": {
                "prompt_tokens": 10,
                "completion_tokens": 5,
                "total_tokens": 15,
                "completion_tokens_details": {"reasoning_tokens": 3},
                "cost": 0.0001
            }
        }))
        .expect("parse");

        let message = &raw.choices[0].message;
        assert_eq!(message.reasoning.as_deref(), Some("2+2"));
        assert_eq!(message.reasoning_details.as_ref().map(Vec::len), Some(2));
        let usage = raw.usage.expect("usage");
        assert_eq!(usage.reported_reasoning_tokens(), Some(3));
        assert_eq!(usage.cost, Some(0.0001));
    }

    #[test]
    fn test_error_code_forms() {
        let body: RawErrorBody = serde_json::from_str(
            r#"{"error":{"message":"bad key","type":"invalid_request_error","code":"invalid_api_key"}}"#,
        )
        .expect("parse");
        assert_eq!(body.error.code_str().as_deref(), Some("invalid_api_key"));

        let body: RawErrorBody =
            serde_json::from_str(r#"{"error":{"message":"slow down","code":429}}"#).expect("parse");
        assert_eq!(body.error.code_str().as_deref(), Some("429"));
    }
}

//! Unified response schema.
//!
//! Every provider response, buffered or streamed, ends up as a
//! [`UnifiedResponse`]. Field names follow the camelCase wire format that
//! clients receive.

use crate::request::ToolCall;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Canonical cross-provider completion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnifiedResponse {
    /// Answer content
    pub content: ResponseContent,
    /// Reasoning kept apart from the answer
    pub reasoning: ReasoningInfo,
    /// Token accounting
    pub usage: UnifiedUsage,
    /// Provenance
    pub metadata: ResponseMetadata,
}

/// Answer text and tool calls
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseContent {
    /// Final answer text
    pub text: String,
    /// Tool calls requested by the model
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    /// Why generation stopped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
}

/// Reasoning section
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasoningInfo {
    /// Reasoning was produced or requested
    pub enabled: bool,
    /// Reasoning content was stripped at the client's request
    pub excluded: bool,
    /// Reasoning fragments in provider order
    #[serde(default)]
    pub tokens: Vec<ReasoningToken>,
    /// Reasoning token count, reported or estimated
    pub total_tokens: u32,
}

/// Kind of a reasoning fragment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningKind {
    /// Plain chain-of-thought text
    Text,
    /// Provider-written summary of the reasoning
    Summary,
    /// Opaque encrypted reasoning blob
    Encrypted,
}

/// One reasoning fragment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasoningToken {
    /// Fragment kind
    #[serde(rename = "type")]
    pub kind: ReasoningKind,
    /// Fragment content
    pub content: String,
    /// Position within the response
    pub index: u32,
    /// Provider format tag, e.g. `openai-responses-v1`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    /// Provider fragment id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Signature for verifiable reasoning
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl ReasoningToken {
    /// Plain text fragment
    pub fn text(content: impl Into<String>, index: u32) -> Self {
        Self {
            kind: ReasoningKind::Text,
            content: content.into(),
            index,
            format: None,
            id: None,
            signature: None,
        }
    }
}

/// Token usage and cost
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnifiedUsage {
    /// Prompt tokens
    pub prompt_tokens: u32,
    /// Completion tokens, reasoning included
    pub completion_tokens: u32,
    /// Reasoning share of the completion
    pub reasoning_tokens: u32,
    /// Prompt plus completion
    pub total_tokens: u32,
    /// Cost in USD, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

/// Response provenance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    /// Provider name
    pub provider: String,
    /// Model that answered
    pub model: String,
    /// Provider response id
    pub response_id: String,
    /// Provider creation time
    pub created_at: DateTime<Utc>,
    /// Time the gateway finished normalizing
    pub completed_at: DateTime<Utc>,
    /// Served from cache
    #[serde(default)]
    pub cached: bool,
}

/// Finish reason
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FinishReason {
    /// Natural end
    Stop,
    /// Hit max_tokens
    Length,
    /// Model requested tool calls
    ToolCalls,
    /// Content filtered
    ContentFilter,
    /// Cancelled by the client
    Cancelled,
    /// Ended by an error
    Error,
    /// Provider-specific reason
    Other(String),
}

impl FinishReason {
    /// Wire name
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Stop => "stop",
            Self::Length => "length",
            Self::ToolCalls => "tool_calls",
            Self::ContentFilter => "content_filter",
            Self::Cancelled => "cancelled",
            Self::Error => "error",
            Self::Other(s) => s,
        }
    }
}

impl From<&str> for FinishReason {
    fn from(value: &str) -> Self {
        match value {
            "stop" | "end_turn" | "stop_sequence" => Self::Stop,
            "length" | "max_tokens" => Self::Length,
            "tool_calls" | "function_call" | "tool_use" => Self::ToolCalls,
            "content_filter" => Self::ContentFilter,
            "cancelled" => Self::Cancelled,
            "error" => Self::Error,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for FinishReason {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<FinishReason> for String {
    fn from(value: FinishReason) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finish_reason_aliases() {
        assert_eq!(FinishReason::from("end_turn"), FinishReason::Stop);
        assert_eq!(FinishReason::from("function_call"), FinishReason::ToolCalls);
        assert_eq!(
            FinishReason::from("eos"),
            FinishReason::Other("eos".to_string())
        );
    }

    #[test]
    fn test_finish_reason_serializes_as_string() {
        let json = serde_json::to_value(FinishReason::Cancelled).expect("serialize");
        assert_eq!(json, "cancelled");
        let back: FinishReason = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, FinishReason::Cancelled);
    }

    #[test]
    fn test_reasoning_token_wire_shape() {
        let token = ReasoningToken {
            kind: ReasoningKind::Summary,
            content: "short".to_string(),
            index: 0,
            format: Some("openai-responses-v1".to_string()),
            id: None,
            signature: None,
        };
        let json = serde_json::to_value(&token).expect("serialize");
        assert_eq!(json["type"], "summary");
        assert!(json.get("id").is_none());
    }
}

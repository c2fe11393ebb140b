//! Incremental (streamed) response types.

use crate::response::{FinishReason, ReasoningToken, UnifiedUsage};
use serde::{Deserialize, Serialize};

/// Partial unified response carried by one upstream chunk.
///
/// Same field shapes as [`crate::UnifiedResponse`], each absent when the
/// chunk did not carry it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnifiedChunk {
    /// Provider response id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
    /// Answer text delta
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Reasoning fragments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<Vec<ReasoningToken>>,
    /// Tool-call fragments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
    /// Present on the final content chunk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
    /// Usage, usually on the last chunk only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<UnifiedUsage>,
}

impl UnifiedChunk {
    /// Nothing worth forwarding
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.content.as_deref().map_or(true, str::is_empty)
            && self.reasoning.as_ref().map_or(true, Vec::is_empty)
            && self.tool_calls.as_ref().map_or(true, Vec::is_empty)
            && self.finish_reason.is_none()
            && self.usage.is_none()
    }
}

/// Positional tool-call fragment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallDelta {
    /// Position of the call being assembled
    pub index: u32,
    /// Call id, usually on the first fragment only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Call type, usually `function`
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub call_type: Option<String>,
    /// Function name/arguments fragment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<FunctionDelta>,
}

/// Function fragment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDelta {
    /// Name fragment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Arguments fragment, raw JSON text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_chunk() {
        assert!(UnifiedChunk::default().is_empty());
        let chunk = UnifiedChunk {
            content: Some(String::new()),
            ..Default::default()
        };
        assert!(chunk.is_empty());
        let chunk = UnifiedChunk {
            finish_reason: Some(FinishReason::Stop),
            ..Default::default()
        };
        assert!(!chunk.is_empty());
    }
}

//! Tool-call fragment assembly.
//!
//! Streamed tool calls arrive as deltas keyed by `index`. Names and argument
//! strings are concatenated in arrival order; arguments stay an opaque
//! string and are never parsed here.

use gateway_core::{FunctionCall, ToolCall, ToolCallDelta};
use std::collections::BTreeMap;

#[derive(Debug, Default)]
struct PartialCall {
    id: Option<String>,
    call_type: Option<String>,
    name: String,
    arguments: String,
}

/// Accumulates tool-call deltas into complete calls
#[derive(Debug, Default)]
pub struct ToolCallAssembler {
    calls: BTreeMap<u32, PartialCall>,
}

impl ToolCallAssembler {
    /// Create an empty assembler
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one delta
    pub fn push(&mut self, delta: &ToolCallDelta) {
        let call = self.calls.entry(delta.index).or_default();
        if let Some(id) = delta.id.as_deref().filter(|id| !id.is_empty()) {
            call.id = Some(id.to_string());
        }
        if let Some(call_type) = &delta.call_type {
            call.call_type = Some(call_type.clone());
        }
        if let Some(function) = &delta.function {
            if let Some(name) = &function.name {
                call.name.push_str(name);
            }
            if let Some(arguments) = &function.arguments {
                call.arguments.push_str(arguments);
            }
        }
    }

    /// Whether any fragment was seen
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Completed calls in index order
    #[must_use]
    pub fn finish(self) -> Vec<ToolCall> {
        self.calls
            .into_iter()
            .map(|(index, call)| ToolCall {
                id: call.id.unwrap_or_else(|| format!("call_{index}")),
                tool_type: call.call_type.unwrap_or_else(|| "function".to_string()),
                function: FunctionCall {
                    name: call.name,
                    arguments: call.arguments,
                },
            })
            .collect()
    }
}

//! Response cache keys.

use gateway_core::{
    ChatRequest, MessageContent, MessageRole, ModelTarget, ReasoningOptions, SamplingParams,
    ToolDefinition,
};
use serde::Serialize;
use sha2::{Digest, Sha256};

const KEY_PREFIX: &str = "chat:";

#[derive(Serialize)]
struct KeyMessage<'a> {
    role: MessageRole,
    content: &'a MessageContent,
}

/// Everything that changes the answer, in a fixed field order
#[derive(Serialize)]
struct KeyMaterial<'a> {
    model: String,
    messages: Vec<KeyMessage<'a>>,
    sampling: &'a SamplingParams,
    tools: Option<&'a Vec<ToolDefinition>>,
    reasoning: Option<&'a ReasoningOptions>,
}

/// SHA-256 over the canonical JSON of the request's answer-determining
/// fields. Request id, user and session never take part.
#[must_use]
pub fn cache_key(target: &ModelTarget, request: &ChatRequest) -> String {
    let material = KeyMaterial {
        model: target.qualified(),
        messages: request
            .messages
            .iter()
            .map(|m| KeyMessage {
                role: m.role,
                content: &m.content,
            })
            .collect(),
        sampling: &request.sampling,
        tools: request.tools.as_ref(),
        reasoning: request.reasoning.as_ref(),
    };

    // Struct fields serialize in declaration order and JSON objects inside
    // tool schemas are key-sorted, so equal requests give equal bytes.
    let bytes = serde_json::to_vec(&material).unwrap_or_default();
    let digest = Sha256::digest(&bytes);
    format!("{KEY_PREFIX}{}", hex::encode(digest))
}

//! Stream accumulation.
//!
//! Splits each normalized chunk into the frames pushed to the session and
//! keeps a running copy of everything seen, so the final `stream_complete`
//! carries the same response a buffered call would have produced.

use super::tool_calls::ToolCallAssembler;
use crate::session::protocol::ChunkFrame;
use chrono::{DateTime, Utc};
use gateway_core::{
    FinishReason, ReasoningInfo, ReasoningKind, ReasoningToken, ResponseContent,
    ResponseMetadata, UnifiedChunk, UnifiedResponse, UnifiedUsage,
};
use gateway_providers::{estimate_tokens, NormalizeOptions};

/// Running state of one streamed response
#[derive(Debug)]
pub struct StreamAccumulator {
    options: NormalizeOptions,
    response_id: Option<String>,
    text: String,
    reasoning: Vec<ReasoningToken>,
    tool_calls: ToolCallAssembler,
    finish_reason: Option<FinishReason>,
    usage: Option<UnifiedUsage>,
    created_at: DateTime<Utc>,
}

impl StreamAccumulator {
    /// Start accumulating
    #[must_use]
    pub fn new(options: NormalizeOptions) -> Self {
        Self {
            options,
            response_id: None,
            text: String::new(),
            reasoning: Vec::new(),
            tool_calls: ToolCallAssembler::new(),
            finish_reason: None,
            usage: None,
            created_at: Utc::now(),
        }
    }

    /// Record a chunk and return the frames to forward, in order:
    /// reasoning, content, tool calls.
    pub fn absorb(&mut self, chunk: UnifiedChunk) -> Vec<ChunkFrame> {
        let mut frames = Vec::new();

        if self.response_id.is_none() {
            self.response_id = chunk.response_id;
        }
        if let Some(usage) = chunk.usage {
            self.usage = Some(usage);
        }
        if let Some(reason) = chunk.finish_reason {
            self.finish_reason = Some(reason);
        }

        if let Some(tokens) = chunk.reasoning {
            for token in &tokens {
                self.merge_reasoning(token);
            }
            frames.push(ChunkFrame::Reasoning(tokens));
        }
        if let Some(text) = chunk.content {
            self.text.push_str(&text);
            frames.push(ChunkFrame::Content(text));
        }
        if let Some(deltas) = chunk.tool_calls {
            for delta in &deltas {
                self.tool_calls.push(delta);
            }
            frames.push(ChunkFrame::ToolCalls(deltas));
        }

        frames
    }

    /// Consecutive text fragments of the same kind and index become one token
    fn merge_reasoning(&mut self, token: &ReasoningToken) {
        if let Some(last) = self.reasoning.last_mut() {
            if last.kind == token.kind
                && last.index == token.index
                && token.kind != ReasoningKind::Encrypted
            {
                last.content.push_str(&token.content);
                return;
            }
        }
        self.reasoning.push(token.clone());
    }

    /// Build the final response. `finish_override` replaces the upstream
    /// finish reason, e.g. with `cancelled`.
    #[must_use]
    pub fn finish(self, finish_override: Option<FinishReason>) -> UnifiedResponse {
        let readable_chars: usize = self
            .reasoning
            .iter()
            .filter(|t| t.kind != ReasoningKind::Encrypted)
            .map(|t| t.content.chars().count())
            .sum();

        let mut usage = self.usage.unwrap_or_default();
        if usage.reasoning_tokens == 0 {
            usage.reasoning_tokens = estimate_tokens(readable_chars);
        }
        if usage.completion_tokens == 0 && !self.text.is_empty() {
            usage.completion_tokens = estimate_tokens(self.text.chars().count());
        }
        if usage.total_tokens == 0 {
            usage.total_tokens = usage.prompt_tokens + usage.completion_tokens;
        }

        let excluded = self.options.exclude_reasoning;
        let reasoning = ReasoningInfo {
            enabled: self.options.reasoning_requested
                || !self.reasoning.is_empty()
                || usage.reasoning_tokens > 0,
            excluded,
            tokens: if excluded { Vec::new() } else { self.reasoning },
            total_tokens: usage.reasoning_tokens,
        };

        UnifiedResponse {
            content: ResponseContent {
                text: self.text,
                tool_calls: self.tool_calls.finish(),
                finish_reason: finish_override.or(self.finish_reason),
            },
            reasoning,
            usage,
            metadata: ResponseMetadata {
                provider: self.options.provider,
                model: self.options.model,
                response_id: self.response_id.unwrap_or_default(),
                created_at: self.created_at,
                completed_at: Utc::now(),
                cached: false,
            },
        }
    }
}

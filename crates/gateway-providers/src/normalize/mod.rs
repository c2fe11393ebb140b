//! Response normalization.
//!
//! Every provider speaks a dialect of the OpenAI chat-completions format; the
//! dialects differ mostly in how they carry reasoning. [`ProviderAdapter`] is
//! the closed set of dialects. It turns raw completions and chunks into
//! [`UnifiedResponse`] and [`UnifiedChunk`], and shapes the reasoning part of
//! outgoing requests.

mod reasoning;

pub use reasoning::estimate_tokens;

use crate::raw::{RawChunk, RawCompletion, RawUsage};
use chrono::{DateTime, Utc};
use gateway_core::{
    FinishReason, GatewayError, GatewayResult, ReasoningInfo, ReasoningKind, ReasoningOptions,
    ReasoningToken, ResponseContent, ResponseMetadata, UnifiedChunk, UnifiedResponse,
    UnifiedUsage,
};
use reasoning::{ReasoningFields, ReasoningSource};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::str::FromStr;

/// Provider dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderAdapter {
    /// api.openai.com: reasoning is hidden, only its token count is reported
    OpenAi,
    /// OpenRouter: structured `reasoning_details`, plain `reasoning` fallback
    OpenRouter,
    /// DeepSeek: `reasoning_content`
    DeepSeek,
    /// Groq: parsed `reasoning` string
    Groq,
    /// Unknown OpenAI-compatible endpoint, reads every reasoning field
    Generic,
}

/// Per-request normalization inputs
#[derive(Debug, Clone, Default)]
pub struct NormalizeOptions {
    /// Provider name recorded in metadata
    pub provider: String,
    /// Model recorded in metadata when the provider omits it
    pub model: String,
    /// The client asked for reasoning
    pub reasoning_requested: bool,
    /// Strip reasoning contents, keep counts
    pub exclude_reasoning: bool,
}

impl NormalizeOptions {
    /// Options for `provider`/`model`
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            ..Default::default()
        }
    }

    /// Apply a request's reasoning options
    #[must_use]
    pub fn with_reasoning(mut self, options: Option<&ReasoningOptions>) -> Self {
        if let Some(options) = options {
            self.reasoning_requested = options.enabled;
            self.exclude_reasoning = options.exclude;
        }
        self
    }
}

impl ProviderAdapter {
    /// Every adapter, for exhaustive iteration
    pub const ALL: [Self; 5] = [
        Self::OpenAi,
        Self::OpenRouter,
        Self::DeepSeek,
        Self::Groq,
        Self::Generic,
    ];

    /// Adapter for a provider name. Unknown names get [`Self::Generic`].
    #[must_use]
    pub fn for_provider(name: &str) -> Self {
        name.parse().unwrap_or(Self::Generic)
    }

    /// Registry name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::OpenRouter => "openrouter",
            Self::DeepSeek => "deepseek",
            Self::Groq => "groq",
            Self::Generic => "generic",
        }
    }

    fn reasoning_sources(self) -> &'static [ReasoningSource] {
        match self {
            Self::OpenAi => &[],
            Self::OpenRouter => &[ReasoningSource::Details, ReasoningSource::Reasoning],
            Self::DeepSeek => &[ReasoningSource::ReasoningContent],
            Self::Groq => &[ReasoningSource::Reasoning],
            Self::Generic => &[
                ReasoningSource::Details,
                ReasoningSource::Reasoning,
                ReasoningSource::ReasoningContent,
            ],
        }
    }

    /// Add this dialect's reasoning parameters to an outgoing request body
    pub fn apply_reasoning(self, options: &ReasoningOptions, body: &mut Map<String, Value>) {
        match self {
            Self::OpenAi => {
                if let (true, Some(effort)) = (options.enabled, &options.effort) {
                    body.insert("reasoning_effort".to_string(), json!(effort));
                }
            }
            Self::OpenRouter | Self::Generic => {
                let mut reasoning = Map::new();
                if !options.enabled {
                    reasoning.insert("enabled".to_string(), json!(false));
                } else if let Some(effort) = &options.effort {
                    reasoning.insert("effort".to_string(), json!(effort));
                } else if let Some(max_tokens) = options.max_tokens {
                    reasoning.insert("max_tokens".to_string(), json!(max_tokens));
                } else {
                    reasoning.insert("enabled".to_string(), json!(true));
                }
                if options.exclude {
                    reasoning.insert("exclude".to_string(), json!(true));
                }
                body.insert("reasoning".to_string(), Value::Object(reasoning));
            }
            // deepseek-reasoner always reasons and rejects the knobs
            Self::DeepSeek => {}
            Self::Groq => {
                let format = if options.exclude || !options.enabled {
                    "hidden"
                } else {
                    "parsed"
                };
                body.insert("reasoning_format".to_string(), json!(format));
                if let (true, Some(effort)) = (options.enabled, &options.effort) {
                    body.insert("reasoning_effort".to_string(), json!(effort));
                }
            }
        }
    }

    /// Normalize a buffered completion.
    ///
    /// # Errors
    /// Returns `NoChoices` when the response has no choices
    pub fn normalize(
        self,
        raw: RawCompletion,
        options: &NormalizeOptions,
    ) -> GatewayResult<UnifiedResponse> {
        let RawCompletion {
            id,
            created,
            model,
            choices,
            usage,
        } = raw;

        let choice = choices
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::NoChoices {
                provider: options.provider.clone(),
            })?;
        let message = choice.message;

        let tokens = reasoning::extract(
            ReasoningFields {
                details: message.reasoning_details.as_deref(),
                reasoning: message.reasoning.as_deref(),
                reasoning_content: message.reasoning_content.as_deref(),
            },
            self.reasoning_sources(),
        );

        let reported = usage.as_ref().and_then(RawUsage::reported_reasoning_tokens);
        let reasoning_tokens = reported.unwrap_or_else(|| estimate_reasoning(&tokens));
        let usage = unify_usage(usage.as_ref(), reasoning_tokens);

        let reasoning = ReasoningInfo {
            enabled: options.reasoning_requested || !tokens.is_empty() || reasoning_tokens > 0,
            excluded: options.exclude_reasoning,
            tokens: if options.exclude_reasoning {
                Vec::new()
            } else {
                tokens
            },
            total_tokens: reasoning_tokens,
        };

        let now = Utc::now();
        Ok(UnifiedResponse {
            content: ResponseContent {
                text: message.content.unwrap_or_default(),
                tool_calls: message.tool_calls.unwrap_or_default(),
                finish_reason: choice.finish_reason.map(FinishReason::from),
            },
            reasoning,
            usage,
            metadata: ResponseMetadata {
                provider: options.provider.clone(),
                model: if model.is_empty() {
                    options.model.clone()
                } else {
                    model
                },
                response_id: id,
                created_at: DateTime::<Utc>::from_timestamp(created, 0).unwrap_or(now),
                completed_at: now,
                cached: false,
            },
        })
    }

    /// Normalize one streamed chunk. Absent fields stay `None`.
    #[must_use]
    pub fn normalize_chunk(self, raw: RawChunk, options: &NormalizeOptions) -> UnifiedChunk {
        let RawChunk {
            id, choices, usage, ..
        } = raw;

        let mut chunk = UnifiedChunk {
            response_id: (!id.is_empty()).then_some(id),
            usage: usage.as_ref().map(|u| {
                unify_usage(Some(u), u.reported_reasoning_tokens().unwrap_or_default())
            }),
            ..Default::default()
        };

        let Some(choice) = choices.into_iter().next() else {
            return chunk;
        };
        let delta = choice.delta;

        if !options.exclude_reasoning {
            let tokens = reasoning::extract(
                ReasoningFields {
                    details: delta.reasoning_details.as_deref(),
                    reasoning: delta.reasoning.as_deref(),
                    reasoning_content: delta.reasoning_content.as_deref(),
                },
                self.reasoning_sources(),
            );
            chunk.reasoning = (!tokens.is_empty()).then_some(tokens);
        }

        chunk.content = delta.content.filter(|c| !c.is_empty());
        chunk.tool_calls = delta.tool_calls.filter(|calls| !calls.is_empty());
        chunk.finish_reason = choice.finish_reason.map(FinishReason::from);
        chunk
    }
}

impl fmt::Display for ProviderAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderAdapter {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "openrouter" => Ok(Self::OpenRouter),
            "deepseek" => Ok(Self::DeepSeek),
            "groq" => Ok(Self::Groq),
            "generic" => Ok(Self::Generic),
            other => Err(GatewayError::Configuration {
                message: format!("unknown provider adapter '{other}'"),
            }),
        }
    }
}

fn estimate_reasoning(tokens: &[ReasoningToken]) -> u32 {
    let chars: usize = tokens
        .iter()
        .filter(|t| t.kind != ReasoningKind::Encrypted)
        .map(|t| t.content.chars().count())
        .sum();
    estimate_tokens(chars)
}

fn unify_usage(usage: Option<&RawUsage>, reasoning_tokens: u32) -> UnifiedUsage {
    let Some(usage) = usage else {
        return UnifiedUsage {
            reasoning_tokens,
            ..Default::default()
        };
    };
    let total = if usage.total_tokens == 0 {
        usage.prompt_tokens + usage.completion_tokens
    } else {
        usage.total_tokens
    };
    UnifiedUsage {
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
        reasoning_tokens,
        total_tokens: total,
        cost: usage.cost,
    }
}

/// Flatten reasoning into one legacy string.
///
/// Joins `text` and `summary` contents with newlines. Returns `None` when
/// reasoning was excluded or there is nothing readable.
#[must_use]
pub fn to_legacy_reasoning(response: &UnifiedResponse) -> Option<String> {
    if response.reasoning.excluded {
        return None;
    }
    let parts: Vec<&str> = response
        .reasoning
        .tokens
        .iter()
        .filter(|t| matches!(t.kind, ReasoningKind::Text | ReasoningKind::Summary))
        .map(|t| t.content.as_str())
        .collect();
    (!parts.is_empty()).then(|| parts.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw::{RawChoice, RawChunkChoice, RawDelta, RawMessage};
    use gateway_core::{FunctionDelta, ToolCallDelta};

    fn options() -> NormalizeOptions {
        NormalizeOptions::new("openrouter", "deepseek/deepseek-r1")
    }

    fn completion(message: RawMessage, usage: Option<RawUsage>) -> RawCompletion {
        RawCompletion {
            id: "gen-1".to_string(),
            created: 1_700_000_000,
            model: String::new(),
            choices: vec![RawChoice {
                index: 0,
                message,
                finish_reason: Some("stop".to_string()),
            }],
            usage,
        }
    }

    #[test]
    fn test_empty_choices_fail() {
        for adapter in ProviderAdapter::ALL {
            let err = adapter
                .normalize(RawCompletion::default(), &options())
                .expect_err("no choices");
            assert!(matches!(err, GatewayError::NoChoices { .. }));
        }
    }

    #[test]
    fn test_normalize_plain_response() {
        let raw = completion(
            RawMessage {
                content: Some("Hello".to_string()),
                ..Default::default()
            },
            Some(RawUsage {
                prompt_tokens: 10,
                completion_tokens: 2,
                total_tokens: 12,
                ..Default::default()
            }),
        );

        let unified = ProviderAdapter::OpenAi.normalize(raw, &options()).expect("normalize");
        assert_eq!(unified.content.text, "Hello");
        assert_eq!(unified.content.finish_reason, Some(FinishReason::Stop));
        assert_eq!(unified.usage.total_tokens, 12);
        assert!(!unified.reasoning.enabled);
        assert_eq!(unified.metadata.model, "deepseek/deepseek-r1");
        assert_eq!(unified.metadata.response_id, "gen-1");
        assert_eq!(unified.metadata.created_at.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_deepseek_reasoning_estimated() {
        let raw = completion(
            RawMessage {
                content: Some("4".to_string()),
                reasoning_content: Some("two plus two".to_string()),
                ..Default::default()
            },
            None,
        );

        let unified = ProviderAdapter::DeepSeek
            .normalize(raw, &options())
            .expect("normalize");
        assert!(unified.reasoning.enabled);
        assert_eq!(unified.reasoning.tokens.len(), 1);
        assert_eq!(unified.reasoning.tokens[0].content, "two plus two");
        // 12 chars
        assert_eq!(unified.reasoning.total_tokens, 3);
        assert_eq!(unified.usage.reasoning_tokens, 3);
    }

    #[test]
    fn test_reported_count_wins_over_estimate() {
        let raw = completion(
            RawMessage {
                reasoning: Some("x".repeat(400)),
                ..Default::default()
            },
            Some(RawUsage {
                reasoning_tokens: Some(7),
                ..Default::default()
            }),
        );
        let unified = ProviderAdapter::Groq.normalize(raw, &options()).expect("normalize");
        assert_eq!(unified.reasoning.total_tokens, 7);
    }

    #[test]
    fn test_exclude_keeps_counts() {
        let raw = completion(
            RawMessage {
                reasoning: Some("secret thoughts".to_string()),
                ..Default::default()
            },
            None,
        );
        let opts = options().with_reasoning(Some(&ReasoningOptions {
            enabled: true,
            effort: None,
            max_tokens: None,
            exclude: true,
        }));

        let unified = ProviderAdapter::OpenRouter
            .normalize(raw, &opts)
            .expect("normalize");
        assert!(unified.reasoning.excluded);
        assert!(unified.reasoning.tokens.is_empty());
        assert_eq!(unified.reasoning.total_tokens, 4);
        assert_eq!(to_legacy_reasoning(&unified), None);
    }

    #[test]
    fn test_openai_ignores_reasoning_text() {
        let raw = completion(
            RawMessage {
                content: Some("ok".to_string()),
                reasoning: Some("should not appear".to_string()),
                ..Default::default()
            },
            None,
        );
        let unified = ProviderAdapter::OpenAi.normalize(raw, &options()).expect("normalize");
        assert!(unified.reasoning.tokens.is_empty());
    }

    #[test]
    fn test_legacy_reasoning_joins_readable_tokens() {
        let mut unified = ProviderAdapter::Generic
            .normalize(
                completion(RawMessage::default(), None),
                &options(),
            )
            .expect("normalize");
        unified.reasoning.tokens = vec![
            ReasoningToken::text("first", 0),
            ReasoningToken {
                kind: ReasoningKind::Encrypted,
                ..ReasoningToken::text("opaque", 1)
            },
            ReasoningToken {
                kind: ReasoningKind::Summary,
                ..ReasoningToken::text("second", 2)
            },
        ];

        assert_eq!(to_legacy_reasoning(&unified).as_deref(), Some("first\nsecond"));
    }

    #[test]
    fn test_normalize_chunk() {
        let raw = RawChunk {
            id: "chunk-1".to_string(),
            choices: vec![RawChunkChoice {
                index: 0,
                delta: RawDelta {
                    content: Some("Hel".to_string()),
                    reasoning_content: Some("hmm".to_string()),
                    tool_calls: Some(vec![ToolCallDelta {
                        index: 0,
                        id: Some("call_1".to_string()),
                        call_type: Some("function".to_string()),
                        function: Some(FunctionDelta {
                            name: Some("get_".to_string()),
                            arguments: None,
                        }),
                    }]),
                    ..Default::default()
                },
                finish_reason: None,
            }],
            ..Default::default()
        };

        let chunk = ProviderAdapter::DeepSeek.normalize_chunk(raw, &options());
        assert_eq!(chunk.response_id.as_deref(), Some("chunk-1"));
        assert_eq!(chunk.content.as_deref(), Some("Hel"));
        assert_eq!(chunk.reasoning.as_ref().map(Vec::len), Some(1));
        assert_eq!(chunk.tool_calls.as_ref().map(Vec::len), Some(1));
        assert!(chunk.finish_reason.is_none());
        assert!(chunk.usage.is_none());
    }

    #[test]
    fn test_usage_only_chunk() {
        let raw = RawChunk {
            usage: Some(RawUsage {
                prompt_tokens: 3,
                completion_tokens: 4,
                ..Default::default()
            }),
            ..Default::default()
        };
        let chunk = ProviderAdapter::Generic.normalize_chunk(raw, &options());
        assert_eq!(chunk.usage.map(|u| u.total_tokens), Some(7));
        assert!(chunk.content.is_none());
    }

    #[test]
    fn test_registry_lookup() {
        assert_eq!(ProviderAdapter::for_provider("openrouter"), ProviderAdapter::OpenRouter);
        assert_eq!(ProviderAdapter::for_provider("DeepSeek"), ProviderAdapter::DeepSeek);
        assert_eq!(ProviderAdapter::for_provider("my-vllm"), ProviderAdapter::Generic);
    }

    #[test]
    fn test_apply_reasoning() {
        let options = ReasoningOptions {
            enabled: true,
            effort: Some("high".to_string()),
            max_tokens: None,
            exclude: true,
        };

        let mut body = Map::new();
        ProviderAdapter::OpenRouter.apply_reasoning(&options, &mut body);
        assert_eq!(body["reasoning"], json!({"effort": "high", "exclude": true}));

        let mut body = Map::new();
        ProviderAdapter::Groq.apply_reasoning(&options, &mut body);
        assert_eq!(body["reasoning_format"], "hidden");

        let mut body = Map::new();
        ProviderAdapter::DeepSeek.apply_reasoning(&options, &mut body);
        assert!(body.is_empty());
    }
}

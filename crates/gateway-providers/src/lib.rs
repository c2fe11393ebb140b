//! # Gateway Providers
//!
//! Upstream LLM providers for the Chat Gateway.
//!
//! Every supported upstream speaks the OpenAI chat-completions protocol, so a
//! single HTTP client ([`OpenAiCompatProvider`]) serves them all. What differs
//! is the dialect, chiefly how reasoning is requested and returned; the
//! closed [`ProviderAdapter`] enum captures those differences and normalizes
//! raw responses into the unified schema.
//!
//! Supported dialects:
//! - OpenAI
//! - OpenRouter
//! - DeepSeek
//! - Groq
//! - Generic OpenAI-compatible endpoints (vLLM, Ollama, ...)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod normalize;
pub mod openai_compat;
pub mod provider;
pub mod raw;
pub mod registry;

#[cfg(any(test, feature = "testing"))]
pub mod scripted;

// Re-export main types
pub use normalize::{estimate_tokens, to_legacy_reasoning, NormalizeOptions, ProviderAdapter};
pub use openai_compat::{OpenAiCompatConfig, OpenAiCompatProvider};
pub use provider::{ChatProvider, RawChunkStream};
pub use raw::{RawChunk, RawCompletion, RawUsage};
pub use registry::{ProviderEntry, ProviderRegistry};

#[cfg(any(test, feature = "testing"))]
pub use scripted::ScriptedProvider;

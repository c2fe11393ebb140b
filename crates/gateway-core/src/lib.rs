//! # Gateway Core
//!
//! Core types and error handling for the LLM Chat Gateway.
//!
//! This crate provides the foundational types used throughout the gateway:
//! - Request types and validation
//! - The unified response and chunk schema every provider is normalized into
//! - The provider-independent error taxonomy
//! - Identifier newtypes, the clock abstraction and the model catalog seam

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod catalog;
pub mod clock;
pub mod error;
pub mod request;
pub mod response;
pub mod streaming;
pub mod types;

// Re-export commonly used types
pub use catalog::{ModelCapabilities, ModelCatalog, ModelDescriptor, Pricing, StaticModelCatalog};
pub use clock::{system_clock, Clock, ManualClock, SharedClock, SystemClock};
pub use error::{ErrorKind, ErrorPayload, GatewayError, GatewayResult};
pub use request::{
    ChatMessage, ChatRequest, ContentPart, FunctionCall, FunctionDefinition, ImageUrl,
    MessageContent, MessageRole, ReasoningOptions, RequestedCapabilities, SamplingParams,
    ToolCall, ToolChoice, ToolDefinition,
};
pub use response::{
    FinishReason, ReasoningInfo, ReasoningKind, ReasoningToken, ResponseContent,
    ResponseMetadata, UnifiedResponse, UnifiedUsage,
};
pub use streaming::{FunctionDelta, ToolCallDelta, UnifiedChunk};
pub use types::{ModelTarget, RequestId, SessionId};

//! Provider trait.

use crate::raw::{RawChunk, RawCompletion};
use async_trait::async_trait;
use futures::stream::BoxStream;
use gateway_core::{ChatRequest, GatewayResult};

/// Stream of raw upstream chunks
pub type RawChunkStream = BoxStream<'static, GatewayResult<RawChunk>>;

/// An upstream chat-completions endpoint.
///
/// `request.model` is already the provider-local model id. Implementations
/// return raw wire data; normalization happens in the caller so that the
/// same adapter logic applies to every transport.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Provider name, e.g. `openrouter`
    fn name(&self) -> &str;

    /// Buffered completion
    ///
    /// # Errors
    /// Upstream failures are classified with [`gateway_core::GatewayError::from_upstream`]
    async fn complete(&self, request: &ChatRequest) -> GatewayResult<RawCompletion>;

    /// Streaming completion. The stream ends after the provider's terminator
    /// or on the first error.
    ///
    /// # Errors
    /// Returns an error if the stream cannot be opened
    async fn stream(&self, request: &ChatRequest) -> GatewayResult<RawChunkStream>;
}

//! Scripted provider for tests and local development.
//!
//! Echoes the last message or replays a chunk sequence without any network I/O.
//! Failures can be injected for the first N calls, after the scripted chunks,
//! or by holding a stream open until the consumer goes away.

use crate::provider::{ChatProvider, RawChunkStream};
use crate::raw::{RawChoice, RawChunk, RawChunkChoice, RawCompletion, RawDelta, RawMessage, RawUsage};
use async_stream::stream;
use async_trait::async_trait;
use gateway_core::{ChatRequest, GatewayError, GatewayResult};
use std::sync::atomic::{AtomicU32, Ordering};

/// Provider that replays a script
#[derive(Debug)]
pub struct ScriptedProvider {
    name: String,
    chunks: Vec<RawChunk>,
    hold_open: bool,
    stream_error: Option<GatewayError>,
    failure: Option<GatewayError>,
    failures_left: AtomicU32,
    calls: AtomicU32,
}

impl ScriptedProvider {
    /// Provider that echoes the last message back
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            chunks: Vec::new(),
            hold_open: false,
            stream_error: None,
            failure: None,
            failures_left: AtomicU32::new(0),
            calls: AtomicU32::new(0),
        }
    }

    /// Yield these chunks from `stream`
    #[must_use]
    pub fn with_chunks(mut self, chunks: Vec<RawChunk>) -> Self {
        self.chunks = chunks;
        self
    }

    /// Keep the stream open after the last chunk
    #[must_use]
    pub fn hold_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    /// Fail the stream after the scripted chunks
    #[must_use]
    pub fn with_stream_error(mut self, error: GatewayError) -> Self {
        self.stream_error = Some(error);
        self
    }

    /// Fail the first `times` calls with `error`
    #[must_use]
    pub fn failing(mut self, error: GatewayError, times: u32) -> Self {
        self.failure = Some(error);
        self.failures_left = AtomicU32::new(times);
        self
    }

    /// Calls made so far, successful or not
    #[must_use]
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Content chunks followed by a chunk carrying `finish_reason` and usage
    #[must_use]
    pub fn text_chunks(parts: &[&str], finish_reason: &str) -> Vec<RawChunk> {
        let mut chunks: Vec<RawChunk> = parts
            .iter()
            .map(|part| RawChunk {
                id: "scripted".to_string(),
                choices: vec![RawChunkChoice {
                    index: 0,
                    delta: RawDelta {
                        content: Some((*part).to_string()),
                        ..Default::default()
                    },
                    finish_reason: None,
                }],
                ..Default::default()
            })
            .collect();

        let completion_tokens = u32::try_from(parts.len()).unwrap_or(u32::MAX);
        chunks.push(RawChunk {
            id: "scripted".to_string(),
            choices: vec![RawChunkChoice {
                index: 0,
                delta: RawDelta::default(),
                finish_reason: Some(finish_reason.to_string()),
            }],
            usage: Some(RawUsage {
                prompt_tokens: 1,
                completion_tokens,
                total_tokens: completion_tokens + 1,
                ..Default::default()
            }),
            ..Default::default()
        });
        chunks
    }

    fn begin_call(&self) -> GatewayResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let Some(error) = &self.failure else {
            return Ok(());
        };
        let took = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match took {
            Ok(_) => Err(error.clone()),
            Err(_) => Ok(()),
        }
    }

    fn echo(&self, request: &ChatRequest) -> RawCompletion {
        let text = request
            .messages
            .last()
            .and_then(|m| m.content.as_text())
            .unwrap_or_default()
            .to_string();
        RawCompletion {
            id: format!("{}-echo", self.name),
            created: 0,
            model: request.model.clone(),
            choices: vec![RawChoice {
                index: 0,
                message: RawMessage {
                    role: Some("assistant".to_string()),
                    content: Some(text),
                    ..Default::default()
                },
                finish_reason: Some("stop".to_string()),
            }],
            usage: Some(RawUsage {
                prompt_tokens: request.estimated_prompt_tokens(),
                completion_tokens: 1,
                total_tokens: request.estimated_prompt_tokens() + 1,
                ..Default::default()
            }),
        }
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: &ChatRequest) -> GatewayResult<RawCompletion> {
        self.begin_call()?;
        Ok(self.echo(request))
    }

    async fn stream(&self, _request: &ChatRequest) -> GatewayResult<RawChunkStream> {
        self.begin_call()?;

        let chunks = self.chunks.clone();
        let hold_open = self.hold_open;
        let stream_error = self.stream_error.clone();

        Ok(Box::pin(stream! {
            for chunk in chunks {
                yield Ok(chunk);
            }
            if let Some(error) = stream_error {
                yield Err(error);
            } else if hold_open {
                futures::future::pending::<()>().await;
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use gateway_core::ChatMessage;
    use std::time::Duration;

    fn request() -> ChatRequest {
        ChatRequest::builder()
            .model("m")
            .message(ChatMessage::user("ping"))
            .build()
            .expect("valid request")
    }

    #[tokio::test]
    async fn test_echo_and_failures() {
        let provider = ScriptedProvider::new("p")
            .failing(GatewayError::provider("p", "boom", Some(500), true), 1);

        assert!(provider.complete(&request()).await.is_err());
        let raw = provider.complete(&request()).await.expect("second call succeeds");
        assert_eq!(raw.choices[0].message.content.as_deref(), Some("ping"));
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_stream_script() {
        let provider = ScriptedProvider::new("p")
            .with_chunks(ScriptedProvider::text_chunks(&["a", "b"], "stop"))
            .with_stream_error(GatewayError::timeout(Duration::from_secs(1)));

        let items: Vec<_> = provider.stream(&request()).await.expect("open").collect().await;
        assert_eq!(items.len(), 4);
        assert!(items[..3].iter().all(Result::is_ok));
        assert!(items[3].is_err());
    }
}

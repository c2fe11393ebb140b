//! Request types for the gateway.
//!
//! This module defines the request format accepted from clients, both over
//! HTTP and over streaming sessions, before it is routed to a provider.

use crate::error::GatewayError;
use crate::types::{RequestId, SessionId};
use serde::{Deserialize, Serialize};

/// Chat-completion request as admitted by the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Correlation id
    #[serde(default = "RequestId::generate")]
    pub id: RequestId,

    /// Target model, `provider/model` or a bare model for the default provider
    pub model: String,

    /// Chat messages in conversation order
    pub messages: Vec<ChatMessage>,

    /// Sampling parameters
    #[serde(flatten)]
    pub sampling: SamplingParams,

    /// Deliver incrementally over a session
    #[serde(default)]
    pub stream: bool,

    /// Tool/function definitions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,

    /// Tool choice configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,

    /// Reasoning options
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<ReasoningOptions>,

    /// User identifier for admission control
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// Session the request arrived on, if any
    #[serde(skip)]
    pub session_id: Option<SessionId>,
}

/// Sampling parameters forwarded to the provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    /// Sampling temperature (0.0 - 2.0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Top-p (nucleus sampling) parameter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// Frequency penalty (-2.0 to 2.0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,

    /// Presence penalty (-2.0 to 2.0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,

    /// Stop sequences
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,

    /// Seed for deterministic generation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
}

/// Reasoning options requested by the client
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasoningOptions {
    /// Ask the model to reason
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Effort hint: `low`, `medium` or `high`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effort: Option<String>,

    /// Reasoning token budget
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Reason but leave the reasoning out of the response
    #[serde(default)]
    pub exclude: bool,
}

fn default_true() -> bool {
    true
}

/// Capability flags a request needs from its model
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestedCapabilities {
    /// Image inputs present
    pub vision: bool,
    /// Tool definitions present
    pub tools: bool,
    /// Reasoning requested
    pub reasoning: bool,
}

impl ChatRequest {
    /// Create a new builder for `ChatRequest`
    #[must_use]
    pub fn builder() -> ChatRequestBuilder {
        ChatRequestBuilder::default()
    }

    /// Capabilities implied by the request body
    #[must_use]
    pub fn requested_capabilities(&self) -> RequestedCapabilities {
        RequestedCapabilities {
            vision: self.messages.iter().any(|m| m.content.has_images()),
            tools: self.tools.as_ref().is_some_and(|t| !t.is_empty()),
            reasoning: self.reasoning.as_ref().is_some_and(|r| r.enabled),
        }
    }

    /// Rough prompt size, four characters per token
    #[must_use]
    pub fn estimated_prompt_tokens(&self) -> u32 {
        let chars: usize = self.messages.iter().map(|m| m.content.text_len()).sum();
        chars.div_ceil(4) as u32
    }

    /// Validate the entire request
    ///
    /// # Errors
    /// Returns error if any field is invalid
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.id.as_str().trim().is_empty() {
            return Err(GatewayError::validation(
                "request id cannot be empty",
                Some("requestId".to_string()),
                "missing_request_id",
            ));
        }

        if self.model.trim().is_empty() {
            return Err(GatewayError::validation(
                "model is required",
                Some("model".to_string()),
                "missing_model",
            ));
        }

        if self.messages.is_empty() {
            return Err(GatewayError::validation(
                "messages cannot be empty",
                Some("messages".to_string()),
                "empty_messages",
            ));
        }

        for (i, message) in self.messages.iter().enumerate() {
            if message.role == MessageRole::Tool && message.tool_call_id.is_none() {
                return Err(GatewayError::validation(
                    format!("messages[{i}] has role tool but no tool_call_id"),
                    Some(format!("messages[{i}].tool_call_id")),
                    "missing_tool_call_id",
                ));
            }
            if message.content.is_empty() && message.tool_calls.is_none() {
                return Err(GatewayError::validation(
                    format!("messages[{i}] has empty content"),
                    Some(format!("messages[{i}].content")),
                    "empty_content",
                ));
            }
        }

        self.sampling.validate()?;

        if let Some(effort) = self.reasoning.as_ref().and_then(|r| r.effort.as_deref()) {
            if !matches!(effort, "low" | "medium" | "high") {
                return Err(GatewayError::validation(
                    format!("reasoning.effort must be low, medium or high, got {effort}"),
                    Some("reasoning.effort".to_string()),
                    "invalid_reasoning_effort",
                ));
            }
        }

        Ok(())
    }
}

impl SamplingParams {
    /// Range-check every present parameter
    ///
    /// # Errors
    /// Returns error if a parameter is out of range
    pub fn validate(&self) -> Result<(), GatewayError> {
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(GatewayError::validation(
                    format!("temperature must be between 0.0 and 2.0, got {t}"),
                    Some("temperature".to_string()),
                    "invalid_temperature",
                ));
            }
        }

        if let Some(p) = self.top_p {
            if !(0.0..=1.0).contains(&p) {
                return Err(GatewayError::validation(
                    format!("top_p must be between 0.0 and 1.0, got {p}"),
                    Some("top_p".to_string()),
                    "invalid_top_p",
                ));
            }
        }

        if self.max_tokens == Some(0) {
            return Err(GatewayError::validation(
                "max_tokens must be at least 1",
                Some("max_tokens".to_string()),
                "invalid_max_tokens",
            ));
        }

        if let Some(fp) = self.frequency_penalty {
            if !(-2.0..=2.0).contains(&fp) {
                return Err(GatewayError::validation(
                    format!("frequency_penalty must be between -2.0 and 2.0, got {fp}"),
                    Some("frequency_penalty".to_string()),
                    "invalid_frequency_penalty",
                ));
            }
        }

        if let Some(pp) = self.presence_penalty {
            if !(-2.0..=2.0).contains(&pp) {
                return Err(GatewayError::validation(
                    format!("presence_penalty must be between -2.0 and 2.0, got {pp}"),
                    Some("presence_penalty".to_string()),
                    "invalid_presence_penalty",
                ));
            }
        }

        Ok(())
    }
}

/// Builder for `ChatRequest`
#[derive(Debug, Default)]
pub struct ChatRequestBuilder {
    id: Option<RequestId>,
    model: Option<String>,
    messages: Vec<ChatMessage>,
    sampling: SamplingParams,
    stream: bool,
    tools: Option<Vec<ToolDefinition>>,
    tool_choice: Option<ToolChoice>,
    reasoning: Option<ReasoningOptions>,
    user: Option<String>,
    session_id: Option<SessionId>,
}

impl ChatRequestBuilder {
    /// Set the request ID
    #[must_use]
    pub fn id(mut self, id: impl Into<RequestId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the model
    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the messages
    #[must_use]
    pub fn messages(mut self, messages: Vec<ChatMessage>) -> Self {
        self.messages = messages;
        self
    }

    /// Add a message
    #[must_use]
    pub fn message(mut self, message: ChatMessage) -> Self {
        self.messages.push(message);
        self
    }

    /// Set the temperature
    #[must_use]
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.sampling.temperature = Some(temperature);
        self
    }

    /// Set max_tokens
    #[must_use]
    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.sampling.max_tokens = Some(max_tokens);
        self
    }

    /// Set top_p
    #[must_use]
    pub fn top_p(mut self, top_p: f32) -> Self {
        self.sampling.top_p = Some(top_p);
        self
    }

    /// Replace all sampling parameters
    #[must_use]
    pub fn sampling(mut self, sampling: SamplingParams) -> Self {
        self.sampling = sampling;
        self
    }

    /// Enable streaming
    #[must_use]
    pub fn stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Set tools
    #[must_use]
    pub fn tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Set tool_choice
    #[must_use]
    pub fn tool_choice(mut self, tool_choice: ToolChoice) -> Self {
        self.tool_choice = Some(tool_choice);
        self
    }

    /// Set reasoning options
    #[must_use]
    pub fn reasoning(mut self, reasoning: ReasoningOptions) -> Self {
        self.reasoning = Some(reasoning);
        self
    }

    /// Set user
    #[must_use]
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Bind to a session
    #[must_use]
    pub fn session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    /// Build the request
    ///
    /// # Errors
    /// Returns error if required fields are missing or invalid
    pub fn build(self) -> Result<ChatRequest, GatewayError> {
        let model = self.model.ok_or_else(|| {
            GatewayError::validation("model is required", Some("model".to_string()), "missing_model")
        })?;

        let request = ChatRequest {
            id: self.id.unwrap_or_else(RequestId::generate),
            model,
            messages: self.messages,
            sampling: self.sampling,
            stream: self.stream,
            tools: self.tools,
            tool_choice: self.tool_choice,
            reasoning: self.reasoning,
            user: self.user,
            session_id: self.session_id,
        };

        request.validate()?;

        Ok(request)
    }
}

/// Chat message with role and content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role of the message author
    pub role: MessageRole,

    /// Content of the message
    #[serde(default = "MessageContent::empty")]
    pub content: MessageContent,

    /// Optional name of the author
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Tool calls made by the assistant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,

    /// Tool call ID for tool response messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn with_role(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text(content.into()),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Create a system message
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::System, content)
    }

    /// Create a user message
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::User, content)
    }

    /// Create an assistant message
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::Assistant, content)
    }

    /// Create a tool response message
    #[must_use]
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::with_role(MessageRole::Tool, content)
        }
    }
}

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System message
    System,
    /// User message
    User,
    /// Assistant message
    Assistant,
    /// Tool response message
    Tool,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::Tool => write!(f, "tool"),
        }
    }
}

/// Message content (text or multimodal parts)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Simple text content
    Text(String),
    /// Multimodal content parts
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    fn empty() -> Self {
        Self::Text(String::new())
    }

    /// Get as text if this is a text content
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Parts(_) => None,
        }
    }

    /// Check if content is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(s) => s.is_empty(),
            Self::Parts(parts) => parts.is_empty(),
        }
    }

    /// Whether any part is an image
    #[must_use]
    pub fn has_images(&self) -> bool {
        match self {
            Self::Text(_) => false,
            Self::Parts(parts) => parts
                .iter()
                .any(|p| matches!(p, ContentPart::ImageUrl { .. })),
        }
    }

    /// Character count of the textual parts
    #[must_use]
    pub fn text_len(&self) -> usize {
        match self {
            Self::Text(s) => s.chars().count(),
            Self::Parts(parts) => parts
                .iter()
                .map(|p| match p {
                    ContentPart::Text { text } => text.chars().count(),
                    ContentPart::ImageUrl { .. } => 0,
                })
                .sum(),
        }
    }
}

/// Content part for multimodal messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Text content part
    Text {
        /// The text content
        text: String,
    },
    /// Image content part
    ImageUrl {
        /// Image URL details
        image_url: ImageUrl,
    },
}

/// Image URL for vision models
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageUrl {
    /// URL of the image
    pub url: String,
    /// Detail level for processing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Tool/function definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool type (currently only "function" is supported)
    #[serde(rename = "type")]
    pub tool_type: String,
    /// Function definition
    pub function: FunctionDefinition,
}

/// Function definition for tools
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    /// Function name
    pub name: String,
    /// Function description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Function parameters (JSON Schema)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

/// Tool call made by the assistant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique ID for this tool call
    pub id: String,
    /// Tool type
    #[serde(rename = "type")]
    pub tool_type: String,
    /// Function call details
    pub function: FunctionCall,
}

/// Function call details
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Function name
    pub name: String,
    /// Function arguments as an unparsed JSON string
    pub arguments: String,
}

/// Tool choice configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolChoice {
    /// String choice: "none", "auto", "required"
    String(String),
    /// Specific tool choice
    Tool {
        /// Tool type
        #[serde(rename = "type")]
        tool_type: String,
        /// Function to call
        function: ToolChoiceFunction,
    },
}

/// Function choice for specific tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolChoiceFunction {
    /// Function name
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let request = ChatRequest::builder()
            .model("openai/gpt-4o")
            .message(ChatMessage::user("Hello"))
            .temperature(0.7)
            .max_tokens(100)
            .build();

        assert!(request.is_ok());
        let request = request.expect("should build");
        assert_eq!(request.model, "openai/gpt-4o");
        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.sampling.temperature, Some(0.7));
        assert_eq!(request.sampling.max_tokens, Some(100));
    }

    #[test]
    fn test_request_builder_missing_model() {
        let request = ChatRequest::builder()
            .message(ChatMessage::user("Hello"))
            .build();

        assert!(request.is_err());
    }

    #[test]
    fn test_request_builder_missing_messages() {
        let request = ChatRequest::builder().model("openai/gpt-4o").build();

        assert!(request.is_err());
    }

    #[test]
    fn test_request_validation_invalid_temperature() {
        let request = ChatRequest::builder()
            .model("openai/gpt-4o")
            .message(ChatMessage::user("Hello"))
            .temperature(3.0)
            .build();

        assert!(request.is_err());
    }

    #[test]
    fn test_tool_message_requires_call_id() {
        let mut message = ChatMessage::tool("call_1", "42");
        message.tool_call_id = None;
        let request = ChatRequest::builder()
            .model("openai/gpt-4o")
            .message(message)
            .build();

        assert!(request.is_err());
    }

    #[test]
    fn test_invalid_reasoning_effort() {
        let request = ChatRequest::builder()
            .model("openai/o3")
            .message(ChatMessage::user("think"))
            .reasoning(ReasoningOptions {
                enabled: true,
                effort: Some("maximum".to_string()),
                ..Default::default()
            })
            .build();

        assert!(request.is_err());
    }

    #[test]
    fn test_requested_capabilities() {
        let request = ChatRequest::builder()
            .model("openai/gpt-4o")
            .message(ChatMessage {
                role: MessageRole::User,
                content: MessageContent::Parts(vec![
                    ContentPart::Text {
                        text: "what is this".to_string(),
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: "https://example.com/cat.png".to_string(),
                            detail: None,
                        },
                    },
                ]),
                name: None,
                tool_calls: None,
                tool_call_id: None,
            })
            .build()
            .expect("should build");

        let caps = request.requested_capabilities();
        assert!(caps.vision);
        assert!(!caps.tools);
        assert!(!caps.reasoning);
        assert_eq!(request.estimated_prompt_tokens(), 3);
    }

    #[test]
    fn test_deserialize_flattened_sampling() {
        let request: ChatRequest = serde_json::from_value(serde_json::json!({
            "model": "openai/gpt-4o",
            "messages": [{"role": "user", "content": "Hello"}],
            "temperature": 0.2,
            "stop": ["\n"],
            "reasoning": {"effort": "low"}
        }))
        .expect("deserialize");

        assert_eq!(request.sampling.temperature, Some(0.2));
        assert_eq!(request.sampling.stop, Some(vec!["\n".to_string()]));
        assert!(request.reasoning.as_ref().is_some_and(|r| r.enabled));
        assert!(!request.stream);
        assert!(request.id.as_str().starts_with("req_"));
    }

    #[test]
    fn test_message_content_serialization() {
        let text_content = MessageContent::Text("Hello".to_string());
        let json = serde_json::to_string(&text_content).expect("serialize");
        assert_eq!(json, "\"Hello\"");

        let parts_content = MessageContent::Parts(vec![ContentPart::Text {
            text: "Hello".to_string(),
        }]);
        let json = serde_json::to_string(&parts_content).expect("serialize");
        assert!(json.contains("text"));
    }
}

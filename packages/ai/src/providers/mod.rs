//! LLM provider abstraction and implementations.
//!
//! Supports Anthropic Claude and `OpenAI` via a common trait.

pub mod anthropic;
#[cfg(feature = "bedrock")]
pub mod bedrock;
pub mod openai;

use serde::{Deserialize, Serialize};

use crate::AiError;

/// A message in the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Role: "system", "user", "assistant", or "tool".
    pub role: String,
    /// Message content.
    pub content: MessageContent,
}

/// Content of a message: either simple text or structured blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Simple text content.
    Text(String),
    /// Structured content blocks (for tool results, etc.).
    Blocks(Vec<ContentBlock>),
}

/// A structured content block within a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Text content.
    Text {
        /// The text.
        text: String,
    },
    /// A tool use request from the assistant.
    ToolUse {
        /// Unique ID for this tool use.
        id: String,
        /// Tool name.
        name: String,
        /// Tool input parameters.
        input: serde_json::Value,
    },
    /// A tool result being sent back.
    ToolResult {
        /// The `tool_use` ID this result corresponds to.
        tool_use_id: String,
        /// The result content.
        content: String,
    },
}

/// Response from the LLM provider.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    /// Content blocks in the response.
    pub content: Vec<ContentBlock>,
    /// Whether the model wants to use tools (vs. providing a final answer).
    pub stop_reason: StopReason,
}

/// Why the model stopped generating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// Model finished its response naturally.
    EndTurn,
    /// Model wants to call one or more tools.
    ToolUse,
    /// Maximum tokens reached.
    MaxTokens,
}

/// Trait for LLM providers.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send a chat completion request with tool definitions.
    ///
    /// # Errors
    ///
    /// Returns [`AiError`] if the request fails.
    async fn chat(
        &self,
        system_prompt: &str,
        messages: &[Message],
        tools: &[serde_json::Value],
    ) -> Result<LlmResponse, AiError>;
}

/// Creates the primary LLM provider based on environment variables.
///
/// Checks `AI_PROVIDER` (default: "anthropic") and uses the corresponding
/// API key env var (`ANTHROPIC_API_KEY`, `OPENAI_API_KEY`) or, with the
/// `bedrock` feature, the AWS credential chain.
///
/// # Errors
///
/// Returns [`AiError::Config`] if the required API key is not set.
pub async fn create_provider_from_env() -> Result<Box<dyn LlmProvider>, AiError> {
    let provider = std::env::var("AI_PROVIDER").unwrap_or_else(|_| "anthropic".to_string());
    build_provider(&provider, "AI_MODEL").await
}

/// Creates the secondary (fallback) LLM provider.
///
/// Defaults to the other of anthropic/openai from whatever `AI_PROVIDER`
/// selected, so a fallback exists with no extra configuration whenever
/// both providers' API keys happen to be set. `AI_SECONDARY_PROVIDER` and
/// `AI_SECONDARY_MODEL` override the choice explicitly.
///
/// # Errors
///
/// Returns [`AiError::Config`] if the required API key is not set.
pub async fn create_secondary_provider_from_env() -> Result<Box<dyn LlmProvider>, AiError> {
    let primary = std::env::var("AI_PROVIDER").unwrap_or_else(|_| "anthropic".to_string());
    let default_secondary = if matches!(primary.to_lowercase().as_str(), "anthropic" | "claude") {
        "openai"
    } else {
        "anthropic"
    };
    let provider = std::env::var("AI_SECONDARY_PROVIDER").unwrap_or_else(|_| default_secondary.to_string());
    build_provider(&provider, "AI_SECONDARY_MODEL").await
}

async fn build_provider(provider: &str, model_env_key: &str) -> Result<Box<dyn LlmProvider>, AiError> {
    match provider.to_lowercase().as_str() {
        "anthropic" | "claude" => {
            let api_key = std::env::var("ANTHROPIC_API_KEY").map_err(|_| AiError::Config {
                message: "ANTHROPIC_API_KEY environment variable not set".to_string(),
            })?;
            let model = std::env::var(model_env_key).unwrap_or_else(|_| "claude-sonnet-4-20250514".to_string());
            Ok(Box::new(anthropic::AnthropicProvider::new(api_key, model)))
        }
        "openai" | "gpt" => {
            let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| AiError::Config {
                message: "OPENAI_API_KEY environment variable not set".to_string(),
            })?;
            let model = std::env::var(model_env_key).unwrap_or_else(|_| "gpt-4o".to_string());
            Ok(Box::new(openai::OpenAiProvider::new(api_key, model)))
        }
        #[cfg(feature = "bedrock")]
        "bedrock" | "aws" => {
            let model = std::env::var(model_env_key).map_err(|_| AiError::Config {
                message: format!("{model_env_key} must be set to a Bedrock model id"),
            })?;
            let region = std::env::var("AWS_REGION").ok();
            Ok(Box::new(bedrock::BedrockProvider::new(model, region).await))
        }
        other => Err(AiError::Config {
            message: format!("Unknown AI provider: {other}. Use 'anthropic', 'openai', or 'bedrock'."),
        }),
    }
}

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! LLM provider abstraction for single-turn completions.
//!
//! This crate only owns the provider seam — constructing a client for
//! Anthropic Claude, `OpenAI`, or AWS Bedrock (feature-gated), and sending
//! it one system/user prompt pair. It has no opinion about what the prompt
//! says or how the response is interpreted; callers such as the
//! lead-generation AI analysis stage own that.

pub mod providers;

use thiserror::Error;

pub use providers::{LlmProvider, create_provider_from_env, create_secondary_provider_from_env};

/// Errors that can occur during AI operations.
#[derive(Debug, Error)]
pub enum AiError {
    /// HTTP request to LLM provider failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Provider-specific error.
    #[error("Provider error: {message}")]
    Provider {
        /// Description of what went wrong.
        message: String,
    },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config {
        /// Description.
        message: String,
    },
}

/// Sends a single system/user prompt pair to `provider` and returns its
/// text response, concatenating any text blocks in the reply (providers
/// asked for no tools never return tool-use blocks, but a stray one is
/// skipped rather than treated as an error).
///
/// # Errors
///
/// Returns [`AiError`] if the request fails.
pub async fn complete(provider: &dyn LlmProvider, system_prompt: &str, user_prompt: &str) -> Result<String, AiError> {
    let messages = [providers::Message {
        role: "user".to_string(),
        content: providers::MessageContent::Text(user_prompt.to_string()),
    }];

    let response = provider.chat(system_prompt, &messages, &[]).await?;

    let text = response
        .content
        .into_iter()
        .filter_map(|block| match block {
            providers::ContentBlock::Text { text } => Some(text),
            providers::ContentBlock::ToolUse { .. } | providers::ContentBlock::ToolResult { .. } => None,
        })
        .collect::<Vec<_>>()
        .join("\n");

    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use providers::{ContentBlock, LlmResponse, Message, StopReason};

    struct StubProvider(&'static str);

    #[async_trait::async_trait]
    impl LlmProvider for StubProvider {
        async fn chat(
            &self,
            _system_prompt: &str,
            _messages: &[Message],
            _tools: &[serde_json::Value],
        ) -> Result<LlmResponse, AiError> {
            Ok(LlmResponse {
                content: vec![ContentBlock::Text {
                    text: self.0.to_string(),
                }],
                stop_reason: StopReason::EndTurn,
            })
        }
    }

    #[tokio::test]
    async fn complete_extracts_text_from_response() {
        let provider = StubProvider("hello");
        let text = complete(&provider, "system", "user").await.unwrap();
        assert_eq!(text, "hello");
    }
}

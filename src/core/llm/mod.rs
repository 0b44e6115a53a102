pub mod client;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::error::SmithResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        ChatMessage {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Sampling parameters for one completion call.
#[derive(Debug, Clone)]
pub struct CompletionParams {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// One completed chat turn.
#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
    pub tokens_used: Option<u64>,
}

/// Seam between the orchestrators and the provider. The production
/// implementation is [`client::ChatClient`]; tests substitute scripted fakes.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        params: &CompletionParams,
    ) -> SmithResult<Completion>;
}

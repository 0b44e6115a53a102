use async_trait::async_trait;
use rand::Rng;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::{ChatApi, ChatMessage, Completion, CompletionParams};
use crate::core::config::LlmConfig;
use crate::core::error::{SmithError, SmithResult};

const MAX_ATTEMPTS: u32 = 3;
const BASE_DELAY_SECS: f64 = 1.0;
const MAX_DELAY_SECS: f64 = 30.0;

// ── OpenAI-compatible request/response ──

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: u32,
    messages: &'a [ChatMessage],
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: AssistantMessage,
}

#[derive(Deserialize)]
struct AssistantMessage {
    content: String,
}

#[derive(Deserialize)]
struct Usage {
    total_tokens: u64,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<ErrorDetail>,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Chat-completion client speaking the OpenAI-compatible wire format with
/// bearer auth. Stateless apart from the key, so it is safe to share across
/// concurrent orchestrator calls.
#[derive(Debug)]
pub struct ChatClient {
    http: reqwest::Client,
    api_key: String,
    completions_url: String,
}

impl ChatClient {
    pub fn new(config: &LlmConfig) -> SmithResult<Self> {
        if config.api_key.trim().is_empty() {
            return Err(SmithError::Configuration("API key cannot be empty".into()));
        }

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SmithError::Configuration(format!("HTTP client setup failed: {e}")))?;

        Ok(ChatClient {
            http,
            api_key: config.api_key.clone(),
            completions_url: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
        })
    }

    /// Exponential backoff with a cap and 0-10% jitter. `retry_after`
    /// (seconds, from a 429) overrides the computed delay.
    fn retry_delay(attempt: u32, retry_after: Option<u64>) -> Duration {
        if let Some(secs) = retry_after {
            return Duration::from_secs(secs);
        }
        let base = (BASE_DELAY_SECS * 2f64.powi(attempt as i32)).min(MAX_DELAY_SECS);
        let jitter = rand::thread_rng().gen_range(0.0..base * 0.1);
        Duration::from_secs_f64(base + jitter)
    }

    async fn classify_failure(status: StatusCode, response: reqwest::Response) -> SmithError {
        if status == StatusCode::UNAUTHORIZED {
            return SmithError::Authentication(
                "provider rejected the API key (HTTP 401)".into(),
            );
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            return SmithError::RateLimit {
                message: "provider rate limit exceeded (HTTP 429)".into(),
                retry_after,
            };
        }
        if status.is_server_error() {
            return SmithError::Transient(format!("provider service error (HTTP {status})"));
        }

        // Remaining 4xx: permanent, surface the provider's message if any.
        let detail = response
            .json::<ErrorBody>()
            .await
            .ok()
            .and_then(|b| b.error)
            .map(|e| e.message)
            .unwrap_or_else(|| format!("HTTP {status}"));
        SmithError::Provider(detail)
    }

    async fn attempt(
        &self,
        messages: &[ChatMessage],
        params: &CompletionParams,
    ) -> SmithResult<Completion> {
        let payload = ChatRequest {
            model: &params.model,
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            messages,
        };

        let response = self
            .http
            .post(&self.completions_url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SmithError::Transient("provider request timed out".into())
                } else {
                    SmithError::Transient(format!("provider connection failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::classify_failure(status, response).await);
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| SmithError::Provider(format!("malformed completion envelope: {e}")))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| SmithError::Provider("completion contained no choices".into()))?;

        Ok(Completion {
            content,
            tokens_used: parsed.usage.map(|u| u.total_tokens),
        })
    }
}

#[async_trait]
impl ChatApi for ChatClient {
    /// Up to three attempts with the same payload; only rate-limit and
    /// transient failures are retried.
    async fn complete(
        &self,
        messages: &[ChatMessage],
        params: &CompletionParams,
    ) -> SmithResult<Completion> {
        let mut last_err = None;

        for attempt in 0..MAX_ATTEMPTS {
            match self.attempt(messages, params).await {
                Ok(completion) => {
                    debug!(
                        model = %params.model,
                        tokens = ?completion.tokens_used,
                        "chat completion succeeded"
                    );
                    return Ok(completion);
                }
                Err(err) if err.is_retryable() && attempt + 1 < MAX_ATTEMPTS => {
                    let retry_after = match &err {
                        SmithError::RateLimit { retry_after, .. } => *retry_after,
                        _ => None,
                    };
                    let delay = Self::retry_delay(attempt, retry_after);
                    warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "chat completion failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    last_err = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_err
            .unwrap_or_else(|| SmithError::Transient("completion retries exhausted".into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::LlmConfig;

    fn config(key: &str) -> LlmConfig {
        LlmConfig {
            api_key: key.to_string(),
            base_url: "https://api.deepseek.com".to_string(),
            model: "deepseek-chat".to_string(),
            temperature: 0.3,
            max_tokens_shaping: 8000,
            max_tokens_generation: 4000,
            request_timeout: Duration::from_secs(60),
        }
    }

    #[test]
    fn empty_key_fails_construction() {
        let err = ChatClient::new(&config("  ")).unwrap_err();
        assert!(matches!(err, SmithError::Configuration(_)));
    }

    #[test]
    fn completions_url_joins_without_double_slash() {
        let mut cfg = config("sk-test");
        cfg.base_url = "https://api.deepseek.com/".to_string();
        let client = ChatClient::new(&cfg).unwrap();
        assert_eq!(
            client.completions_url,
            "https://api.deepseek.com/chat/completions"
        );
    }

    #[test]
    fn retry_delay_doubles_and_caps() {
        for attempt in 0..8 {
            let delay = ChatClient::retry_delay(attempt, None).as_secs_f64();
            let base = (1.0 * 2f64.powi(attempt as i32)).min(30.0);
            assert!(delay >= base, "attempt {attempt}: {delay} < {base}");
            assert!(delay <= base * 1.1 + 0.001, "attempt {attempt}: {delay} too large");
        }
    }

    #[test]
    fn retry_after_header_overrides_backoff() {
        let delay = ChatClient::retry_delay(0, Some(7));
        assert_eq!(delay, Duration::from_secs(7));
    }
}

use crate::core::config::ScrapingConfig;
use crate::core::error::{SmithError, SmithResult};

/// HTTP fetch used by the plan interpreter. The only network access a plan
/// gets: GET over http/https with the configured timeout and user-agent.
#[derive(Clone)]
pub struct PageFetcher {
    http: reqwest::Client,
}

impl PageFetcher {
    pub fn new(config: &ScrapingConfig) -> SmithResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| SmithError::Configuration(format!("fetcher setup failed: {e}")))?;
        Ok(PageFetcher { http })
    }

    /// Fetch one page's HTML. Errors are plain strings: the executor folds
    /// them into per-source outcomes instead of propagating.
    pub async fn fetch(&self, url: &str) -> Result<String, String> {
        let parsed = reqwest::Url::parse(url).map_err(|e| format!("invalid URL: {e}"))?;
        match parsed.scheme() {
            "http" | "https" => {}
            other => return Err(format!("unsupported URL scheme '{other}'")),
        }

        let response = self
            .http
            .get(parsed)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    "request timed out".to_string()
                } else {
                    format!("request failed: {e}")
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("HTTP {status}"));
        }

        response
            .text()
            .await
            .map_err(|e| format!("failed to read body: {e}"))
    }
}

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::core::error::{SmithError, SmithResult};

const DEFAULT_BASE_URL: &str = "https://api.deepseek.com";
const DEFAULT_MODEL: &str = "deepseek-chat";
const DEFAULT_TEMPERATURE: f32 = 0.3;
const DEFAULT_MAX_TOKENS_SHAPING: u32 = 8000;
const DEFAULT_MAX_TOKENS_GENERATION: u32 = 4000;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_EXECUTION_TIMEOUT_SECS: u64 = 60;
const DEFAULT_LLM_TIMEOUT_SECS: u64 = 60;
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_DB_PATH: &str = "data/endpoints.db";
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Settings for the chat-completion provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens_shaping: u32,
    pub max_tokens_generation: u32,
    pub request_timeout: Duration,
}

/// Settings baked into generated plans and used by the sandbox fetcher.
#[derive(Debug, Clone)]
pub struct ScrapingConfig {
    /// Per-page fetch timeout.
    pub request_timeout: Duration,
    /// Wall-clock limit for a whole execution across all sources.
    pub execution_timeout: Duration,
    pub user_agent: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub scraping: ScrapingConfig,
    pub server: ServerConfig,
    pub db_path: String,
}

fn env_or<T: FromStr>(name: &str, default: T) -> SmithResult<T> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse::<T>().map_err(|_| {
            SmithError::Configuration(format!("{name} has an invalid value: {raw:?}"))
        }),
        Err(_) => Ok(default),
    }
}

fn env_string(name: &str, default: &str) -> String {
    env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

impl AppConfig {
    /// Read the full configuration from the process environment.
    /// Fails fast on a missing API key or unparseable numeric values.
    pub fn from_env() -> SmithResult<Self> {
        let api_key = env::var("DEEPSEEK_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                SmithError::Configuration(
                    "DEEPSEEK_API_KEY environment variable is required".into(),
                )
            })?;

        let llm = LlmConfig {
            api_key,
            base_url: env_string("DEEPSEEK_BASE_URL", DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            model: env_string("DEEPSEEK_MODEL", DEFAULT_MODEL),
            temperature: env_or("DEEPSEEK_TEMPERATURE", DEFAULT_TEMPERATURE)?,
            max_tokens_shaping: env_or("DEEPSEEK_MAX_TOKENS", DEFAULT_MAX_TOKENS_SHAPING)?,
            max_tokens_generation: env_or(
                "DEEPSEEK_MAX_TOKENS_GENERATION",
                DEFAULT_MAX_TOKENS_GENERATION,
            )?,
            request_timeout: Duration::from_secs(env_or(
                "DEEPSEEK_REQUEST_TIMEOUT",
                DEFAULT_LLM_TIMEOUT_SECS,
            )?),
        };

        let scraping = ScrapingConfig {
            request_timeout: Duration::from_secs(env_or(
                "SCRAPING_REQUEST_TIMEOUT",
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )?),
            execution_timeout: Duration::from_secs(env_or(
                "SCRAPING_EXECUTION_TIMEOUT",
                DEFAULT_EXECUTION_TIMEOUT_SECS,
            )?),
            user_agent: env_string("SCRAPING_USER_AGENT", DEFAULT_USER_AGENT),
        };

        let server = ServerConfig {
            host: env_string("APISMITH_HOST", "127.0.0.1"),
            port: env_or("APISMITH_PORT", DEFAULT_PORT)?,
        };

        Ok(AppConfig {
            llm,
            scraping,
            server,
            db_path: env_string("APISMITH_DB", DEFAULT_DB_PATH),
        })
    }
}

impl Default for ScrapingConfig {
    fn default() -> Self {
        ScrapingConfig {
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            execution_timeout: Duration::from_secs(DEFAULT_EXECUTION_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_or_parses_valid_numbers() {
        // Unset name: default wins.
        let port: u16 = env_or("APISMITH_TEST_UNSET_PORT", 8080).unwrap();
        assert_eq!(port, 8080);
    }

    #[test]
    fn env_or_rejects_garbage() {
        env::set_var("APISMITH_TEST_BAD_PORT", "not-a-number");
        let result: SmithResult<u16> = env_or("APISMITH_TEST_BAD_PORT", 8080);
        env::remove_var("APISMITH_TEST_BAD_PORT");
        let err = result.unwrap_err();
        assert!(matches!(err, SmithError::Configuration(_)));
        assert!(err.to_string().contains("APISMITH_TEST_BAD_PORT"));
    }

    #[test]
    fn default_scraping_config_has_browser_user_agent() {
        let cfg = ScrapingConfig::default();
        assert!(cfg.user_agent.starts_with("Mozilla/5.0"));
        assert_eq!(cfg.request_timeout, Duration::from_secs(30));
    }
}

use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use super::recover::strip_code_fences;
use crate::core::config::{LlmConfig, ScrapingConfig};
use crate::core::error::{SmithError, SmithResult};
use crate::core::llm::{ChatApi, ChatMessage, CompletionParams};
use crate::core::models::ScrapeRequest;
use crate::core::plan::validator::PlanValidator;
use crate::core::plan::{GeneratedPlan, ScraperPlan, ALLOWED_CAPABILITIES};

const GENERATION_TEMPERATURE: f32 = 0.3;
/// One regeneration after a validation failure, then give up.
const MAX_GENERATION_ATTEMPTS: u32 = 2;

/// Drives the model to emit a scraper plan, then gates it through static
/// validation before anyone may execute it.
pub struct PlanGenerator {
    chat: Arc<dyn ChatApi>,
    model: String,
    max_tokens: u32,
    scraping: ScrapingConfig,
}

impl PlanGenerator {
    pub fn new(chat: Arc<dyn ChatApi>, llm: &LlmConfig, scraping: &ScrapingConfig) -> Self {
        PlanGenerator {
            chat,
            model: llm.model.clone(),
            max_tokens: llm.max_tokens_generation,
            scraping: scraping.clone(),
        }
    }

    pub async fn generate(&self, request: &ScrapeRequest) -> SmithResult<GeneratedPlan> {
        request.validate()?;

        let messages = self.build_messages(request);
        let params = CompletionParams {
            model: self.model.clone(),
            temperature: GENERATION_TEMPERATURE,
            max_tokens: self.max_tokens,
        };

        let mut last_errors = Vec::new();
        for attempt in 1..=MAX_GENERATION_ATTEMPTS {
            let started = Instant::now();
            let completion = self.chat.complete(&messages, &params).await?;
            let generation_ms = started.elapsed().as_millis() as u64;

            let source = strip_code_fences(&completion.content);
            let validation = PlanValidator::validate(&source);

            if validation.is_executable() {
                info!(attempt, generation_ms, "plan generated and validated");
                let plan = ScraperPlan::parse(&source).map_err(|e| {
                    SmithError::Internal(format!("validated plan failed to parse: {e}"))
                })?;

                let target_urls = if request.target_urls.is_empty() {
                    plan.urls.clone()
                } else {
                    request.target_urls.clone()
                };

                return Ok(GeneratedPlan {
                    source,
                    validation,
                    target_urls,
                    required_fields: request.desired_fields.clone(),
                    model: self.model.clone(),
                    tokens_used: completion.tokens_used,
                    generation_ms,
                });
            }

            warn!(
                attempt,
                errors = ?validation.errors,
                "generated plan failed validation"
            );
            last_errors = validation.errors;
        }

        Err(SmithError::PlanValidation {
            errors: last_errors,
        })
    }

    fn build_messages(&self, request: &ScrapeRequest) -> Vec<ChatMessage> {
        vec![
            ChatMessage::system(self.system_prompt()),
            ChatMessage::user(self.user_prompt(request)),
        ]
    }

    fn system_prompt(&self) -> String {
        format!(
            r#"You are an expert web scraping engineer. You produce declarative scraper plans as JSON.

A scraper plan describes how to extract records from HTML pages. The runtime fetches each target URL (timeout {timeout}s, User-Agent "{user_agent}"), applies your CSS selectors, and returns the records.

PLAN FORMAT (return exactly this JSON shape, nothing else):
{{
  "entry": "scrape_data",
  "params": ["urls"],
  "capabilities": ["http", "html"],
  "urls": ["https://..."],
  "record_selector": "<CSS selector matching one element per record>",
  "fields": [
    {{"name": "field_name", "selector": "<CSS selector relative to the record>", "capture": "text"}},
    {{"name": "link", "selector": "a", "capture": "attr", "attr": "href"}},
    {{"name": "price", "selector": ".price", "pattern": "([0-9,.]+)", "parse": "number"}}
  ],
  "pagination": {{"next_selector": "a.next", "max_pages": 3}},
  "dedupe_on": ["field_name"]
}}

RULES:
1. "entry" MUST be "scrape_data" and "params" MUST be ["urls"].
2. "capabilities" may only contain: {capabilities}.
3. "capture" is one of "text", "html", "attr" (with "attr" naming the attribute).
4. "parse" is one of "string", "number", "integer"; "pattern" is an optional regex whose first group refines the value.
5. "pagination" and "dedupe_on" are optional; omit them when not needed.
6. NEVER reference forbidden operations: eval, exec, compile, __import__, os, sys, subprocess, shutil, socket, pickle, marshal, open, input, breakpoint, shell, spawn.
7. If the user provided no URLs, propose 2-3 reliable public sources in "urls", most reliable first.
8. Selectors that match nothing yield null values, not errors; choose selectors that degrade gracefully.
9. Return ONLY the JSON plan. No markdown, no code fences, no explanations."#,
            timeout = self.scraping.request_timeout.as_secs(),
            user_agent = self.scraping.user_agent,
            capabilities = ALLOWED_CAPABILITIES.join(", "),
        )
    }

    fn user_prompt(&self, request: &ScrapeRequest) -> String {
        let mut parts = vec![format!("DATA TO SCRAPE: {}", request.description)];

        if request.target_urls.is_empty() {
            parts.push(
                "TARGET URLS: none provided. Based on the data description, identify 2-3 \
                 reliable websites where this data is published and list them in \"urls\"."
                    .to_string(),
            );
        } else {
            parts.push(format!(
                "TARGET URLS (provided by the user, use these):\n{}",
                request
                    .target_urls
                    .iter()
                    .map(|u| format!("  - {u}"))
                    .collect::<Vec<_>>()
                    .join("\n")
            ));
        }

        if !request.desired_fields.is_empty() {
            parts.push(format!(
                "REQUIRED FIELDS (one rule per field):\n{}",
                request
                    .desired_fields
                    .iter()
                    .map(|f| format!("  - {f}"))
                    .collect::<Vec<_>>()
                    .join("\n")
            ));
        }

        if let Some(template) = &request.response_template {
            parts.push(format!(
                "DESIRED OUTPUT STRUCTURE (the records will later be shaped into this):\n{template}"
            ));
        }

        if !request.update_frequency.is_empty() {
            parts.push(format!("UPDATE FREQUENCY: {}", request.update_frequency));
        }

        parts.join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::plan::ENTRY_NAME;
    use serde_json::json;

    fn generator(chat: Arc<dyn ChatApi>) -> PlanGenerator {
        let llm = LlmConfig {
            api_key: "sk-test".into(),
            base_url: "https://api.deepseek.com".into(),
            model: "deepseek-chat".into(),
            temperature: 0.3,
            max_tokens_shaping: 8000,
            max_tokens_generation: 4000,
            request_timeout: std::time::Duration::from_secs(60),
        };
        PlanGenerator::new(chat, &llm, &ScrapingConfig::default())
    }

    struct NeverCalled;

    #[async_trait::async_trait]
    impl ChatApi for NeverCalled {
        async fn complete(
            &self,
            _messages: &[crate::core::llm::ChatMessage],
            _params: &CompletionParams,
        ) -> SmithResult<crate::core::llm::Completion> {
            panic!("chat must not be called");
        }
    }

    #[tokio::test]
    async fn empty_description_fails_before_any_llm_call() {
        let gen = generator(Arc::new(NeverCalled));
        let err = gen.generate(&ScrapeRequest::new("  ")).await.unwrap_err();
        assert!(matches!(err, SmithError::Validation(_)));
    }

    #[test]
    fn system_prompt_names_the_contract() {
        let gen = generator(Arc::new(NeverCalled));
        let prompt = gen.system_prompt();
        assert!(prompt.contains(ENTRY_NAME));
        assert!(prompt.contains("http, html, regex, json, datetime, url"));
        assert!(prompt.contains("subprocess"));
        assert!(prompt.contains("timeout 30s"));
        assert!(prompt.contains("Mozilla/5.0"));
    }

    #[test]
    fn user_prompt_lists_urls_and_fields() {
        let gen = generator(Arc::new(NeverCalled));
        let mut request = ScrapeRequest::new("crypto prices");
        request.target_urls = vec!["https://example.invalid/crypto".into()];
        request.desired_fields = vec!["symbol".into(), "price".into()];
        request.response_template = Some(json!({"data": []}));

        let prompt = gen.user_prompt(&request);
        assert!(prompt.contains("crypto prices"));
        assert!(prompt.contains("https://example.invalid/crypto"));
        assert!(prompt.contains("- symbol"));
        assert!(prompt.contains("- price"));
        assert!(prompt.contains("DESIRED OUTPUT STRUCTURE"));
    }

    #[test]
    fn user_prompt_asks_for_sources_when_urls_missing() {
        let gen = generator(Arc::new(NeverCalled));
        let request = ScrapeRequest::new("upcoming IPO listings");
        let prompt = gen.user_prompt(&request);
        assert!(prompt.contains("none provided"));
        assert!(prompt.contains("identify 2-3"));
    }
}

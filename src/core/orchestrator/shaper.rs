use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use super::recover;
use super::textify;
use crate::core::config::LlmConfig;
use crate::core::error::{SmithError, SmithResult};
use crate::core::llm::{ChatApi, ChatMessage, CompletionParams};
use crate::core::models::{ParsedResponse, ParsingMeta, ScrapeRequest};
use crate::core::sandbox::ExecutionResult;

const SHAPING_TEMPERATURE: f32 = 0.3;
/// One re-ask with identical messages after a parse/shape failure.
const MAX_SHAPING_ATTEMPTS: u32 = 2;

/// Why a shaping reply was rejected: no JSON at all, or JSON that deviates
/// from the requested fields/template.
#[derive(Debug)]
enum ShapeFailure {
    NoJson(String),
    Deviates(String),
}

impl ShapeFailure {
    fn message(&self) -> &str {
        match self {
            ShapeFailure::NoJson(m) | ShapeFailure::Deviates(m) => m,
        }
    }

    fn into_error(self) -> SmithError {
        match self {
            ShapeFailure::NoJson(m) => SmithError::Parsing(m),
            ShapeFailure::Deviates(m) => SmithError::ShapeValidation(m),
        }
    }
}

/// Turns raw scraped records into the user's requested JSON schema through
/// one strictly-scoped parsing call to the model.
pub struct DataShaper {
    chat: Arc<dyn ChatApi>,
    model: String,
    max_tokens: u32,
    max_text_length: usize,
}

impl DataShaper {
    pub fn new(chat: Arc<dyn ChatApi>, llm: &LlmConfig) -> Self {
        DataShaper {
            chat,
            model: llm.model.clone(),
            max_tokens: llm.max_tokens_shaping,
            max_text_length: textify::MAX_TEXT_LENGTH,
        }
    }

    pub async fn shape(
        &self,
        execution: &ExecutionResult,
        request: &ScrapeRequest,
    ) -> SmithResult<ParsedResponse> {
        if execution.records.is_empty() {
            return Err(SmithError::EmptyData(
                "no data was found in the scraped results; verify the data source URL and try again"
                    .into(),
            ));
        }

        let text = textify::execution_to_text(execution, self.max_text_length);
        let messages = vec![
            ChatMessage::system(self.system_prompt()),
            ChatMessage::user(self.user_prompt(&text, request)),
        ];
        let params = CompletionParams {
            model: self.model.clone(),
            temperature: SHAPING_TEMPERATURE,
            max_tokens: self.max_tokens,
        };

        let started = Instant::now();
        let mut last_failure = ShapeFailure::NoJson("model produced no output".into());

        for attempt in 1..=MAX_SHAPING_ATTEMPTS {
            let completion = self.chat.complete(&messages, &params).await?;

            match Self::parse_and_validate(&completion.content, request) {
                Ok(data) => {
                    let parsing_ms = started.elapsed().as_millis() as u64;
                    let records_parsed = recover::records_parsed(&data);
                    let fields_extracted = recover::fields_extracted(&data);
                    info!(attempt, records_parsed, parsing_ms, "shaping succeeded");

                    let data = data
                        .as_object()
                        .cloned()
                        .unwrap_or_default();

                    return Ok(ParsedResponse {
                        data,
                        meta: ParsingMeta {
                            model: self.model.clone(),
                            tokens_used: completion.tokens_used,
                            parsing_ms,
                            records_parsed,
                            fields_extracted,
                            data_sources: execution.meta.target_urls.clone(),
                            timestamp: Utc::now(),
                        },
                        source_meta: execution.meta.clone(),
                        raw_output: completion.content,
                    });
                }
                Err(cause) => {
                    warn!(attempt, cause = cause.message(), "shaping output rejected");
                    last_failure = cause;
                }
            }
        }

        Err(last_failure.into_error())
    }

    /// Recover JSON from the reply, then run the shape checks. Returns the
    /// validated (and possibly null-backfilled) object.
    fn parse_and_validate(reply: &str, request: &ScrapeRequest) -> Result<Value, ShapeFailure> {
        let mut data = recover::extract_json(reply)
            .ok_or_else(|| ShapeFailure::NoJson("reply contained no parseable JSON".into()))?;

        recover::validate_shape(
            &mut data,
            &request.desired_fields,
            request.response_template.as_ref(),
        )
        .map_err(ShapeFailure::Deviates)?;

        Ok(data)
    }

    fn system_prompt(&self) -> String {
        r#"You are a data parser and extractor. You transform scraped web content into clean, well-formed JSON.

CRITICAL RULES:
1. Return ONLY valid JSON. No markdown, no code fences, no explanations.
2. Act strictly as a parser: extract only what is present in the scraped content. Never invent values.
3. Extract ALL records that match the requirements; do not truncate the data.
4. Preserve types: numbers as numbers, dates as ISO strings, text as strings.
5. Requested fields must appear as keys in every record; use null when the content has no value for one.
6. If a JSON structure template is provided, follow it EXACTLY: same keys at every level, null for missing values, no extra keys.
7. If no template is provided, return {"data": [...records...]}."#
            .to_string()
    }

    fn user_prompt(&self, scraped_text: &str, request: &ScrapeRequest) -> String {
        let mut parts = vec![format!("DATA DESCRIPTION: {}", request.description)];

        if !request.desired_fields.is_empty() {
            parts.push(format!(
                "REQUESTED FIELDS: {}",
                request.desired_fields.join(", ")
            ));
        }

        if let Some(template) = &request.response_template {
            parts.push(format!("JSON STRUCTURE TEMPLATE (strict):\n{template}"));
        }

        parts.push(format!("SCRAPED CONTENT:\n{scraped_text}"));
        parts.join("\n\n")
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::error::{SmithError, SmithResult};
use crate::core::sandbox::ExecutionMeta;

/// A record as extracted or shaped: a JSON object.
pub type JsonMap = serde_json::Map<String, Value>;

/// What the user asked for, as handed over by the front-end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeRequest {
    pub description: String,
    #[serde(default)]
    pub desired_fields: Vec<String>,
    #[serde(default)]
    pub response_template: Option<Value>,
    #[serde(default)]
    pub target_urls: Vec<String>,
    #[serde(default)]
    pub update_frequency: String,
}

impl ScrapeRequest {
    pub fn new(description: impl Into<String>) -> Self {
        ScrapeRequest {
            description: description.into(),
            desired_fields: Vec::new(),
            response_template: None,
            target_urls: Vec::new(),
            update_frequency: String::new(),
        }
    }

    /// Split a comma- or newline-separated field list into clean names.
    pub fn parse_fields(raw: &str) -> Vec<String> {
        raw.split(|c| c == ',' || c == '\n')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Request-side validation: the description must be non-empty and the
    /// template, when present, must be a JSON object.
    pub fn validate(&self) -> SmithResult<()> {
        if self.description.trim().is_empty() {
            return Err(SmithError::Validation("description must not be empty".into()));
        }
        if let Some(template) = &self.response_template {
            if !template.is_object() {
                return Err(SmithError::Validation(
                    "response template must be a JSON object".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Metadata about one shaping call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsingMeta {
    pub model: String,
    pub tokens_used: Option<u64>,
    pub parsing_ms: u64,
    pub records_parsed: usize,
    pub fields_extracted: Vec<String>,
    pub data_sources: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// The shaped artifact: user-schema JSON plus provenance.
#[derive(Debug, Clone, Serialize)]
pub struct ParsedResponse {
    pub data: JsonMap,
    pub meta: ParsingMeta,
    pub source_meta: ExecutionMeta,
    pub raw_output: String,
}

/// Persisted metadata columns of an endpoint row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointMeta {
    pub description: String,
    pub source_urls: Vec<String>,
    pub records_count: usize,
    pub fields: Vec<String>,
    pub parsing_timestamp: DateTime<Utc>,
}

/// A full endpoint row.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointRecord {
    pub endpoint_id: String,
    pub json_data: Value,
    pub meta: EndpointMeta,
    pub created_at: DateTime<Utc>,
}

/// Listing/summary view of an endpoint, access URL included.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointInfo {
    pub endpoint_id: String,
    pub access_url: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub records_count: usize,
}

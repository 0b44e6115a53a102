use chrono::Utc;
use rand::Rng;
use std::collections::HashSet;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{info, warn};

use crate::core::error::{SmithError, SmithResult};
use crate::core::models::{EndpointInfo, EndpointMeta, EndpointRecord, ParsedResponse};
use crate::core::store::{DataStore, StoreWriteError};

const ID_SUFFIX_LEN: usize = 4;
const ID_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
/// Fresh-suffix retries before giving up on an id collision streak.
const MAX_ID_ATTEMPTS: usize = 10;
/// Backoff schedule for transient write failures.
const MAX_WRITE_ATTEMPTS: u32 = 3;
const WRITE_BACKOFF_MS: u64 = 50;

fn stop_words() -> &'static HashSet<&'static str> {
    static WORDS: OnceLock<HashSet<&'static str>> = OnceLock::new();
    WORDS.get_or_init(|| {
        [
            "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with",
            "by", "from", "as", "is", "was", "are", "were", "be", "this", "that", "these",
            "those", "what", "which", "who", "when", "where", "why", "how", "all", "each",
            "every", "both", "few", "more", "most", "other", "some", "such", "no", "nor", "not",
            "only", "own", "same", "so", "than", "too", "very", "can", "will", "just", "should",
            "now", "get", "list", "data", "api", "endpoint",
        ]
        .into_iter()
        .collect()
    })
}

/// Owns endpoint lifecycle on top of the store: id generation, creation
/// with conflict retry, lookups, listings with access URLs, deletion.
pub struct EndpointRegistry {
    store: DataStore,
    base_url: String,
}

impl EndpointRegistry {
    pub fn new(store: DataStore, base_url: impl Into<String>) -> Self {
        EndpointRegistry {
            store,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn access_url(&self, endpoint_id: &str) -> String {
        format!("{}/api/data/{endpoint_id}", self.base_url)
    }

    /// Human-readable id candidate: 2-3 meaningful description tokens plus
    /// a random 4-char suffix; pure-random fallback when the description
    /// yields nothing usable.
    pub fn candidate_id(description: &str) -> String {
        let keywords: Vec<String> = description
            .split(|c: char| !c.is_ascii_alphabetic())
            .map(str::to_lowercase)
            .filter(|w| w.len() > 2 && !stop_words().contains(w.as_str()))
            .take(3)
            .collect();

        if keywords.is_empty() {
            return random_suffix(ID_SUFFIX_LEN * 2);
        }
        format!("{}-{}", keywords.join("-"), random_suffix(ID_SUFFIX_LEN))
    }

    /// Register a shaped response as a new endpoint. Id collisions get a
    /// fresh suffix; transient store failures get a short backoff.
    pub async fn create(
        &self,
        parsed: &ParsedResponse,
        description: &str,
    ) -> SmithResult<EndpointInfo> {
        if parsed.data.is_empty() {
            return Err(SmithError::StoreCreation(
                "parsed response contains no data".into(),
            ));
        }

        let description = if description.trim().is_empty() {
            parsed.meta.model.clone()
        } else {
            description.trim().to_string()
        };

        let meta = EndpointMeta {
            description: description.clone(),
            source_urls: parsed.meta.data_sources.clone(),
            records_count: parsed.meta.records_parsed,
            fields: parsed.meta.fields_extracted.clone(),
            parsing_timestamp: parsed.meta.timestamp,
        };

        for _ in 0..MAX_ID_ATTEMPTS {
            let record = EndpointRecord {
                endpoint_id: Self::candidate_id(&description),
                json_data: serde_json::Value::Object(parsed.data.clone()),
                meta: meta.clone(),
                created_at: Utc::now(),
            };

            match self.insert_with_backoff(&record).await? {
                true => {
                    info!(endpoint_id = %record.endpoint_id, "endpoint created");
                    return Ok(EndpointInfo {
                        access_url: self.access_url(&record.endpoint_id),
                        endpoint_id: record.endpoint_id,
                        description: description.clone(),
                        created_at: record.created_at,
                        records_count: meta.records_count,
                    });
                }
                false => {
                    warn!("endpoint id collision, regenerating suffix");
                }
            }
        }

        Err(SmithError::StoreCreation(format!(
            "could not allocate a unique endpoint id after {MAX_ID_ATTEMPTS} attempts"
        )))
    }

    /// Ok(true) inserted, Ok(false) id conflict, Err on persistent failure.
    async fn insert_with_backoff(&self, record: &EndpointRecord) -> SmithResult<bool> {
        let mut last_failure = String::new();
        for attempt in 0..MAX_WRITE_ATTEMPTS {
            match self.store.insert(record).await {
                Ok(()) => return Ok(true),
                Err(StoreWriteError::Conflict) => return Ok(false),
                Err(StoreWriteError::Failure(cause)) => {
                    warn!(attempt, %cause, "store write failed");
                    last_failure = cause;
                    tokio::time::sleep(Duration::from_millis(
                        WRITE_BACKOFF_MS * 2u64.pow(attempt),
                    ))
                    .await;
                }
            }
        }
        Err(SmithError::StoreCreation(last_failure))
    }

    pub async fn get(&self, endpoint_id: &str) -> SmithResult<Option<EndpointRecord>> {
        self.store.get(endpoint_id).await
    }

    pub async fn list(&self) -> SmithResult<Vec<EndpointInfo>> {
        let mut endpoints = self.store.list().await?;
        for endpoint in &mut endpoints {
            endpoint.access_url = self.access_url(&endpoint.endpoint_id);
        }
        Ok(endpoints)
    }

    pub async fn delete(&self, endpoint_id: &str) -> SmithResult<bool> {
        let removed = self.store.delete(endpoint_id).await?;
        if removed {
            info!(endpoint_id, "endpoint deleted");
        }
        Ok(removed)
    }
}

fn random_suffix(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| ID_CHARSET[rng.gen_range(0..ID_CHARSET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::ParsingMeta;
    use crate::core::sandbox::ExecutionMeta;
    use regex::Regex;
    use serde_json::json;

    fn parsed(data: serde_json::Value) -> ParsedResponse {
        ParsedResponse {
            data: data.as_object().cloned().unwrap_or_default(),
            meta: ParsingMeta {
                model: "deepseek-chat".to_string(),
                tokens_used: Some(1200),
                parsing_ms: 900,
                records_parsed: 2,
                fields_extracted: vec!["symbol".to_string(), "price".to_string()],
                data_sources: vec!["https://example.invalid/crypto".to_string()],
                timestamp: Utc::now(),
            },
            source_meta: ExecutionMeta::default(),
            raw_output: String::new(),
        }
    }

    async fn registry() -> (EndpointRegistry, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = DataStore::open(dir.path().join("endpoints.db")).await.unwrap();
        (EndpointRegistry::new(store, "http://127.0.0.1:8080/"), dir)
    }

    #[test]
    fn candidate_id_uses_meaningful_keywords() {
        let id = EndpointRegistry::candidate_id("Get a list of crypto market prices");
        let re = Regex::new(r"^crypto-market-prices-[a-z0-9]{4}$").unwrap();
        assert!(re.is_match(&id), "unexpected id: {id}");
    }

    #[test]
    fn candidate_id_matches_slug_grammar() {
        let re = Regex::new(r"^[a-z0-9-]+$").unwrap();
        for description in ["crypto prices", "The THE the", "", "日本語 description"] {
            let id = EndpointRegistry::candidate_id(description);
            assert!(re.is_match(&id), "bad id {id:?} for {description:?}");
        }
    }

    #[test]
    fn stop_word_only_description_falls_back_to_random() {
        let id = EndpointRegistry::candidate_id("get the data");
        let re = Regex::new(r"^[a-z0-9]{8}$").unwrap();
        assert!(re.is_match(&id), "unexpected fallback id: {id}");
    }

    #[tokio::test]
    async fn create_returns_access_url_with_id() {
        let (registry, _dir) = registry().await;
        let info = registry
            .create(&parsed(json!({"data": [{"symbol": "BTC"}]})), "crypto prices")
            .await
            .unwrap();
        assert_eq!(
            info.access_url,
            format!("http://127.0.0.1:8080/api/data/{}", info.endpoint_id)
        );
        assert_eq!(info.records_count, 2);
    }

    #[tokio::test]
    async fn create_rejects_empty_data() {
        let (registry, _dir) = registry().await;
        let err = registry
            .create(&parsed(json!({})), "crypto prices")
            .await
            .unwrap_err();
        assert!(matches!(err, SmithError::StoreCreation(_)));
    }

    #[tokio::test]
    async fn created_ids_are_unique_across_many_creates() {
        let (registry, _dir) = registry().await;
        let mut seen = std::collections::HashSet::new();
        for _ in 0..25 {
            let info = registry
                .create(&parsed(json!({"data": [1]})), "crypto prices")
                .await
                .unwrap();
            assert!(seen.insert(info.endpoint_id.clone()), "duplicate id");
        }
    }

    #[tokio::test]
    async fn list_reflects_creates_and_deletes() {
        let (registry, _dir) = registry().await;
        let a = registry
            .create(&parsed(json!({"data": [1]})), "alpha feed")
            .await
            .unwrap();
        let b = registry
            .create(&parsed(json!({"data": [2]})), "beta feed")
            .await
            .unwrap();

        assert_eq!(registry.list().await.unwrap().len(), 2);
        assert!(registry.delete(&a.endpoint_id).await.unwrap());

        let remaining = registry.list().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].endpoint_id, b.endpoint_id);
        // Every listed id resolves through get.
        for info in &remaining {
            assert!(registry.get(&info.endpoint_id).await.unwrap().is_some());
        }
    }

    #[tokio::test]
    async fn delete_then_get_returns_none() {
        let (registry, _dir) = registry().await;
        let info = registry
            .create(&parsed(json!({"data": [1]})), "gamma feed")
            .await
            .unwrap();
        assert!(registry.delete(&info.endpoint_id).await.unwrap());
        assert!(registry.get(&info.endpoint_id).await.unwrap().is_none());
        assert!(!registry.delete(&info.endpoint_id).await.unwrap());
    }
}

pub mod extract;
pub mod fetcher;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::core::config::ScrapingConfig;
use crate::core::error::SmithResult;
use crate::core::models::JsonMap;
use crate::core::plan::validator::PlanValidator;
use crate::core::plan::{GeneratedPlan, ScraperPlan};
use self::fetcher::PageFetcher;

pub const METHOD_CSS: &str = "css-selectors";

/// Outcome of scraping one URL within an execution.
#[derive(Debug, Clone, Serialize)]
pub struct SourceOutcome {
    pub url: String,
    pub ok: bool,
    pub record_count: usize,
    pub filtered_count: usize,
    pub duplicate_count: usize,
    pub error: Option<String>,
    pub elapsed_ms: u64,
    pub method: String,
    pub confidence: String,
}

impl SourceOutcome {
    fn timed_out(url: &str) -> Self {
        SourceOutcome {
            url: url.to_string(),
            ok: false,
            record_count: 0,
            filtered_count: 0,
            duplicate_count: 0,
            error: Some("timeout".to_string()),
            elapsed_ms: 0,
            method: METHOD_CSS.to_string(),
            confidence: "low".to_string(),
        }
    }

    fn not_executed(url: &str) -> Self {
        SourceOutcome {
            url: url.to_string(),
            ok: false,
            record_count: 0,
            filtered_count: 0,
            duplicate_count: 0,
            error: Some("not executed".to_string()),
            elapsed_ms: 0,
            method: METHOD_CSS.to_string(),
            confidence: "low".to_string(),
        }
    }
}

/// Aggregate metadata across all sources of one execution.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionMeta {
    pub total_count: usize,
    pub filtered_count: usize,
    pub duplicate_count: usize,
    pub target_urls: Vec<String>,
    pub model: Option<String>,
    pub generation_ms: Option<u64>,
    pub method: String,
    pub confidence: String,
    pub update_frequency: Option<String>,
}

impl Default for ExecutionMeta {
    fn default() -> Self {
        ExecutionMeta {
            total_count: 0,
            filtered_count: 0,
            duplicate_count: 0,
            target_urls: Vec::new(),
            model: None,
            generation_ms: None,
            method: METHOD_CSS.to_string(),
            confidence: "low".to_string(),
            update_frequency: None,
        }
    }
}

/// Complete result of one sandboxed execution. The executor never fails
/// across this boundary: every failure mode lands in `ok`, `errors` and
/// the per-source breakdown.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub ok: bool,
    pub records: Vec<JsonMap>,
    pub meta: ExecutionMeta,
    pub errors: Vec<String>,
    pub per_source: Vec<SourceOutcome>,
    pub elapsed_ms: u64,
    pub scraped_at: DateTime<Utc>,
}

/// Runs validated scraper plans: restricted fetch surface, wall-clock
/// timeout, per-source isolation.
pub struct SandboxExecutor {
    fetcher: PageFetcher,
}

impl SandboxExecutor {
    pub fn new(config: &ScrapingConfig) -> SmithResult<Self> {
        Ok(SandboxExecutor {
            fetcher: PageFetcher::new(config)?,
        })
    }

    /// Run a generated plan and merge its generation provenance into the
    /// execution metadata.
    pub async fn execute_plan(&self, plan: &GeneratedPlan, timeout: Duration) -> ExecutionResult {
        let mut result = self
            .execute_text(&plan.source, &plan.target_urls, timeout)
            .await;
        result.meta.model = Some(plan.model.clone());
        result.meta.generation_ms = Some(plan.generation_ms);
        result
    }

    /// Validate and run raw plan text against `urls`. Always returns; the
    /// per-source list has one entry per URL, in input order.
    pub async fn execute_text(
        &self,
        source: &str,
        urls: &[String],
        timeout: Duration,
    ) -> ExecutionResult {
        let started = Instant::now();
        let scraped_at = Utc::now();
        let execution_id = short_id();

        let validation = PlanValidator::validate(source);
        if !validation.is_executable() {
            // Surface one error; security findings outrank the rest.
            let error = validation
                .errors
                .iter()
                .find(|e| e.starts_with("security:"))
                .or_else(|| validation.errors.first())
                .cloned()
                .unwrap_or_else(|| "syntax: plan rejected".to_string());
            warn!(%execution_id, error = %error, "plan rejected before execution");
            return Self::failure(urls, vec![error], started, scraped_at);
        }

        let plan = match ScraperPlan::parse(source) {
            Ok(plan) => plan,
            Err(e) => {
                return Self::failure(
                    urls,
                    vec![format!("syntax: plan does not match the expected shape: {e}")],
                    started,
                    scraped_at,
                );
            }
        };

        if urls.is_empty() {
            return Self::failure(
                urls,
                vec!["runtime: no target URLs provided".to_string()],
                started,
                scraped_at,
            );
        }

        if let Err(e) = extract::check_plan(&plan) {
            return Self::failure(urls, vec![format!("runtime: {e}")], started, scraped_at);
        }

        info!(
            %execution_id,
            sources = urls.len(),
            timeout_s = timeout.as_secs(),
            "executing plan"
        );

        let source_count = urls.len();
        let (tx, mut rx) = mpsc::channel::<(usize, SourceOutcome, Vec<JsonMap>)>(source_count);
        let fetcher = self.fetcher.clone();
        let plan = Arc::new(plan);
        let worker_urls = urls.to_vec();

        // One worker per execution. It reports each source as it finishes so
        // a timeout can still surface partial progress.
        let worker = tokio::spawn(async move {
            for (index, url) in worker_urls.iter().enumerate() {
                let (outcome, records) = run_source(&fetcher, &plan, url).await;
                if tx.send((index, outcome, records)).await.is_err() {
                    break;
                }
            }
        });

        let mut slots: Vec<Option<(SourceOutcome, Vec<JsonMap>)>> =
            (0..source_count).map(|_| None).collect();
        let mut received = 0usize;
        let mut timed_out = false;

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        while received < source_count {
            tokio::select! {
                item = rx.recv() => match item {
                    Some((index, outcome, records)) => {
                        slots[index] = Some((outcome, records));
                        received += 1;
                    }
                    None => break,
                },
                _ = &mut deadline => {
                    timed_out = true;
                    worker.abort();
                    break;
                }
            }
        }

        let mut records: Vec<JsonMap> = Vec::new();
        let mut per_source: Vec<SourceOutcome> = Vec::with_capacity(source_count);
        let mut filtered_count = 0usize;
        let mut duplicate_count = 0usize;
        let mut errors: Vec<String> = Vec::new();

        for (index, slot) in slots.into_iter().enumerate() {
            match slot {
                Some((outcome, source_records)) => {
                    if outcome.ok {
                        records.extend(source_records);
                    }
                    filtered_count += outcome.filtered_count;
                    duplicate_count += outcome.duplicate_count;
                    if let Some(error) = &outcome.error {
                        errors.push(format!("source {}: {error}", outcome.url));
                    }
                    per_source.push(outcome);
                }
                None => per_source.push(SourceOutcome::timed_out(&urls[index])),
            }
        }

        if timed_out {
            errors = vec![format!("execution-timeout: {}s", timeout.as_secs())];
        }

        let confidence = per_source
            .iter()
            .map(|s| s.confidence.as_str())
            .max_by_key(|c| match *c {
                "high" => 2,
                "medium" => 1,
                _ => 0,
            })
            .unwrap_or("low")
            .to_string();

        // A timed-out execution reports failure even when partial records
        // survived; callers can still read them from `records`.
        let ok = !timed_out && !records.is_empty();
        let total_count = records.len();

        info!(
            %execution_id,
            ok,
            records = total_count,
            timed_out,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "execution finished"
        );

        ExecutionResult {
            ok,
            records,
            meta: ExecutionMeta {
                total_count,
                filtered_count,
                duplicate_count,
                target_urls: urls.to_vec(),
                confidence,
                ..ExecutionMeta::default()
            },
            errors,
            per_source,
            elapsed_ms: started.elapsed().as_millis() as u64,
            scraped_at,
        }
    }

    fn failure(
        urls: &[String],
        errors: Vec<String>,
        started: Instant,
        scraped_at: DateTime<Utc>,
    ) -> ExecutionResult {
        ExecutionResult {
            ok: false,
            records: Vec::new(),
            meta: ExecutionMeta {
                target_urls: urls.to_vec(),
                ..ExecutionMeta::default()
            },
            errors,
            per_source: urls.iter().map(|u| SourceOutcome::not_executed(u)).collect(),
            elapsed_ms: started.elapsed().as_millis() as u64,
            scraped_at,
        }
    }
}

fn short_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Scrape one URL: fetch, interpret, paginate, dedupe. A failure here never
/// aborts the remaining sources.
async fn run_source(
    fetcher: &PageFetcher,
    plan: &ScraperPlan,
    url: &str,
) -> (SourceOutcome, Vec<JsonMap>) {
    let started = Instant::now();
    let mut records: Vec<JsonMap> = Vec::new();
    let mut filtered_count = 0usize;
    let mut error: Option<String> = None;
    let mut current_url = url.to_string();
    let max_pages = plan
        .pagination
        .as_ref()
        .map(|p| p.max_pages.max(1))
        .unwrap_or(1);

    for _ in 0..max_pages {
        match fetcher.fetch(&current_url).await {
            Ok(html) => match extract::extract_page(plan, &html, &current_url) {
                Ok(page) => {
                    records.extend(page.records);
                    filtered_count += page.filtered_count;
                    match page.next_url {
                        Some(next) if next != current_url => current_url = next,
                        _ => break,
                    }
                }
                Err(e) => {
                    error = Some(format!("extraction failed: {e}"));
                    break;
                }
            },
            Err(e) => {
                error = Some(e);
                break;
            }
        }
    }

    let duplicate_count = extract::dedupe(&mut records, &plan.dedupe_on);

    // A source that produced records counts as ok even if pagination died
    // part-way; the error stays recorded.
    let ok = error.is_none() || !records.is_empty();
    let confidence = if error.is_some() && records.is_empty() {
        "low"
    } else if records.is_empty() {
        "medium"
    } else {
        "high"
    };

    (
        SourceOutcome {
            url: url.to_string(),
            ok,
            record_count: records.len(),
            filtered_count,
            duplicate_count,
            error,
            elapsed_ms: started.elapsed().as_millis() as u64,
            method: METHOD_CSS.to_string(),
            confidence: confidence.to_string(),
        },
        records,
    )
}

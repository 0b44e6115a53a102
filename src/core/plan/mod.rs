pub mod validator;

use serde::{Deserialize, Serialize};

/// Name the plan's entry must carry, and its sole parameter.
pub const ENTRY_NAME: &str = "scrape_data";
pub const ENTRY_PARAM: &str = "urls";

/// Capabilities a plan may declare. Anything else rejects the plan.
pub const ALLOWED_CAPABILITIES: &[&str] = &["http", "html", "regex", "json", "datetime", "url"];

/// What a field rule captures from its matched element.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capture {
    #[default]
    Text,
    Html,
    Attr,
}

/// Target type for an extracted value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    #[default]
    String,
    Number,
    Integer,
}

/// One field extracted from every record element.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldRule {
    pub name: String,
    /// CSS selector relative to the record element; absent means the record
    /// element itself.
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub capture: Capture,
    /// Attribute name when `capture` is `attr`.
    #[serde(default)]
    pub attr: Option<String>,
    /// Optional regex; capture group 1 (or the whole match) refines the raw value.
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub parse: ValueKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pagination {
    /// Selector of the next-page link; its href is resolved against the
    /// current page URL.
    pub next_selector: String,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
}

fn default_max_pages() -> u32 {
    3
}

fn default_params() -> Vec<String> {
    vec![ENTRY_PARAM.to_string()]
}

/// The declarative scraper program a model emits: which pages to fetch,
/// which elements are records, and how each field is pulled out of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperPlan {
    /// Must be `scrape_data`.
    pub entry: String,
    /// Parameters the entry accepts; must be the single `urls` list.
    #[serde(default = "default_params")]
    pub params: Vec<String>,
    /// Capabilities the plan uses, checked against the allow-list.
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Source URLs proposed by the model when the user supplied none.
    #[serde(default)]
    pub urls: Vec<String>,
    /// CSS selector matching one element per record.
    pub record_selector: String,
    pub fields: Vec<FieldRule>,
    #[serde(default)]
    pub pagination: Option<Pagination>,
    /// Field names whose combined values identify a duplicate record.
    #[serde(default)]
    pub dedupe_on: Vec<String>,
}

impl ScraperPlan {
    pub fn parse(source: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(source)
    }
}

/// Outcome of static validation. A plan is executable iff all four flags hold.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanValidation {
    pub syntax_ok: bool,
    pub imports_ok: bool,
    pub no_forbidden_ops: bool,
    pub signature_ok: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl PlanValidation {
    pub fn is_executable(&self) -> bool {
        self.syntax_ok && self.imports_ok && self.no_forbidden_ops && self.signature_ok
    }
}

/// A model-emitted plan together with its validation outcome and
/// generation provenance.
#[derive(Debug, Clone, Serialize)]
pub struct GeneratedPlan {
    pub source: String,
    pub validation: PlanValidation,
    pub target_urls: Vec<String>,
    pub required_fields: Vec<String>,
    pub model: String,
    pub tokens_used: Option<u64>,
    pub generation_ms: u64,
}

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use std::collections::HashSet;

use crate::core::models::JsonMap;
use crate::core::plan::{Capture, FieldRule, ScraperPlan, ValueKind};

/// Result of interpreting a plan against one fetched page.
pub struct PageExtraction {
    pub records: Vec<JsonMap>,
    /// Matched record elements whose every field came back null.
    pub filtered_count: usize,
    /// Absolute URL of the next page, when pagination matched.
    pub next_url: Option<String>,
}

/// Cheap pre-flight check that every selector and pattern in the plan
/// compiles, so a bad plan fails the whole execution once instead of
/// failing every source identically.
pub fn check_plan(plan: &ScraperPlan) -> Result<(), String> {
    parse_selector(&plan.record_selector)?;
    for field in &plan.fields {
        if let Some(selector) = &field.selector {
            parse_selector(selector)?;
        }
        if let Some(pattern) = &field.pattern {
            Regex::new(pattern).map_err(|e| format!("invalid pattern '{pattern}': {e}"))?;
        }
        if field.capture == Capture::Attr && field.attr.is_none() {
            return Err(format!("field '{}' captures attr but names none", field.name));
        }
    }
    if let Some(pagination) = &plan.pagination {
        parse_selector(&pagination.next_selector)?;
    }
    Ok(())
}

fn parse_selector(raw: &str) -> Result<Selector, String> {
    Selector::parse(raw).map_err(|e| format!("invalid selector '{raw}': {e}"))
}

/// Interpret the plan against one page of HTML. Selector compilation
/// happens here so no parser state crosses an await point.
pub fn extract_page(plan: &ScraperPlan, html: &str, page_url: &str) -> Result<PageExtraction, String> {
    let document = Html::parse_document(html);
    let record_selector = parse_selector(&plan.record_selector)?;

    let mut records = Vec::new();
    let mut filtered_count = 0usize;

    for element in document.select(&record_selector) {
        let record = extract_record(&plan.fields, element)?;
        if record.values().all(Value::is_null) {
            filtered_count += 1;
            continue;
        }
        records.push(record);
    }

    let next_url = match &plan.pagination {
        Some(pagination) => {
            let next_selector = parse_selector(&pagination.next_selector)?;
            document
                .select(&next_selector)
                .next()
                .and_then(|el| el.value().attr("href"))
                .and_then(|href| resolve_href(page_url, href))
        }
        None => None,
    };

    Ok(PageExtraction {
        records,
        filtered_count,
        next_url,
    })
}

fn extract_record(fields: &[FieldRule], element: ElementRef<'_>) -> Result<JsonMap, String> {
    let mut record = JsonMap::new();
    for rule in fields {
        let value = extract_field(rule, element)?;
        record.insert(rule.name.clone(), value);
    }
    Ok(record)
}

fn extract_field(rule: &FieldRule, element: ElementRef<'_>) -> Result<Value, String> {
    let target = match &rule.selector {
        Some(selector) => {
            let compiled = parse_selector(selector)?;
            match element.select(&compiled).next() {
                Some(el) => el,
                None => return Ok(Value::Null),
            }
        }
        None => element,
    };

    let raw = match rule.capture {
        Capture::Text => collapse_whitespace(&target.text().collect::<Vec<_>>().join(" ")),
        Capture::Html => target.html(),
        Capture::Attr => {
            let attr = rule.attr.as_deref().unwrap_or_default();
            match target.value().attr(attr) {
                Some(v) => v.to_string(),
                None => return Ok(Value::Null),
            }
        }
    };

    let refined = match &rule.pattern {
        Some(pattern) => {
            let re = Regex::new(pattern).map_err(|e| format!("invalid pattern '{pattern}': {e}"))?;
            match re.captures(&raw) {
                Some(caps) => caps
                    .get(1)
                    .or_else(|| caps.get(0))
                    .map(|m| m.as_str().to_string()),
                None => None,
            }
        }
        None => Some(raw),
    };

    let refined = match refined {
        Some(v) if !v.trim().is_empty() => v,
        _ => return Ok(Value::Null),
    };

    Ok(coerce(&refined, rule.parse))
}

fn coerce(raw: &str, kind: ValueKind) -> Value {
    match kind {
        ValueKind::String => Value::String(raw.to_string()),
        ValueKind::Number => {
            let cleaned = raw.replace(',', "");
            match cleaned.trim().parse::<f64>() {
                Ok(n) => serde_json::Number::from_f64(n)
                    .map(Value::Number)
                    .unwrap_or(Value::Null),
                Err(_) => Value::Null,
            }
        }
        ValueKind::Integer => {
            let cleaned = raw.replace(',', "");
            match cleaned.trim().parse::<i64>() {
                Ok(n) => Value::Number(n.into()),
                Err(_) => Value::Null,
            }
        }
    }
}

fn collapse_whitespace(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn resolve_href(base: &str, href: &str) -> Option<String> {
    match reqwest::Url::parse(base) {
        Ok(base_url) => base_url.join(href).ok().map(|u| u.to_string()),
        Err(_) => reqwest::Url::parse(href).ok().map(|u| u.to_string()),
    }
}

/// Drop records whose dedupe-key values were already seen, preserving first
/// occurrence order. Returns the number removed.
pub fn dedupe(records: &mut Vec<JsonMap>, keys: &[String]) -> usize {
    if keys.is_empty() || records.is_empty() {
        return 0;
    }
    let mut seen: HashSet<String> = HashSet::new();
    let before = records.len();
    records.retain(|record| {
        let fingerprint = keys
            .iter()
            .map(|k| record.get(k).map(Value::to_string).unwrap_or_default())
            .collect::<Vec<_>>()
            .join("\u{1f}");
        seen.insert(fingerprint)
    });
    before - records.len()
}

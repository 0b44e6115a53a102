use regex::Regex;
use std::sync::OnceLock;

use super::{PlanValidation, ScraperPlan, ALLOWED_CAPABILITIES, ENTRY_NAME, ENTRY_PARAM};

/// Identifiers whose presence anywhere in the plan text rejects it.
/// Detection is deliberately conservative: a word-boundary match is enough,
/// even inside a selector or URL.
const FORBIDDEN_TOKENS: &[&str] = &[
    "eval",
    "exec",
    "compile",
    "__import__",
    "os.system",
    "subprocess",
    "shutil",
    "open",
    "input",
    "breakpoint",
    "os",
    "sys",
    "socket",
    "pickle",
    "marshal",
    "shell",
    "spawn",
];

/// Subset of the forbidden tokens that name modules; they get a
/// "forbidden module" message, everything else a "forbidden operation".
const FORBIDDEN_MODULES: &[&str] = &[
    "os", "sys", "subprocess", "shutil", "socket", "pickle", "marshal",
];

fn forbidden_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let alternatives = FORBIDDEN_TOKENS
            .iter()
            .map(|t| regex::escape(t))
            .collect::<Vec<_>>()
            .join("|");
        Regex::new(&format!(r"(?i)\b({alternatives})\b")).expect("forbidden token regex")
    })
}

/// Static safety validation of a plan's raw text. Pure and therefore
/// idempotent: the same source always yields the same flags and errors.
pub struct PlanValidator;

impl PlanValidator {
    pub fn validate(source: &str) -> PlanValidation {
        let mut result = PlanValidation::default();

        // 1. Syntax. A plan that is not JSON gets line/column and nothing else.
        let value: serde_json::Value = match serde_json::from_str(source) {
            Ok(v) => v,
            Err(e) => {
                result.errors.push(format!(
                    "syntax: invalid JSON at line {}, column {}: {e}",
                    e.line(),
                    e.column()
                ));
                return result;
            }
        };
        result.syntax_ok = true;

        // 2. Capability allow-list.
        result.imports_ok = true;
        if let Some(capabilities) = value.get("capabilities").and_then(|c| c.as_array()) {
            for capability in capabilities {
                let name = capability.as_str().unwrap_or_default();
                if !ALLOWED_CAPABILITIES.contains(&name) {
                    result.imports_ok = false;
                    result
                        .errors
                        .push(format!("security: capability '{name}' is not in the allow-list"));
                }
            }
        }
        if !value
            .get("capabilities")
            .and_then(|c| c.as_array())
            .map(|c| !c.is_empty())
            .unwrap_or(false)
        {
            result
                .warnings
                .push("plan declares no capabilities; assuming http+html".to_string());
        }

        // 3. Forbidden names, scanned over the raw text.
        let mut found: Vec<String> = Vec::new();
        for m in forbidden_regex().find_iter(source) {
            let token = m.as_str().to_lowercase();
            if !found.contains(&token) {
                found.push(token);
            }
        }
        result.no_forbidden_ops = found.is_empty();
        if !found.is_empty() {
            let listed = found
                .iter()
                .map(|t| {
                    if FORBIDDEN_MODULES.contains(&t.as_str()) {
                        format!("forbidden module: {t}")
                    } else {
                        format!("forbidden operation: {t}")
                    }
                })
                .collect::<Vec<_>>()
                .join("; ");
            result.errors.push(format!("security: {listed}"));
        }

        // 4. Entry-point signature.
        match ScraperPlan::parse(source) {
            Ok(plan) => {
                if plan.entry != ENTRY_NAME {
                    result.errors.push(format!(
                        "syntax: entry must be '{ENTRY_NAME}', found '{}'",
                        plan.entry
                    ));
                } else if plan.params.len() != 1 {
                    result.errors.push(format!(
                        "syntax: entry must take a single '{ENTRY_PARAM}' parameter, found {}",
                        plan.params.len()
                    ));
                } else {
                    result.signature_ok = true;
                    // The single-URL form from older plans is tolerated; the
                    // executor always passes the full list.
                    if plan.params[0] != ENTRY_PARAM {
                        result.warnings.push(format!(
                            "entry parameter '{}' treated as the '{ENTRY_PARAM}' list",
                            plan.params[0]
                        ));
                    }
                }
                if plan.record_selector.trim().is_empty() {
                    result.signature_ok = false;
                    result
                        .errors
                        .push("syntax: record_selector must not be empty".to_string());
                }
                if plan.fields.is_empty() {
                    result.signature_ok = false;
                    result
                        .errors
                        .push("syntax: plan must declare at least one field".to_string());
                }
            }
            Err(e) => {
                result
                    .errors
                    .push(format!("syntax: plan does not match the expected shape: {e}"));
            }
        }

        result
    }
}

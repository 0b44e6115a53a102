use axum::http::StatusCode;
use thiserror::Error;

/// Error taxonomy for the whole pipeline. Every variant carries a
/// human-readable message; retry recovery happens close to the failure
/// (chat client, generator, shaper, registry) and anything that reaches
/// the caller is terminal for that request.
#[derive(Debug, Error)]
pub enum SmithError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("rate limited: {message}")]
    RateLimit {
        message: String,
        retry_after: Option<u64>,
    },

    #[error("transient network error: {0}")]
    Transient(String),

    #[error("provider rejected the request: {0}")]
    Provider(String),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("plan validation failed: {}", .errors.join("; "))]
    PlanValidation { errors: Vec<String> },

    #[error("execution timed out after {seconds}s")]
    ExecutionTimeout { seconds: u64 },

    #[error("execution failed: {0}")]
    ExecutionRuntime(String),

    #[error("no data scraped: {0}")]
    EmptyData(String),

    #[error("could not parse model output: {0}")]
    Parsing(String),

    #[error("shaped data failed validation: {0}")]
    ShapeValidation(String),

    #[error("endpoint creation failed: {0}")]
    StoreCreation(String),

    #[error("endpoint not found: {0}")]
    EndpointMissing(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type SmithResult<T> = Result<T, SmithError>;

impl SmithError {
    /// Whether the chat client may retry the request that produced this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SmithError::RateLimit { .. } | SmithError::Transient(_)
        )
    }

    /// HTTP status for the serving boundary. Pure mapping: the server
    /// translates store outcomes and never leaks internal detail.
    pub fn status(&self) -> StatusCode {
        match self {
            SmithError::EndpointMissing(_) => StatusCode::NOT_FOUND,
            SmithError::Validation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short label shown by the front-end next to the message.
    pub fn label(&self) -> &'static str {
        match self {
            SmithError::Configuration(_) => "configuration",
            SmithError::Authentication(_) => "authentication",
            SmithError::RateLimit { .. } => "rate-limit",
            SmithError::Transient(_) => "network",
            SmithError::Provider(_) => "provider",
            SmithError::Validation(_) => "request",
            SmithError::PlanValidation { .. } => "plan-validation",
            SmithError::ExecutionTimeout { .. } => "execution-timeout",
            SmithError::ExecutionRuntime(_) => "execution",
            SmithError::EmptyData(_) => "empty-data",
            SmithError::Parsing(_) => "parsing",
            SmithError::ShapeValidation(_) => "shape-validation",
            SmithError::StoreCreation(_) => "store",
            SmithError::EndpointMissing(_) => "not-found",
            SmithError::Internal(_) => "internal",
        }
    }

    /// One-line remediation hint for the front-end.
    pub fn remediation(&self) -> &'static str {
        match self {
            SmithError::Configuration(_) => "set the missing environment variable and restart",
            SmithError::Authentication(_) => "verify your DEEPSEEK_API_KEY is correct",
            SmithError::RateLimit { .. } => "wait a moment and retry",
            SmithError::Transient(_) => "check your network connection and retry",
            SmithError::Provider(_) => "retry; if it persists, reduce the request size",
            SmithError::Validation(_) => "fix the highlighted input and resubmit",
            SmithError::PlanValidation { .. } => "simplify the requirements and retry",
            SmithError::ExecutionTimeout { .. } => "raise the timeout or target fewer pages",
            SmithError::ExecutionRuntime(_) => "verify the target URLs are reachable",
            SmithError::EmptyData(_) => "verify the data source URL and try again",
            SmithError::Parsing(_) => "simplify the requested fields and retry",
            SmithError::ShapeValidation(_) => "simplify the response template and retry",
            SmithError::StoreCreation(_) => "retry; if it persists, check the database file",
            SmithError::EndpointMissing(_) => "list endpoints to find a valid id",
            SmithError::Internal(_) => "check the logs for details",
        }
    }
}

impl From<rusqlite::Error> for SmithError {
    fn from(err: rusqlite::Error) -> Self {
        SmithError::Internal(format!("database error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_endpoint_maps_to_404() {
        let err = SmithError::EndpointMissing("crypto-prices-a3f2".into());
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn bad_request_maps_to_400() {
        let err = SmithError::Validation("description is empty".into());
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn everything_else_maps_to_500() {
        let errs = [
            SmithError::Internal("boom".into()),
            SmithError::StoreCreation("conflict".into()),
            SmithError::Parsing("bad json".into()),
        ];
        for err in errs {
            assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        }
    }

    #[test]
    fn only_rate_limit_and_transient_are_retryable() {
        assert!(SmithError::Transient("timeout".into()).is_retryable());
        assert!(
            SmithError::RateLimit {
                message: "slow down".into(),
                retry_after: Some(5),
            }
            .is_retryable()
        );
        assert!(!SmithError::Authentication("bad key".into()).is_retryable());
        assert!(!SmithError::Provider("bad request".into()).is_retryable());
    }

    #[test]
    fn plan_validation_joins_errors_in_message() {
        let err = SmithError::PlanValidation {
            errors: vec!["security: forbidden module: os".into(), "syntax: bad".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("forbidden module: os"));
        assert!(msg.contains("syntax: bad"));
    }
}

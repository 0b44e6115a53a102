use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use super::AppState;
use crate::core::error::SmithError;

/// Translate a pipeline error into a response without leaking detail:
/// the status comes from the taxonomy table, the body stays generic for
/// anything that maps to 500.
fn error_response(err: SmithError) -> Response {
    let status = err.status();
    let body = match status {
        StatusCode::INTERNAL_SERVER_ERROR => {
            error!(error = %err, "request failed");
            json!({"error": "Internal server error"})
        }
        _ => json!({"error": err.to_string()}),
    };
    (status, Json(body)).into_response()
}

fn not_found(endpoint_id: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"error": "Endpoint not found", "endpoint_id": endpoint_id})),
    )
        .into_response()
}

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "healthy", "service": "api-endpoint-server"}))
}

#[derive(Deserialize)]
pub struct DataQuery {
    #[serde(default)]
    metadata: bool,
}

pub async fn get_endpoint_data(
    Path(endpoint_id): Path<String>,
    Query(query): Query<DataQuery>,
    State(state): State<AppState>,
) -> Response {
    let record = match state.registry.get(&endpoint_id).await {
        Ok(Some(record)) => record,
        Ok(None) => return not_found(&endpoint_id),
        Err(err) => return error_response(err),
    };

    if query.metadata {
        let body = json!({
            "data": record.json_data,
            "metadata": {
                "description": record.meta.description,
                "source_urls": record.meta.source_urls,
                "records_count": record.meta.records_count,
                "fields": record.meta.fields,
                "parsing_timestamp": record.meta.parsing_timestamp.to_rfc3339(),
            },
            "endpoint_id": endpoint_id,
            "created_at": record.created_at.to_rfc3339(),
        });
        return Json(body).into_response();
    }

    Json(record.json_data).into_response()
}

pub async fn list_endpoints(State(state): State<AppState>) -> Response {
    match state.registry.list().await {
        Ok(endpoints) => Json(json!({"endpoints": endpoints})).into_response(),
        Err(err) => error_response(err),
    }
}

pub async fn delete_endpoint(
    Path(endpoint_id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    match state.registry.delete(&endpoint_id).await {
        Ok(true) => Json(json!({
            "message": "Endpoint deleted successfully",
            "endpoint_id": endpoint_id,
        }))
        .into_response(),
        Ok(false) => not_found(&endpoint_id),
        Err(err) => error_response(err),
    }
}

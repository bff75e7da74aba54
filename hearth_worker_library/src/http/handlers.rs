use crate::http::http_server::HttpServer;
use crate::services::containers::structs::PoolUnavailableError;
use crate::services::invocation::UnsupportedLanguageError;
use crate::services::registration::{FunctionNotFoundError, FunctionRequest};
use axum::{
    extract::{Extension, Json, Path, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use hearth_library::transaction::gen_tid;
use hearth_library::types::Technology;
use serde_json::json;
use std::collections::HashMap;
use tracing::debug;

/// Error types for the HTTP handlers.
/// Bad request errors are returned when the request is invalid; unavailable
/// maps capacity conditions callers may retry against the other technology.
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    NotFound(String),
    Unavailable(String),
    InternalError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            AppError::InternalError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        let body = axum::Json(json!({ "error": message }));
        (status, body).into_response()
    }
}

/// Translate the dispatcher's failure taxonomy into transport status codes.
fn map_execute_error(e: anyhow::Error) -> AppError {
    if e.downcast_ref::<UnsupportedLanguageError>().is_some() {
        AppError::BadRequest(format!("{}", e))
    } else if e.downcast_ref::<FunctionNotFoundError>().is_some() {
        AppError::NotFound(format!("{}", e))
    } else if e.downcast_ref::<PoolUnavailableError>().is_some() {
        AppError::Unavailable(format!("{}", e))
    } else {
        // container start, staging, and execution faults
        AppError::InternalError(format!("{}", e))
    }
}

fn map_registry_error(e: anyhow::Error) -> AppError {
    if e.downcast_ref::<FunctionNotFoundError>().is_some() {
        AppError::NotFound(format!("{}", e))
    } else {
        AppError::BadRequest(format!("{}", e))
    }
}

#[derive(Debug, serde::Serialize)]
pub struct ExecuteResponse {
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub container_name: String,
}

/// A non-zero exit is a function-level failure: surface its stderr as the
/// error content, absent entirely on success.
fn execute_error_field(exit_code: i64, stderr: String) -> Option<String> {
    match exit_code {
        0 => None,
        code if stderr.is_empty() => Some(format!("Function exited with status {}", code)),
        _ => Some(stderr),
    }
}

/// Handler for the /ping route.
pub async fn handle_ping() -> &'static str {
    "pong"
}

/// Handler for POST /functions.
pub async fn handle_create_function(
    Extension(server): Extension<HttpServer>,
    Json(params): Json<FunctionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let tid = gen_tid();
    let spec = server
        .worker
        .registration
        .register(params, &tid)
        .map_err(map_registry_error)?;
    Ok(axum::Json(spec))
}

/// Handler for GET /functions.
pub async fn handle_list_functions(Extension(server): Extension<HttpServer>) -> Result<impl IntoResponse, AppError> {
    Ok(axum::Json(server.worker.registration.list_functions()))
}

/// Handler for GET /functions/:function_id.
pub async fn handle_get_function(
    Extension(server): Extension<HttpServer>,
    Path(function_id): Path<u32>,
) -> Result<impl IntoResponse, AppError> {
    match server.worker.registration.get_function(function_id) {
        Some(spec) => Ok(axum::Json(spec)),
        None => Err(AppError::NotFound(format!("Function '{}' was not found", function_id))),
    }
}

/// Handler for PUT /functions/:function_id.
pub async fn handle_update_function(
    Extension(server): Extension<HttpServer>,
    Path(function_id): Path<u32>,
    Json(params): Json<FunctionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let tid = gen_tid();
    let spec = server
        .worker
        .registration
        .update_function(function_id, params, &tid)
        .map_err(map_registry_error)?;
    Ok(axum::Json(spec))
}

/// Handler for DELETE /functions/:function_id.
pub async fn handle_delete_function(
    Extension(server): Extension<HttpServer>,
    Path(function_id): Path<u32>,
) -> Result<impl IntoResponse, AppError> {
    let tid = gen_tid();
    server
        .worker
        .registration
        .remove_function(function_id, &tid)
        .map_err(map_registry_error)?;
    Ok(axum::Json(json!({ "detail": "Function deleted" })))
}

/// Handler for POST /execute/:function_id?tech=<technology>.
/// `tech` defaults to docker; unrecognized values are treated as docker.
pub async fn handle_execute(
    Extension(server): Extension<HttpServer>,
    Path(function_id): Path<u32>,
    Query(query_params): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, AppError> {
    let technology = query_params
        .get("tech")
        .map(|t| Technology::parse_lenient(t))
        .unwrap_or(Technology::Docker);
    let tid = gen_tid();
    debug!(tid=%tid, function_id=function_id, technology=%technology, "Received execute request");
    let result = server
        .worker
        .execute(function_id, technology, &tid)
        .await
        .map_err(map_execute_error)?;
    Ok(axum::Json(ExecuteResponse {
        output: result.stdout,
        error: execute_error_field(result.exit_code, result.stderr),
        container_name: result.container_name,
    }))
}

/// Handler for GET /metrics: prometheus text exposition.
pub async fn handle_metrics(Extension(server): Extension<HttpServer>) -> Result<impl IntoResponse, AppError> {
    match server.worker.telemetry.render() {
        Ok(body) => Ok(body),
        Err(e) => Err(AppError::InternalError(format!("Failed to render metrics: {}", e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::containers::structs::PoolKey;
    use crate::services::invocation::StagingError;
    use hearth_library::types::Language;

    #[test]
    fn execute_errors_map_to_status_kinds() {
        let key = PoolKey::new(Technology::Gvisor, Language::Python);
        match map_execute_error(PoolUnavailableError::boxed(key)) {
            AppError::Unavailable(_) => (),
            other => panic!("expected Unavailable, got {:?}", other),
        }
        match map_execute_error(UnsupportedLanguageError::boxed("ruby")) {
            AppError::BadRequest(_) => (),
            other => panic!("expected BadRequest, got {:?}", other),
        }
        match map_execute_error(FunctionNotFoundError::boxed(7)) {
            AppError::NotFound(_) => (),
            other => panic!("expected NotFound, got {:?}", other),
        }
        match map_execute_error(StagingError::boxed("copy failed")) {
            AppError::InternalError(_) => (),
            other => panic!("expected InternalError, got {:?}", other),
        }
    }

    #[test]
    fn error_field_reflects_function_outcome() {
        assert_eq!(execute_error_field(0, "ignored warnings".to_string()), None);
        assert_eq!(
            execute_error_field(1, "Exception: boom\n".to_string()),
            Some("Exception: boom\n".to_string())
        );
        assert_eq!(
            execute_error_field(124, String::new()),
            Some("Function exited with status 124".to_string())
        );
    }
}

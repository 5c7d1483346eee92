// serve/error.rs — HTTP error mapping
//
// Every failure leaves the server as a JSON body
// `{"error": {kind, code, message, line, column}, "diagnostics": [...]}`.
// Compile errors map their category to a status: syntax 400, semantic 422,
// resource 413. Renderer failures are 502.

use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::warn;

use crate::diag::{DiagLevel, Diagnostic, ErrorCategory};
use crate::pipeline::CompileError;
use crate::render::RenderError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Compile(CompileError),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    TooLarge(String),
    #[error("{0}")]
    NotFound(String),
    #[error("compilation did not finish within {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("rendering failed: {0}")]
    Render(#[from] RenderError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Compile(err) => match err.category() {
                ErrorCategory::Syntax => StatusCode::BAD_REQUEST,
                ErrorCategory::Semantic => StatusCode::UNPROCESSABLE_ENTITY,
                ErrorCategory::Resource => StatusCode::PAYLOAD_TOO_LARGE,
            },
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::TooLarge(_) | ApiError::Timeout(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Render(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ApiError::Compile(err) => err.primary().map_or("CompileError", |d| d.kind.name()),
            ApiError::BadRequest(_) => "BadRequest",
            ApiError::TooLarge(_) | ApiError::Timeout(_) => "ResourceExceededError",
            ApiError::NotFound(_) => "NotFound",
            ApiError::Render(_) => "RenderError",
            ApiError::Internal(_) => "InternalError",
        }
    }

    pub fn body(&self) -> Value {
        let (error, diagnostics) = match self {
            ApiError::Compile(err) => {
                let error = match err.primary() {
                    Some(d) => diagnostic_json(d),
                    None => json!({ "kind": self.kind(), "code": null, "message": self.to_string(),
                                    "line": null, "column": null }),
                };
                (error, err.diagnostics.iter().map(diagnostic_json).collect())
            }
            other => {
                let code = match other {
                    ApiError::TooLarge(_) | ApiError::Timeout(_) => json!("E0501"),
                    _ => Value::Null,
                };
                (
                    json!({ "kind": other.kind(), "code": code, "message": other.to_string(),
                            "line": null, "column": null }),
                    Vec::new(),
                )
            }
        };
        json!({ "error": error, "diagnostics": diagnostics })
    }
}

pub fn diagnostic_json(d: &Diagnostic) -> Value {
    let level = match d.level {
        DiagLevel::Error => "error",
        DiagLevel::Warning => "warning",
    };
    json!({
        "kind": d.kind.name(),
        "code": d.code.0,
        "level": level,
        "message": d.message,
        "line": d.position.map(|p| p.line),
        "column": d.position.map(|p| p.column),
        "hint": d.hint,
        "related": d.related_spans.iter().map(|r| json!({
            "label": r.label,
            "start": r.span.start,
            "end": r.span.end,
        })).collect::<Vec<_>>(),
    })
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(error = %self, "request failed");
        }
        (status, Json(self.body())).into_response()
    }
}

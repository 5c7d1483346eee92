// serve/handlers.rs — Request handlers
//
// Each compilation runs on the blocking pool under `compile_timeout`;
// every pass after parsing checks the same deadline so an over-long request
// fails with a resource error. Rendering is bounded by `render_timeout`.
// The compilation id travels back to the browser both as a header and as
// the `dflc_compilation` cookie read by `/get-typing`.

use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Json, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use super::error::{diagnostic_json, ApiError};
use super::state::AppState;
use super::{COOKIE_NAME, X_COMPILATION_ID, X_TYPING};
use crate::expand::ExpandOptions;
use crate::pipeline::{compile, Compilation, CompileOptions};
use crate::render::render_within;

/// Slack past the deadline before the request gives up on the worker.
const TIMEOUT_GRACE: Duration = Duration::from_millis(250);

// ── Request bodies ──

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub code: String,
    #[serde(default)]
    pub root: Option<String>,
    #[serde(default)]
    pub generators: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct GenerateQuery {
    #[serde(default)]
    pub typing: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TypingQuery {
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CompileRequest {
    pub code: String,
    #[serde(default)]
    pub depth: usize,
    #[serde(default)]
    pub typing: bool,
    #[serde(default)]
    pub root: Option<String>,
    #[serde(default)]
    pub generators: Option<Vec<String>>,
}

fn parse_json<T: for<'de> Deserialize<'de>>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {e}")))
}

/// `?typing=` as sent by the front end: `true`/`false`, also `1`/`on`.
fn flag(value: Option<&str>) -> bool {
    matches!(
        value.map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("true" | "1" | "on" | "yes")
    )
}

// ── Compilation ──

struct Job {
    code: String,
    depth: usize,
    typing: bool,
    root: Option<String>,
    generators: Option<Vec<String>>,
}

async fn run(state: &AppState, job: Job) -> Result<Compilation, ApiError> {
    let config = &state.config;
    if job.code.len() > config.max_source_bytes {
        return Err(ApiError::TooLarge(format!(
            "source is {} bytes, the limit is {}",
            job.code.len(),
            config.max_source_bytes
        )));
    }
    if job.depth > config.max_depth {
        return Err(ApiError::TooLarge(format!(
            "expansion depth {} exceeds the server limit of {}",
            job.depth, config.max_depth
        )));
    }

    let timeout = config.compile_timeout();
    let options = CompileOptions {
        root: job.root,
        generators: job.generators,
        typing: job.typing,
        expand: ExpandOptions {
            max_depth: job.depth,
            max_nodes: config.max_nodes,
            deadline: Some(Instant::now() + timeout),
        },
    };
    let code = job.code;
    let task = tokio::task::spawn_blocking(move || compile(&code, &options));
    match tokio::time::timeout(timeout + TIMEOUT_GRACE, task).await {
        Err(_) => Err(ApiError::Timeout(timeout)),
        Ok(Err(join)) => Err(ApiError::Internal(join.to_string())),
        Ok(Ok(result)) => result.map_err(ApiError::Compile),
    }
}

fn remember(state: &AppState, compilation: &Compilation) -> Uuid {
    let id = Uuid::new_v4();
    state.store().insert(id, compilation.typing());
    id
}

// ── Handlers ──

/// `POST /generate-image/{depth}?typing=true`: compile and render.
pub async fn generate_image(
    State(state): State<AppState>,
    Path(depth): Path<String>,
    Query(query): Query<GenerateQuery>,
    jar: CookieJar,
    body: Bytes,
) -> Result<Response, ApiError> {
    let depth: usize = depth
        .trim()
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("expansion depth `{depth}` is not a number")))?;
    let typing = flag(query.typing.as_deref());
    let request: GenerateRequest = parse_json(&body)?;

    let compilation = run(
        &state,
        Job {
            code: request.code,
            depth,
            typing,
            root: request.root,
            generators: request.generators,
        },
    )
    .await?;
    let rendered = render_within(
        state.renderer.as_ref(),
        &compilation.dot(),
        state.config.render_timeout(),
    )
    .await?;
    let id = remember(&state, &compilation);
    info!(
        %id,
        depth,
        typing,
        nodes = compilation.graph.nodes().len(),
        truncated = compilation.graph.truncated_count(),
        "rendered diagram"
    );

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(rendered.content_type));
    if let Ok(value) = HeaderValue::from_str(&id.to_string()) {
        headers.insert(X_COMPILATION_ID, value);
    }
    if typing {
        if let Ok(value) = HeaderValue::from_str(&compilation.typing()) {
            headers.insert(X_TYPING, value);
        }
    }
    let cookie = Cookie::build((COOKIE_NAME, id.to_string()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax);
    Ok((jar.add(cookie), headers, rendered.body).into_response())
}

/// `GET /get-typing[?id=]`: typing of the caller's compilation.
pub async fn get_typing(
    State(state): State<AppState>,
    Query(query): Query<TypingQuery>,
    jar: CookieJar,
) -> Result<Json<Value>, ApiError> {
    let raw = query
        .id
        .or_else(|| jar.get(COOKIE_NAME).map(|c| c.value().to_string()));
    // Nothing compiled yet in this session.
    let Some(raw) = raw else {
        return Ok(Json(json!({ "ty": "" })));
    };
    let id = Uuid::parse_str(raw.trim())
        .map_err(|_| ApiError::BadRequest(format!("`{raw}` is not a compilation id")))?;
    let typing = state
        .store()
        .get(&id)
        .ok_or_else(|| ApiError::NotFound(format!("no compilation with id {id}")))?;
    Ok(Json(json!({ "ty": typing })))
}

/// `POST /api/compile`: compile and return everything inline.
pub async fn compile_json(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let request: CompileRequest = parse_json(&body)?;
    let depth = request.depth;
    let compilation = run(
        &state,
        Job {
            code: request.code,
            depth,
            typing: request.typing,
            root: request.root,
            generators: request.generators,
        },
    )
    .await?;
    let id = remember(&state, &compilation);
    info!(%id, depth, nodes = compilation.graph.nodes().len(), "compiled diagram");

    let graph = serde_json::to_value(&compilation.graph)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(json!({
        "compilation_id": id,
        "root": compilation.root,
        "source_hash": compilation.fingerprint.source_hash,
        "ty": compilation.typing(),
        "signature": compilation.signature,
        "graph": graph,
        "dot": compilation.dot(),
        "warnings": compilation.warnings.iter().map(diagnostic_json).collect::<Vec<_>>(),
    })))
}

/// `GET /health`
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typing_flag_values() {
        assert!(flag(Some("true")));
        assert!(flag(Some("True")));
        assert!(flag(Some("1")));
        assert!(!flag(Some("false")));
        assert!(!flag(Some("")));
        assert!(!flag(None));
    }

    #[test]
    fn compile_request_defaults() {
        let req: CompileRequest = parse_json(&Bytes::from_static(br#"{"code": "def main = [X|Y] link X>->Y"}"#)).unwrap();
        assert_eq!(req.depth, 0);
        assert!(!req.typing);
        assert!(req.root.is_none());
    }

    #[test]
    fn malformed_body_is_bad_request() {
        let err = parse_json::<GenerateRequest>(&Bytes::from_static(b"{\"codes\": 1")).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }
}

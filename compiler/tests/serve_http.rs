// HTTP contract tests: drive the router over a real socket with reqwest.
//
// The server uses `DotRenderer`, so these tests need no Graphviz install;
// the rendered body is the DOT text itself.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dflc::config::ServerConfig;
use dflc::render::{DotRenderer, RenderError, Rendered, Renderer};
use dflc::serve::{router, AppState};
use serde_json::{json, Value};

const SERIES: &str =
    "def main = [X | Y] use -a [X | Y] as R use +a [X | Y] as A link X >-> R.X, R.Y >-> A.X, A.Y >-> Y";

const RECURSIVE: &str = "
def f = <a|> [X | Y]
    use -a [X | Y] as Rem
    use f <a |> [X | Y] as Recursive
    use +a [X | Y] as Add
    link
        X >-> Rem.X
        Rem.Y >-> Recursive.X
        Recursive.Y >-> Add.X
        Add.Y >-> Y
";

async fn spawn_server(config: ServerConfig) -> String {
    spawn_with_renderer(config, Arc::new(DotRenderer)).await
}

async fn spawn_with_renderer(config: ServerConfig, renderer: Arc<dyn Renderer>) -> String {
    let app = router(AppState::with_renderer(config, renderer));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

async fn generate(
    client: &reqwest::Client,
    base: &str,
    depth: &str,
    typing: bool,
    code: &str,
) -> reqwest::Response {
    client
        .post(format!("{base}/generate-image/{depth}?typing={typing}"))
        .json(&json!({ "code": code }))
        .send()
        .await
        .unwrap()
}

fn session_cookie(response: &reqwest::Response) -> String {
    let raw = response
        .headers()
        .get(reqwest::header::SET_COOKIE)
        .expect("set-cookie header")
        .to_str()
        .unwrap();
    raw.split(';').next().unwrap().trim().to_string()
}

async fn error_kind(response: reqwest::Response) -> String {
    let body: Value = response.json().await.unwrap();
    body["error"]["kind"].as_str().unwrap().to_string()
}

// ── /generate-image ─────────────────────────────────────────────────────────

#[tokio::test]
async fn generate_image_returns_rendered_dot() {
    let base = spawn_server(ServerConfig::default()).await;
    let client = reqwest::Client::new();
    let response = generate(&client, &base, "0", false, SERIES).await;
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "text/vnd.graphviz"
    );
    assert!(response.headers().contains_key("x-compilation-id"));
    assert!(!response.headers().contains_key("x-typing"));
    let body = response.text().await.unwrap();
    assert!(body.starts_with("digraph \"main\" {"));
    assert!(body.contains("n0 [shape=circle, label=\"-a\", tooltip=\"R\"];"));
}

#[tokio::test]
async fn typing_follows_the_session_cookie() {
    let base = spawn_server(ServerConfig::default()).await;
    let client = reqwest::Client::new();
    let response = generate(&client, &base, "0", true, SERIES).await;
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()["x-typing"].to_str().unwrap(),
        "[X: {a} | Y: {a}]"
    );
    let cookie = session_cookie(&response);
    assert!(cookie.starts_with("dflc_compilation="));

    let typing: Value = client
        .get(format!("{base}/get-typing"))
        .header(reqwest::header::COOKIE, cookie)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(typing, json!({ "ty": "[X: {a} | Y: {a}]" }));
}

#[tokio::test]
async fn typing_is_empty_when_not_requested() {
    let base = spawn_server(ServerConfig::default()).await;
    let client = reqwest::Client::new();
    let response = generate(&client, &base, "0", false, SERIES).await;
    let id = response.headers()["x-compilation-id"].to_str().unwrap().to_string();
    let typing: Value = client
        .get(format!("{base}/get-typing?id={id}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(typing["ty"], "");
}

#[tokio::test]
async fn concurrent_sessions_keep_their_own_typing() {
    let base = spawn_server(ServerConfig::default()).await;
    let client = reqwest::Client::new();
    let add_only = "def main = [X | Y] use +a [X | Y] as A link X >-> A.X, A.Y >-> Y";

    let (first, second) = tokio::join!(
        generate(&client, &base, "0", true, SERIES),
        generate(&client, &base, "2", true, add_only),
    );
    let first_id = first.headers()["x-compilation-id"].to_str().unwrap().to_string();
    let second_id = second.headers()["x-compilation-id"].to_str().unwrap().to_string();
    assert_ne!(first_id, second_id);

    for (id, expected) in [
        (first_id, "[X: {a} | Y: {a}]"),
        (second_id, "[X: {!a} | Y: {a}]"),
    ] {
        let typing: Value = client
            .get(format!("{base}/get-typing?id={id}"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(typing["ty"], expected);
    }
}

#[tokio::test]
async fn recursion_depth_comes_from_the_path() {
    let base = spawn_server(ServerConfig::default()).await;
    let client = reqwest::Client::new();
    let shallow = generate(&client, &base, "0", false, RECURSIVE).await.text().await.unwrap();
    let deep = generate(&client, &base, "3", false, RECURSIVE).await.text().await.unwrap();
    assert_eq!(shallow.matches("shape=circle").count(), 2);
    assert_eq!(deep.matches("shape=circle").count(), 8);
    assert_eq!(deep.matches("depth exceeded").count(), 1);
}

// ── Failures ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn syntax_error_is_bad_request() {
    let base = spawn_server(ServerConfig::default()).await;
    let client = reqwest::Client::new();
    let response = generate(&client, &base, "0", false, "def main = [X | Y] link X >-> ").await;
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["kind"], "SyntaxError");
    assert_eq!(body["error"]["line"], 1);
    assert!(!body["diagnostics"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn semantic_error_is_unprocessable() {
    let base = spawn_server(ServerConfig::default()).await;
    let client = reqwest::Client::new();
    let response = generate(
        &client,
        &base,
        "0",
        false,
        "def main = [X | Y] use g [X | Y] as G link X >-> G.X, G.Y >-> Y",
    )
    .await;
    assert_eq!(response.status(), 422);
    assert_eq!(error_kind(response).await, "UnknownDefinitionError");
}

#[tokio::test]
async fn malformed_requests_are_rejected() {
    let base = spawn_server(ServerConfig::default()).await;
    let client = reqwest::Client::new();

    let response = generate(&client, &base, "deep", false, SERIES).await;
    assert_eq!(response.status(), 400);

    let response = client
        .post(format!("{base}/generate-image/0"))
        .body("not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn resource_limits_are_payload_too_large() {
    let config = ServerConfig {
        max_depth: 4,
        max_nodes: 10,
        ..ServerConfig::default()
    };
    let base = spawn_server(config).await;
    let client = reqwest::Client::new();

    let response = generate(&client, &base, "5", false, SERIES).await;
    assert_eq!(response.status(), 413);

    let response = generate(&client, &base, "4", false, RECURSIVE).await;
    assert_eq!(response.status(), 413);
    assert_eq!(error_kind(response).await, "ResourceExceededError");
}

/// Never finishes a render.
struct Stalled;

#[async_trait]
impl Renderer for Stalled {
    async fn render(&self, _dot: &str) -> Result<Rendered, RenderError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(Rendered {
            content_type: "text/plain",
            body: Vec::new(),
        })
    }
}

#[tokio::test]
async fn stalled_renderer_is_bad_gateway() {
    let config = ServerConfig {
        render_timeout_ms: 50,
        ..ServerConfig::default()
    };
    let base = spawn_with_renderer(config, Arc::new(Stalled)).await;
    let client = reqwest::Client::new();
    let response = tokio::time::timeout(
        Duration::from_secs(10),
        generate(&client, &base, "0", false, SERIES),
    )
    .await
    .expect("request must not hang");
    assert_eq!(response.status(), 502);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["kind"], "RenderError");
    assert_eq!(
        body["error"]["message"],
        "rendering failed: renderer did not finish within 50ms"
    );
}

#[tokio::test]
async fn get_typing_id_errors() {
    let base = spawn_server(ServerConfig::default()).await;
    let client = reqwest::Client::new();

    let response = client.get(format!("{base}/get-typing")).send().await.unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({ "ty": "" }));

    let response = client
        .get(format!("{base}/get-typing?id=not-a-uuid"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    let response = client
        .get(format!("{base}/get-typing?id={}", uuid::Uuid::new_v4()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

// ── Other routes ────────────────────────────────────────────────────────────

#[tokio::test]
async fn health_reports_ok() {
    let base = spawn_server(ServerConfig::default()).await;
    let body: Value = reqwest::get(format!("{base}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn api_compile_returns_graph_and_typing() {
    let base = spawn_server(ServerConfig::default()).await;
    let client = reqwest::Client::new();
    let body: Value = client
        .post(format!("{base}/api/compile"))
        .json(&json!({ "code": SERIES, "typing": true }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["root"], "main");
    assert_eq!(body["ty"], "[X: {a} | Y: {a}]");
    assert!(body["dot"].as_str().unwrap().starts_with("digraph"));
    assert_eq!(body["source_hash"].as_str().unwrap().len(), 64);
    assert!(body["warnings"].as_array().unwrap().is_empty());

    let id = body["compilation_id"].as_str().unwrap();
    let typing: Value = client
        .get(format!("{base}/get-typing?id={id}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(typing["ty"], "[X: {a} | Y: {a}]");
}

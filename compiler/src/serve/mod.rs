// serve/mod.rs — HTTP front end for the compiler
//
// Routes:
//   POST /generate-image/{depth}?typing=   compile, render, set cookie
//   GET  /get-typing[?id=]                 typing of a stored compilation
//   POST /api/compile                      inline JSON variant
//   GET  /health
// Unmatched paths fall back to `static_dir` when configured.

pub mod error;
pub mod handlers;
pub mod state;

use axum::http::HeaderName;
use axum::routing::{get, post};
use axum::Router;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::ServerConfig;
pub use state::AppState;

pub const COOKIE_NAME: &str = "dflc_compilation";
pub const X_COMPILATION_ID: HeaderName = HeaderName::from_static("x-compilation-id");
pub const X_TYPING: HeaderName = HeaderName::from_static("x-typing");

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("cannot bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        source: std::io::Error,
    },
    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([X_COMPILATION_ID, X_TYPING]);

    let mut app = Router::new()
        .route("/generate-image/{depth}", post(handlers::generate_image))
        .route("/get-typing", get(handlers::get_typing))
        .route("/api/compile", post(handlers::compile_json))
        .route("/health", get(handlers::health));
    if let Some(dir) = &state.config.static_dir {
        app = app.fallback_service(ServeDir::new(dir));
    }
    app.layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Bind `config.bind` and serve until Ctrl-C.
pub async fn serve(config: ServerConfig) -> Result<(), ServeError> {
    let listener = TcpListener::bind(config.bind)
        .await
        .map_err(|source| ServeError::Bind {
            addr: config.bind,
            source,
        })?;
    let addr = listener.local_addr()?;
    info!(
        %addr,
        renderer = ?config.renderer,
        static_dir = ?config.static_dir,
        "dflc listening"
    );
    let app = router(AppState::new(config));
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutting down");
    }
}

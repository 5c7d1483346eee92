// render.rs — Renderer boundary: DOT text in, image bytes out
//
// Layout and drawing are delegated to Graphviz. `GraphvizRenderer` pipes
// the DOT text through the configured executable on the async runtime;
// `DotRenderer` returns the DOT text itself. `render_within` bounds either
// one in time.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
    #[error("i/o error talking to `{command}`: {source}")]
    Io {
        command: String,
        source: std::io::Error,
    },
    #[error("`{command}` exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
    #[error("renderer did not finish within {}ms", .0.as_millis())]
    TimedOut(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Svg,
    Png,
}

impl ImageFormat {
    pub fn content_type(self) -> &'static str {
        match self {
            ImageFormat::Svg => "image/svg+xml",
            ImageFormat::Png => "image/png",
        }
    }

    fn flag(self) -> &'static str {
        match self {
            ImageFormat::Svg => "-Tsvg",
            ImageFormat::Png => "-Tpng",
        }
    }
}

/// Turns DOT text into a displayable artifact.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, dot: &str) -> Result<Rendered, RenderError>;
}

/// Run `renderer` with a time limit. Dropping the pending render kills a
/// Graphviz child (`kill_on_drop`).
pub async fn render_within(
    renderer: &dyn Renderer,
    dot: &str,
    limit: Duration,
) -> Result<Rendered, RenderError> {
    tokio::time::timeout(limit, renderer.render(dot))
        .await
        .map_err(|_| RenderError::TimedOut(limit))?
}

// ── Graphviz subprocess ──

#[derive(Debug, Clone)]
pub struct GraphvizRenderer {
    pub command: String,
    pub format: ImageFormat,
}

#[async_trait]
impl Renderer for GraphvizRenderer {
    async fn render(&self, dot: &str) -> Result<Rendered, RenderError> {
        let mut child = Command::new(&self.command)
            .arg(self.format.flag())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RenderError::Spawn {
                command: self.command.clone(),
                source,
            })?;

        let io_error = |source| RenderError::Io {
            command: self.command.clone(),
            source,
        };
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(dot.as_bytes()).await.map_err(io_error)?;
            // stdin drops here so graphviz sees EOF
        }
        let output = child.wait_with_output().await.map_err(io_error)?;
        if !output.status.success() {
            return Err(RenderError::Failed {
                command: self.command.clone(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(Rendered {
            content_type: self.format.content_type(),
            body: output.stdout,
        })
    }
}

// ── DOT pass-through ──

#[derive(Debug, Clone, Copy, Default)]
pub struct DotRenderer;

#[async_trait]
impl Renderer for DotRenderer {
    async fn render(&self, dot: &str) -> Result<Rendered, RenderError> {
        Ok(Rendered {
            content_type: "text/vnd.graphviz",
            body: dot.as_bytes().to_vec(),
        })
    }
}

// config.rs — Server configuration: TOML file, then DFLC_* environment,
// then command-line overrides
//
// Preconditions: none.
// Postconditions: a validated `ServerConfig`; every field has a default.
// Failure modes: unreadable file, malformed TOML, unparsable environment
//   value, or a zero capacity/budget → `ConfigError`.
// Side effects: reads the config file (environment access is injected).

use std::fmt::Display;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use clap::ValueEnum;
use serde::Deserialize;
use thiserror::Error;

use crate::render::ImageFormat;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RendererKind {
    /// Run the Graphviz executable.
    Graphviz,
    /// Return DOT text unrendered.
    Dot,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub renderer: RendererKind,
    pub graphviz_command: String,
    pub image_format: ImageFormat,
    pub max_source_bytes: usize,
    /// Largest depth a request may ask for.
    pub max_depth: usize,
    pub max_nodes: usize,
    pub compile_timeout_ms: u64,
    /// Longest the renderer may take for one image.
    pub render_timeout_ms: u64,
    pub typing_store_capacity: usize,
    /// Front-end files served for unmatched routes.
    pub static_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind: SocketAddr::from(([127, 0, 0, 1], 5000)),
            renderer: RendererKind::Graphviz,
            graphviz_command: "dot".to_string(),
            image_format: ImageFormat::Svg,
            max_source_bytes: 1024 * 1024,
            max_depth: 64,
            max_nodes: 100_000,
            compile_timeout_ms: 5_000,
            render_timeout_ms: 10_000,
            typing_store_capacity: 1_024,
            static_dir: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid value {value:?} for {var}: {reason}")]
    Env {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("`{field}` must be at least 1")]
    Zero { field: &'static str },
}

/// Values given on the command line; `None` keeps the lower layer.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub bind: Option<SocketAddr>,
    pub renderer: Option<RendererKind>,
    pub static_dir: Option<PathBuf>,
}

impl ServerConfig {
    pub fn compile_timeout(&self) -> Duration {
        Duration::from_millis(self.compile_timeout_ms)
    }

    pub fn render_timeout(&self) -> Duration {
        Duration::from_millis(self.render_timeout_ms)
    }

    /// Parse TOML text.
    pub fn from_toml(text: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load all layers. `env` looks up an environment variable.
    pub fn load(
        file: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
        overrides: &Overrides,
    ) -> Result<Self, ConfigError> {
        let mut config = match file {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_toml(&text, path)?
            }
            None => ServerConfig::default(),
        };
        config.apply_env(env)?;
        config.apply_overrides(overrides);
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(v) = env("DFLC_BIND") {
            self.bind = parse_env("DFLC_BIND", v)?;
        }
        if let Some(v) = env("DFLC_RENDERER") {
            self.renderer = parse_enum("DFLC_RENDERER", v)?;
        }
        if let Some(v) = env("DFLC_GRAPHVIZ_COMMAND") {
            self.graphviz_command = v;
        }
        if let Some(v) = env("DFLC_IMAGE_FORMAT") {
            self.image_format = parse_enum("DFLC_IMAGE_FORMAT", v)?;
        }
        if let Some(v) = env("DFLC_MAX_SOURCE_BYTES") {
            self.max_source_bytes = parse_env("DFLC_MAX_SOURCE_BYTES", v)?;
        }
        if let Some(v) = env("DFLC_MAX_DEPTH") {
            self.max_depth = parse_env("DFLC_MAX_DEPTH", v)?;
        }
        if let Some(v) = env("DFLC_MAX_NODES") {
            self.max_nodes = parse_env("DFLC_MAX_NODES", v)?;
        }
        if let Some(v) = env("DFLC_COMPILE_TIMEOUT_MS") {
            self.compile_timeout_ms = parse_env("DFLC_COMPILE_TIMEOUT_MS", v)?;
        }
        if let Some(v) = env("DFLC_RENDER_TIMEOUT_MS") {
            self.render_timeout_ms = parse_env("DFLC_RENDER_TIMEOUT_MS", v)?;
        }
        if let Some(v) = env("DFLC_TYPING_STORE_CAPACITY") {
            self.typing_store_capacity = parse_env("DFLC_TYPING_STORE_CAPACITY", v)?;
        }
        if let Some(v) = env("DFLC_STATIC_DIR") {
            self.static_dir = Some(PathBuf::from(v));
        }
        Ok(())
    }

    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(bind) = overrides.bind {
            self.bind = bind;
        }
        if let Some(renderer) = overrides.renderer {
            self.renderer = renderer;
        }
        if let Some(dir) = &overrides.static_dir {
            self.static_dir = Some(dir.clone());
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let zero = [
            ("max_source_bytes", self.max_source_bytes == 0),
            ("max_nodes", self.max_nodes == 0),
            ("compile_timeout_ms", self.compile_timeout_ms == 0),
            ("render_timeout_ms", self.render_timeout_ms == 0),
            ("typing_store_capacity", self.typing_store_capacity == 0),
        ];
        match zero.iter().find(|(_, is_zero)| *is_zero) {
            Some(&(field, _)) => Err(ConfigError::Zero { field }),
            None => Ok(()),
        }
    }
}

fn parse_env<T>(var: &'static str, value: String) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    value.trim().parse().map_err(|err: T::Err| ConfigError::Env {
        var,
        reason: err.to_string(),
        value,
    })
}

fn parse_enum<T: ValueEnum>(var: &'static str, value: String) -> Result<T, ConfigError> {
    T::from_str(value.trim(), true).map_err(|reason| ConfigError::Env { var, value, reason })
}

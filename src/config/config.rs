//! Configuration structures and loading

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Main daemon configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Configuration {
    /// Enable debug-level logging
    #[serde(default)]
    pub debug: bool,

    /// HTTP server configuration
    #[serde(default)]
    pub api: ApiConfiguration,

    /// Container engine configuration
    #[serde(default)]
    pub container: ContainerConfiguration,

    /// SQLite store configuration
    #[serde(default)]
    pub database: DatabaseConfiguration,

    /// Identity provider configuration (local-verification side only)
    #[serde(default)]
    pub identity: IdentityConfiguration,

    /// Gateway dispatch configuration
    #[serde(default)]
    pub gateway: GatewayConfiguration,
}

impl Configuration {
    /// Load configuration from a TOML file, resolving `database.path`
    /// relative to the config file's own directory.
    pub fn load(path: &str) -> Result<Self> {
        let config_path = Path::new(path);
        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("failed to read config file: {path}"))?;

        let mut config: Configuration =
            toml::from_str(&content).with_context(|| "failed to parse configuration")?;

        let base_dir = config_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

        config.database.resolve_path(&base_dir);

        if let Some(parent) = Path::new(&config.database.path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        Ok(config)
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfiguration {
    #[serde(default = "default_api_host")]
    pub host: String,

    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ApiConfiguration {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
        }
    }
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8090
}

/// Container engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ContainerConfiguration {
    /// Explicit engine endpoint override. When unset, discovery falls
    /// through to the engine client's own default resolution, which already
    /// probes the well-known per-user socket paths.
    pub endpoint: Option<String>,

    #[serde(default = "default_base_image")]
    pub base_image: String,
}

impl Default for ContainerConfiguration {
    fn default() -> Self {
        Self {
            endpoint: None,
            base_image: default_base_image(),
        }
    }
}

fn default_base_image() -> String {
    crate::types::BASE_RUNTIME_IMAGE_DEFAULT.to_string()
}

/// SQLite store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfiguration {
    /// Path to the SQLite file, or `:memory:` for an ephemeral store.
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfiguration {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

impl DatabaseConfiguration {
    fn resolve_path(&mut self, base_dir: &Path) {
        if self.path == ":memory:" {
            return;
        }
        let path = Path::new(&self.path);
        if path.is_relative() {
            self.path = base_dir.join(path).to_string_lossy().into_owned();
        }
    }
}

fn default_database_path() -> String {
    "clowdy-daemon.sqlite3".to_string()
}

/// Identity provider configuration, consumed only by `auth`'s local
/// bearer-token verification — the provider itself is external.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfiguration {
    pub jwks_url: Option<String>,
}

impl Default for IdentityConfiguration {
    fn default() -> Self {
        Self { jwks_url: None }
    }
}

/// Gateway dispatch configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfiguration {
    /// Request bodies larger than this are rejected with 413 before being
    /// decoded into the HTTP event (decided open question: the container's
    /// own 128 MiB memory cap makes an unbounded body a real resource-
    /// exhaustion vector).
    #[serde(default = "default_max_body_size_bytes")]
    pub max_body_size_bytes: usize,
}

impl Default for GatewayConfiguration {
    fn default() -> Self {
        Self {
            max_body_size_bytes: default_max_body_size_bytes(),
        }
    }
}

fn default_max_body_size_bytes() -> usize {
    1024 * 1024
}

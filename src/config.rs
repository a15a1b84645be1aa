//! Gateway configuration module.
//!
//! Handles loading, validating, and merging `imgate.toml`. Stock defaults are
//! the base layer; the user file only needs the keys it wants to change.
//! A missing file means stock defaults.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [server]
//! listen = "0.0.0.0:8080"       # Socket address to bind
//! request_timeout_secs = 30     # Whole-request deadline (answered with 408)
//! shutdown_grace_secs = 60      # Drain window after Ctrl-C / SIGTERM
//! cors_allowed_origins = []     # Empty = any origin
//!
//! [fetch]
//! max_bytes = 5242880           # Upstream body ceiling (5 MiB)
//! timeout_secs = 15             # Upstream request timeout
//!
//! [image]
//! max_dimension = 20000         # Largest decoded or resized side, in pixels
//! max_pixels = 100000000        # Pixel budget across all frames
//!
//! [response]
//! cache_control = "public, max-age=86400"
//!
//! [log]
//! filter = "imgate=info,tower_http=info"   # RUST_LOG takes precedence
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::imaging::PixelLimits;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "imgate.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Gateway configuration loaded from `imgate.toml`.
///
/// All fields have sensible defaults. Unknown keys are rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayConfig {
    /// Listener, timeouts, CORS.
    pub server: ServerConfig,
    /// Upstream fetch limits.
    pub fetch: FetchConfig,
    /// Decode and resize pixel limits.
    pub image: ImageConfig,
    /// Headers added to transformed responses.
    pub response: ResponseConfig,
    /// Log filter.
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub listen: String,
    pub request_timeout_secs: u64,
    pub shutdown_grace_secs: u64,
    pub cors_allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
            request_timeout_secs: 30,
            shutdown_grace_secs: 60,
            cors_allowed_origins: Vec::new(),
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetchConfig {
    pub max_bytes: u64,
    pub timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_bytes: 5 * 1024 * 1024,
            timeout_secs: 15,
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Bounds on decoded pixel data. The byte ceiling alone does not bound
/// memory: a few bytes of GIF can declare a 65535x65535 canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImageConfig {
    pub max_dimension: u32,
    pub max_pixels: u64,
}

impl Default for ImageConfig {
    fn default() -> Self {
        let limits = PixelLimits::default();
        Self {
            max_dimension: limits.max_dimension,
            max_pixels: limits.max_pixels,
        }
    }
}

impl ImageConfig {
    pub fn limits(&self) -> PixelLimits {
        PixelLimits {
            max_dimension: self.max_dimension,
            max_pixels: self.max_pixels,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResponseConfig {
    pub cache_control: String,
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            cache_control: "public, max-age=86400".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "imgate=info,tower_http=info".to_string(),
        }
    }
}

impl GatewayConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listen_addr()?;
        if self.fetch.max_bytes == 0 {
            return Err(ConfigError::Validation(
                "fetch.max_bytes must be greater than 0".into(),
            ));
        }
        if self.fetch.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "fetch.timeout_secs must be greater than 0".into(),
            ));
        }
        if self.image.max_dimension == 0 {
            return Err(ConfigError::Validation(
                "image.max_dimension must be greater than 0".into(),
            ));
        }
        if self.image.max_pixels == 0 {
            return Err(ConfigError::Validation(
                "image.max_pixels must be greater than 0".into(),
            ));
        }
        if self.server.request_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "server.request_timeout_secs must be greater than 0".into(),
            ));
        }
        if self.response.cache_control.trim().is_empty() {
            return Err(ConfigError::Validation(
                "response.cache_control must not be empty".into(),
            ));
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.server.listen.parse().map_err(|e| {
            ConfigError::Validation(format!(
                "server.listen {:?} is not a socket address: {e}",
                self.server.listen
            ))
        })
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the canonical representation of all default values, used as the
/// base layer for merging user overrides on top.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(GatewayConfig::default())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
/// Returns `Err` if the file exists but contains invalid TOML.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<GatewayConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: GatewayConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from the given file.
///
/// Merges user values on top of stock defaults, rejects unknown keys,
/// and validates the result.
pub fn load_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let overlay = load_raw_config(path)?;
    resolve_config(base, overlay)
}

/// Returns a fully-commented stock `imgate.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# imgate Configuration
# ====================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# HTTP server
# ---------------------------------------------------------------------------
[server]
# Socket address to listen on.
listen = "0.0.0.0:8080"

# Whole-request deadline in seconds. Slower requests get 408.
request_timeout_secs = 30

# After Ctrl-C / SIGTERM, wait this long for in-flight requests to finish.
shutdown_grace_secs = 60

# Origins allowed by CORS. An empty list allows any origin.
cors_allowed_origins = []

# ---------------------------------------------------------------------------
# Upstream fetch
# ---------------------------------------------------------------------------
[fetch]
# Largest source image accepted, in bytes (5 MiB).
max_bytes = 5242880

# Upstream request timeout in seconds, including the body.
timeout_secs = 15

# ---------------------------------------------------------------------------
# Pixel limits
# ---------------------------------------------------------------------------
[image]
# Largest width or height, in pixels, for a decoded source or a resize
# result. Larger images fail with 400 (source) or 500 (resize).
max_dimension = 20000

# Pixel budget for one image, counting every frame of an animation.
max_pixels = 100000000

# ---------------------------------------------------------------------------
# Responses
# ---------------------------------------------------------------------------
[response]
# Cache-Control header sent with transformed images.
cache_control = "public, max-age=86400"

# ---------------------------------------------------------------------------
# Logging
# ---------------------------------------------------------------------------
[log]
# tracing-subscriber EnvFilter directives. RUST_LOG overrides this.
filter = "imgate=info,tower_http=info"
"##
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_values() {
        let config = GatewayConfig::default();
        assert_eq!(config.server.listen, "0.0.0.0:8080");
        assert_eq!(config.server.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.server.shutdown_grace(), Duration::from_secs(60));
        assert!(config.server.cors_allowed_origins.is_empty());
        assert_eq!(config.fetch.max_bytes, 5 * 1024 * 1024);
        assert_eq!(config.fetch.timeout(), Duration::from_secs(15));
        assert_eq!(config.image.limits(), PixelLimits::default());
        assert_eq!(config.response.cache_control, "public, max-age=86400");
        config.validate().unwrap();
    }

    #[test]
    fn load_config_returns_default_when_no_file() {
        let tmp = TempDir::new().unwrap();
        let config = load_config(&tmp.path().join(DEFAULT_CONFIG_FILE)).unwrap();
        assert_eq!(config, GatewayConfig::default());
    }

    #[test]
    fn load_config_reads_partial_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(DEFAULT_CONFIG_FILE);
        fs::write(
            &path,
            r#"
[server]
listen = "127.0.0.1:9000"
cors_allowed_origins = ["https://example.com"]

[fetch]
max_bytes = 1024

[image]
max_dimension = 4096
"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:9000");
        assert_eq!(config.server.cors_allowed_origins, ["https://example.com"]);
        assert_eq!(config.fetch.max_bytes, 1024);
        assert_eq!(config.image.limits().max_dimension, 4096);
        assert_eq!(config.image.max_pixels, PixelLimits::DEFAULT_MAX_PIXELS);
        // Unspecified values should be defaults
        assert_eq!(config.fetch.timeout_secs, 15);
        assert_eq!(config.server.request_timeout_secs, 30);
    }

    #[test]
    fn load_config_invalid_toml_is_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(DEFAULT_CONFIG_FILE);
        fs::write(&path, "this is not valid toml [[[").unwrap();
        assert!(matches!(load_config(&path), Err(ConfigError::Toml(_))));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(DEFAULT_CONFIG_FILE);
        fs::write(&path, "[fetch]\nmax_byte = 10\n").unwrap();
        assert!(matches!(load_config(&path), Err(ConfigError::Toml(_))));
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = GatewayConfig::default();
        config.fetch.max_bytes = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));

        let mut config = GatewayConfig::default();
        config.fetch.timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = GatewayConfig::default();
        config.image.max_pixels = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("image.max_pixels"));

        let mut config = GatewayConfig::default();
        config.server.listen = "not-an-address".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("server.listen"));
    }

    #[test]
    fn validation_runs_on_load() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(DEFAULT_CONFIG_FILE);
        fs::write(&path, "[server]\nrequest_timeout_secs = 0\n").unwrap();
        assert!(matches!(
            load_config(&path),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn merge_toml_overlays_nested_tables() {
        let base: toml::Value = toml::from_str("[a]\nx = 1\ny = 2\n").unwrap();
        let overlay: toml::Value = toml::from_str("[a]\ny = 3\n[b]\nz = 4\n").unwrap();
        let merged = merge_toml(base, overlay);
        assert_eq!(merged["a"]["x"].as_integer(), Some(1));
        assert_eq!(merged["a"]["y"].as_integer(), Some(3));
        assert_eq!(merged["b"]["z"].as_integer(), Some(4));
    }

    #[test]
    fn stock_config_toml_matches_defaults() {
        let parsed: GatewayConfig = toml::from_str(stock_config_toml()).unwrap();
        assert_eq!(parsed, GatewayConfig::default());
    }
}

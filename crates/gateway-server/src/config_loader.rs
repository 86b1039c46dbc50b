//! Configuration loading (spec §6's config table plus the ambient rule that
//! a typo in a config file should fail startup, not be silently ignored —
//! enforced by [`gateway_core::GatewayConfig`]'s `deny_unknown_fields`).
//!
//! Precedence: an explicit `--config` path, then the `GATEWAY_CONFIG`
//! environment variable, then [`GatewayConfig::default`].

use std::path::{Path, PathBuf};

use gateway_core::GatewayConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Resolves and loads the effective configuration.
///
/// - `cli_path`: the `--config` flag, if given.
/// - Falls back to `GATEWAY_CONFIG` if `cli_path` is `None`.
/// - Falls back to [`GatewayConfig::default`] if neither names a file.
pub fn load(cli_path: Option<&Path>) -> Result<GatewayConfig, ConfigLoadError> {
    let path = cli_path
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os("GATEWAY_CONFIG").map(PathBuf::from));

    let Some(path) = path else {
        tracing::info!("no config path given, using built-in defaults");
        return Ok(GatewayConfig::default());
    };

    let raw = std::fs::read_to_string(&path).map_err(|source| ConfigLoadError::Read {
        path: path.clone(),
        source,
    })?;
    let config = GatewayConfig::from_toml_str(&raw).map_err(|source| ConfigLoadError::Parse { path, source })?;
    Ok(config)
}

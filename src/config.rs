use anyhow::{Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/tubedrop-env";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_DOWNLOAD_ROOT: &str = "downloads";
pub const DEFAULT_MAX_ACTIVE_BATCHES: usize = 4;

/// Raw key/value view of the env-file; every field optional so partial files
/// still load.
#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    pub download_root: Option<PathBuf>,
    pub port: Option<u16>,
    pub host: Option<String>,
    pub max_active_batches: Option<usize>,
}

/// Fully resolved runtime configuration with every default applied.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub download_root: PathBuf,
    pub port: u16,
    pub host: String,
    pub max_active_batches: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            download_root: PathBuf::from(DEFAULT_DOWNLOAD_ROOT),
            port: DEFAULT_PORT,
            host: DEFAULT_HOST.to_string(),
            max_active_batches: DEFAULT_MAX_ACTIVE_BATCHES,
        }
    }
}

pub fn read_env_config(path: &Path) -> Result<Option<EnvConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    let mut cfg = EnvConfig::default();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if let Some((key, value_raw)) = trimmed.split_once('=') {
            let value = value_raw.trim().trim_matches('"');
            match key {
                "DOWNLOAD_ROOT" => {
                    if !value.is_empty() {
                        cfg.download_root = Some(PathBuf::from(value));
                    }
                }
                "TUBEDROP_PORT" => {
                    let port: u16 = value.parse().with_context(|| {
                        format!("Parsing TUBEDROP_PORT from {}", path.display())
                    })?;
                    cfg.port = Some(port);
                }
                "TUBEDROP_HOST" => {
                    if !value.is_empty() {
                        cfg.host = Some(value.to_string());
                    }
                }
                "MAX_ACTIVE_BATCHES" => {
                    let limit: usize = value.parse().with_context(|| {
                        format!("Parsing MAX_ACTIVE_BATCHES from {}", path.display())
                    })?;
                    cfg.max_active_batches = Some(limit);
                }
                _ => {}
            }
        }
    }
    Ok(Some(cfg))
}

/// Loads the env-file when present; a missing file resolves to pure defaults
/// so the server runs out of the box with a local `downloads/` directory.
pub fn load_runtime_config(path: impl AsRef<Path>) -> Result<RuntimeConfig> {
    let defaults = RuntimeConfig::default();
    let cfg = match read_env_config(path.as_ref())? {
        Some(cfg) => cfg,
        None => return Ok(defaults),
    };
    Ok(RuntimeConfig {
        download_root: cfg.download_root.unwrap_or(defaults.download_root),
        port: cfg.port.unwrap_or(defaults.port),
        host: cfg.host.unwrap_or(defaults.host),
        max_active_batches: cfg
            .max_active_batches
            .unwrap_or(defaults.max_active_batches),
    })
}

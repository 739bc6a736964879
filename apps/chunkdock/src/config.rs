//! Configuration management.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/chunkdock/chunkdock.toml`
//! - Windows: `%APPDATA%/chunkdock/chunkdock.toml`
//!
//! A `--config` path on the command line takes precedence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Ingestion configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Root of the upload tree; chunks go to `chunks/`, assembled files to
    /// `completed/`. A leading `~/` expands to `$HOME`.
    #[serde(default = "default_uploads_root")]
    pub uploads_root: String,

    /// Chunk size in bytes used by the `upload` command.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Log filter used when `RUST_LOG` is not set.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_uploads_root() -> String {
    "./uploads".into()
}

fn default_chunk_size() -> usize {
    chunkdock_transfer::DEFAULT_CHUNK_SIZE
}

fn default_log_filter() -> String {
    "info".into()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            uploads_root: default_uploads_root(),
            chunk_size: default_chunk_size(),
            log_filter: default_log_filter(),
        }
    }
}

impl Config {
    /// Loads configuration from `path` (or the platform default), writing
    /// the defaults there if no file exists yet.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => config_path()?,
        };

        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save(&path)?;
            Ok(config)
        }
    }

    /// Saves the configuration to `path`.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Upload root with `~/` expanded.
    pub fn uploads_root(&self) -> PathBuf {
        PathBuf::from(expand_path(&self.uploads_root))
    }
}

/// Expands a leading `~/` to the user's home directory.
fn expand_path(path: &str) -> String {
    if path.starts_with("~/")
        && let Ok(home) = std::env::var("HOME")
    {
        return format!("{}{}", home, &path[1..]);
    }
    path.to_string()
}

/// Returns the platform-specific configuration file path.
fn config_path() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        Ok(PathBuf::from(home)
            .join(".config")
            .join("chunkdock")
            .join("chunkdock.toml"))
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        Ok(PathBuf::from(appdata)
            .join("chunkdock")
            .join("chunkdock.toml"))
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        Ok(PathBuf::from("/tmp/chunkdock/chunkdock.toml"))
    }
}

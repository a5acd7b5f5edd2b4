//! TOML configuration.
//!
//! Every section is optional; a missing file section falls back to the
//! defaults below. See `config/parley.example.toml`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 16 MiB, the default cap for fetches, page extraction and local reads.
pub const DEFAULT_MAX_BYTES: u64 = 16 * 1024 * 1024;
/// Upper bound on files returned by the directory walker.
pub const WALK_MAX_FILES: usize = 256;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub attachments: AttachmentsConfig,
    #[serde(default)]
    pub builtin: BuiltinConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
        }
    }
}

fn default_base_dir() -> PathBuf {
    PathBuf::from("~/.parley")
}

impl StorageConfig {
    /// Base directory with a leading `~` expanded.
    pub fn resolved_base_dir(&self) -> PathBuf {
        expand_tilde(&self.base_dir)
    }

    pub fn prompts_dir(&self) -> PathBuf {
        self.resolved_base_dir().join("prompts")
    }

    pub fn tools_dir(&self) -> PathBuf {
        self.resolved_base_dir().join("tools")
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AttachmentsConfig {
    #[serde(default = "default_max_bytes")]
    pub max_fetch_bytes: u64,
    #[serde(default = "default_max_bytes")]
    pub max_page_bytes: u64,
    #[serde(default = "default_max_bytes")]
    pub max_file_bytes: u64,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    #[serde(default = "default_walk_max_files")]
    pub walk_max_files: usize,
}

impl Default for AttachmentsConfig {
    fn default() -> Self {
        Self {
            max_fetch_bytes: DEFAULT_MAX_BYTES,
            max_page_bytes: DEFAULT_MAX_BYTES,
            max_file_bytes: DEFAULT_MAX_BYTES,
            http_timeout_secs: 30,
            walk_max_files: WALK_MAX_FILES,
        }
    }
}

impl AttachmentsConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

fn default_max_bytes() -> u64 {
    DEFAULT_MAX_BYTES
}
fn default_http_timeout_secs() -> u64 {
    30
}
fn default_walk_max_files() -> usize {
    WALK_MAX_FILES
}

#[derive(Debug, Deserialize, Clone)]
pub struct BuiltinConfig {
    /// Non-positive means every read sees the snapshot as stale.
    #[serde(default = "default_snapshot_max_age_secs")]
    pub snapshot_max_age_secs: i64,
}

impl Default for BuiltinConfig {
    fn default() -> Self {
        Self {
            snapshot_max_age_secs: default_snapshot_max_age_secs(),
        }
    }
}

impl BuiltinConfig {
    pub fn snapshot_max_age(&self) -> Duration {
        if self.snapshot_max_age_secs <= 0 {
            Duration::ZERO
        } else {
            Duration::from_secs(self.snapshot_max_age_secs as u64)
        }
    }
}

fn default_snapshot_max_age_secs() -> i64 {
    3600
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7420".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: false,
        }
    }
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Config {
    /// Configuration rooted at an explicit base directory, everything else default.
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage: StorageConfig {
                base_dir: base_dir.into(),
            },
            ..Default::default()
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&mut config)?;
    Ok(config)
}

/// Checks invariants and clamps soft limits in place.
pub fn validate(config: &mut Config) -> Result<()> {
    let a = &mut config.attachments;
    if a.max_fetch_bytes == 0 {
        anyhow::bail!("attachments.max_fetch_bytes must be > 0");
    }
    if a.max_page_bytes == 0 {
        anyhow::bail!("attachments.max_page_bytes must be > 0");
    }
    if a.max_file_bytes == 0 {
        anyhow::bail!("attachments.max_file_bytes must be > 0");
    }
    if a.http_timeout_secs == 0 {
        anyhow::bail!("attachments.http_timeout_secs must be > 0");
    }
    a.walk_max_files = a.walk_max_files.clamp(1, WALK_MAX_FILES);

    if config.server.bind.trim().is_empty() {
        anyhow::bail!("server.bind must not be empty");
    }
    Ok(())
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    } else if s == "~" {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home);
        }
    }
    path.to_path_buf()
}

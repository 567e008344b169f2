//! Layered configuration: CLI flag > config file > built-in default

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::frame::DEFAULT_CHUNK_SIZE;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_LOG_FILE: &str = "Logs/app.log";

pub fn config_dir() -> PathBuf {
    #[cfg(windows)]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join("gzdrop");
        }
    }
    // Unix-like default
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".config").join("gzdrop");
    }
    PathBuf::from(".gzdrop")
}

/// `$GZDROP_CONFIG`, else `<config_dir>/config.toml`.
pub fn config_path() -> PathBuf {
    match std::env::var_os("GZDROP_CONFIG") {
        Some(p) if !p.is_empty() => PathBuf::from(p),
        _ => config_dir().join("config.toml"),
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub sender: SenderConfig,
    pub receiver: ReceiverConfig,
    pub log: LogConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SenderConfig {
    pub host: String,
    pub port: u16,
    pub chunk_size: usize,
    pub connect_timeout_ms: u64, // 0 = OS default
    pub io_timeout_ms: u64,      // 0 = no deadline
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            chunk_size: DEFAULT_CHUNK_SIZE,
            connect_timeout_ms: 0,
            io_timeout_ms: 0,
        }
    }
}

impl SenderConfig {
    pub fn connect_timeout(&self) -> Option<Duration> {
        millis(self.connect_timeout_ms)
    }

    pub fn io_timeout(&self) -> Option<Duration> {
        millis(self.io_timeout_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReceiverConfig {
    pub host: String,
    pub port: u16,
    /// Unset: directory of the receiver executable
    pub save_dir: Option<PathBuf>,
    pub keep_listening: bool,
    pub chunk_size: usize,
    pub io_timeout_ms: u64,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            save_dir: None,
            keep_listening: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
            io_timeout_ms: 0,
        }
    }
}

impl ReceiverConfig {
    pub fn io_timeout(&self) -> Option<Duration> {
        millis(self.io_timeout_ms)
    }

    /// Configured save dir, else the directory holding the running binary.
    pub fn resolve_save_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.save_dir {
            return Ok(dir.clone());
        }
        let exe = std::env::current_exe().context("locate receiver executable")?;
        Ok(exe
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".")))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LogConfig {
    pub file: PathBuf,
    pub keep_rotated: usize,
    pub rotate_interval_secs: u64,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            file: PathBuf::from(DEFAULT_LOG_FILE),
            keep_rotated: 2,
            rotate_interval_secs: 60,
        }
    }
}

fn millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

impl Config {
    /// Defaults when the file is missing; an error when it is malformed.
    pub fn load_from(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(data) => toml::from_str(&data)
                .with_context(|| format!("parse config {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e).with_context(|| format!("read config {}", path.display())),
        }
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&config_path())
    }

    /// Atomic write through a temp file in the same directory.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&dir).ok();
        let data = toml::to_string_pretty(self)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(data.as_bytes())?;
        tmp.flush()?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(tmp.path(), std::fs::Permissions::from_mode(0o600));
        }
        tmp.persist(path)
            .with_context(|| format!("write config {}", path.display()))?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

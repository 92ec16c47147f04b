//! TOML configuration shared by `w24c` and `w24d`
//!
//! Every section is optional; a missing file yields the defaults. Command
//! line flags are applied on top by the binaries.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::backend::ArchiveDepths;
use crate::protocol::{DEFAULT_BASE_PORT, DEFAULT_INSTANCE_COUNT};
use crate::selector::InstanceSet;

pub fn config_dir() -> PathBuf {
    #[cfg(windows)]
    {
        if let Ok(appdata) = std::env::var("APPDATA") { return PathBuf::from(appdata).join("w24fs"); }
    }
    // Unix-like default
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".config").join("w24fs");
    }
    PathBuf::from(".w24fs")
}

pub fn default_config_path() -> PathBuf {
    config_dir().join("w24fs.toml")
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub cluster: ClusterConfig,
    pub server: ServerConfig,
    pub client: ClientConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClusterConfig {
    pub base_port: u16,
    pub instances: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            base_port: DEFAULT_BASE_PORT,
            instances: DEFAULT_INSTANCE_COUNT,
        }
    }
}

impl ClusterConfig {
    pub fn instance_set(&self) -> Result<InstanceSet> {
        InstanceSet::new(self.base_port, self.instances)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Host or address to bind; the port comes from the instance
    pub bind: String,
    /// Directory tree served to clients
    pub root: PathBuf,
    /// Parent of the per-connection scratch directories
    pub workspace: PathBuf,
    pub log_file: Option<PathBuf>,
    /// How many levels below the root each archive query searches
    pub archive_depth: ArchiveDepths,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            root: home_dir(),
            workspace: std::env::temp_dir().join("w24fs"),
            log_file: None,
            archive_depth: ArchiveDepths::default(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    pub counter_file: PathBuf,
    pub download_dir: PathBuf,
    pub show_progress: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            counter_file: PathBuf::from("client_count.txt"),
            download_dir: home_dir().join("w24project"),
            show_progress: true,
        }
    }
}

impl Config {
    /// Load from `path`, or from the default location when `None`.
    ///
    /// An explicit path must exist; the default location may be absent.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let cfg = match path {
            Some(p) => {
                let data = std::fs::read_to_string(p)
                    .with_context(|| format!("read config {}", p.display()))?;
                Self::from_toml(&data).with_context(|| format!("parse config {}", p.display()))?
            }
            None => match std::fs::read_to_string(default_config_path()) {
                Ok(data) => Self::from_toml(&data)
                    .with_context(|| format!("parse config {}", default_config_path().display()))?,
                Err(_) => Self::default(),
            },
        };
        Ok(cfg)
    }

    pub fn from_toml(data: &str) -> Result<Self> {
        let cfg: Config = toml::from_str(data)?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        self.cluster.instance_set()?;
        self.server
            .archive_depth
            .validate()
            .context("server.archive_depth")?;
        if self.server.bind.trim().is_empty() {
            bail!("server.bind must not be empty");
        }
        Ok(())
    }
}

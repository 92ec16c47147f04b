//! Shared CLI option structs for `w24c` and `w24d`
//!
//! Flags left unset fall through to the config file, which falls through to
//! built-in defaults.

use clap::Parser;
use std::path::PathBuf;

use crate::backend::ArchiveDepths;
use crate::config::Config;
use crate::selector::Role;

/// Interactive client for a w24 server cluster
#[derive(Clone, Debug, Parser)]
#[command(author, version, about = "w24 client: query a primary/mirror file server cluster")]
pub struct ClientOpts {
    /// Server address (IP or host name)
    pub server_ip: String,

    /// Zero the round-robin counter and exit without connecting
    #[arg(long)]
    pub reset: bool,

    /// Config file (default: ~/.config/w24fs/w24fs.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Port of the primary; mirrors follow consecutively
    #[arg(long)]
    pub base_port: Option<u16>,

    /// File holding the round-robin counter
    #[arg(long)]
    pub counter_file: Option<PathBuf>,

    /// Where downloaded archives are stored
    #[arg(long)]
    pub download_dir: Option<PathBuf>,

    /// Hide the download progress bar
    #[arg(long)]
    pub no_progress: bool,
}

impl ClientOpts {
    pub fn apply(&self, cfg: &mut Config) {
        if let Some(port) = self.base_port {
            cfg.cluster.base_port = port;
        }
        if let Some(ref path) = self.counter_file {
            cfg.client.counter_file = path.clone();
        }
        if let Some(ref dir) = self.download_dir {
            cfg.client.download_dir = dir.clone();
        }
        if self.no_progress {
            cfg.client.show_progress = false;
        }
    }
}

/// File query daemon; one process per instance, or all of them with --all
#[derive(Clone, Debug, Parser)]
#[command(author, version, about = "w24 daemon: serve directory queries and archives")]
pub struct DaemonOpts {
    /// Instance to run: primary, mirror1, mirror2, ... or a numeric index
    #[arg(long, default_value = "primary")]
    pub instance: Role,

    /// Run every configured instance in this process
    #[arg(long, conflicts_with = "instance")]
    pub all: bool,

    /// Host or address to bind (port comes from the instance)
    #[arg(long)]
    pub bind: Option<String>,

    /// Root directory to serve
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Parent directory for per-connection scratch space
    #[arg(long)]
    pub workspace: Option<PathBuf>,

    #[arg(long)]
    pub base_port: Option<u16>,

    /// Number of instances in the cluster (primary included)
    #[arg(long)]
    pub instances: Option<usize>,

    /// Search depth for every archive query, replacing the per-query defaults
    #[arg(long)]
    pub archive_depth: Option<usize>,

    /// Append events to this file instead of stderr
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl DaemonOpts {
    pub fn apply(&self, cfg: &mut Config) {
        if let Some(ref bind) = self.bind {
            cfg.server.bind = bind.clone();
        }
        if let Some(ref root) = self.root {
            cfg.server.root = root.clone();
        }
        if let Some(ref ws) = self.workspace {
            cfg.server.workspace = ws.clone();
        }
        if let Some(port) = self.base_port {
            cfg.cluster.base_port = port;
        }
        if let Some(n) = self.instances {
            cfg.cluster.instances = n;
        }
        if let Some(depth) = self.archive_depth {
            cfg.server.archive_depth = ArchiveDepths::uniform(depth);
        }
        if let Some(ref path) = self.log_file {
            cfg.server.log_file = Some(path.clone());
        }
    }
}

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::task::JoinSet;

use w24fs::backend::{Backend, FsBackend};
use w24fs::cli::DaemonOpts;
use w24fs::config::Config;
use w24fs::logger::{ConsoleLogger, Logger, TextLogger};
use w24fs::net_async::server::{serve, ServerContext};
use w24fs::selector::ServerInstance;

fn main() -> Result<()> {
    let opts = DaemonOpts::parse();

    let mut cfg = Config::load(opts.config.as_deref())?;
    opts.apply(&mut cfg);
    cfg.validate()?;

    let root = &cfg.server.root;
    if !root.exists() {
        anyhow::bail!("Error: Root directory does not exist: {}", root.display());
    }
    if !root.is_dir() {
        anyhow::bail!("Error: Root path is not a directory: {}", root.display());
    }
    let canonical_root = std::fs::canonicalize(root)
        .with_context(|| format!("Failed to canonicalize root path: {}", root.display()))?;

    let cluster = cfg.cluster.instance_set()?;
    let instances: Vec<ServerInstance> = if opts.all {
        cluster.iter().collect()
    } else {
        let inst = cluster.get(opts.instance).with_context(|| {
            format!(
                "instance {} is outside the configured cluster of {}",
                opts.instance,
                cluster.len()
            )
        })?;
        vec![inst]
    };

    println!("Starting w24 daemon:");
    println!("  Root: {}", canonical_root.display());
    println!("  Workspace: {}", cfg.server.workspace.display());
    let depths = cfg.server.archive_depth;
    println!(
        "  Archive depth: w24fz={} w24ft={} w24fdb={} w24fda={}",
        depths.size_range, depths.extensions, depths.modified_before, depths.modified_after
    );
    for inst in &instances {
        println!("  Instance: {} on {}:{}", inst.role, cfg.server.bind, inst.port);
    }

    if cfg.server.bind == "0.0.0.0" {
        eprintln!("WARNING: Binding to 0.0.0.0 exposes the daemon on all network interfaces");
        eprintln!("   The protocol is unencrypted and unauthenticated");
        eprintln!("   Only use on trusted networks (LAN)");
        eprintln!();
    }

    let logger: Arc<dyn Logger> = match cfg.server.log_file {
        Some(ref path) => {
            println!("  Log: {}", path.display());
            Arc::new(
                TextLogger::new(path)
                    .with_context(|| format!("open log file {}", path.display()))?,
            )
        }
        None => Arc::new(ConsoleLogger),
    };
    let backend: Arc<dyn Backend> =
        Arc::new(FsBackend::new(&canonical_root, cfg.server.archive_depth)?);

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    rt.block_on(async move {
        let mut listeners = JoinSet::new();
        for inst in instances {
            let ctx = ServerContext {
                instance: inst,
                backend: Arc::clone(&backend),
                workspace_root: cfg.server.workspace.join(inst.role.to_string()),
                logger: Arc::clone(&logger),
            };
            let bind = cfg.server.bind.clone();
            listeners.spawn(async move { serve(&bind, ctx).await });
        }

        // Listeners only return on failure; the first one takes the process down.
        match listeners.join_next().await {
            Some(Ok(res)) => res,
            Some(Err(e)) => Err(anyhow::anyhow!("listener task failed: {}", e)),
            None => Ok(()),
        }
    })
}

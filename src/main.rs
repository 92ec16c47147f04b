//! w24c - interactive client for a w24 server cluster
//!
//! Each invocation bumps the persisted session counter, picks the instance
//! it maps to, and keeps one connection open until `quitc`, end of input or
//! Ctrl-C.

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::BufReader;

use w24fs::cli::ClientOpts;
use w24fs::config::Config;
use w24fs::counter::{CounterStore, FileCounterStore};
use w24fs::net_async::client::{connect, run_interactive, Session};

const EXIT_INTERRUPTED: i32 = 130;

fn main() -> Result<()> {
    let opts = ClientOpts::parse();

    let mut cfg = Config::load(opts.config.as_deref())?;
    opts.apply(&mut cfg);
    cfg.validate()?;

    let counter = FileCounterStore::new(&cfg.client.counter_file);
    if opts.reset {
        counter.reset()?;
        println!("Client counter has been reset.");
        return Ok(());
    }

    let count = counter.increment()?;
    let instances = cfg.cluster.instance_set()?;
    let target = instances.select(count);

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    let outcome = rt.block_on(async {
        let stream = connect(&opts.server_ip, target.port).await?;
        println!(
            "Connected to {} on port {} ({}). Type your commands below.",
            opts.server_ip, target.port, target.role
        );
        let mut session =
            Session::new(stream, &cfg.client.download_dir).with_progress(cfg.client.show_progress);
        let stdin = BufReader::new(tokio::io::stdin());

        tokio::select! {
            res = run_interactive(&mut session, stdin) => res.map(|_| None),
            _ = tokio::signal::ctrl_c() => {
                println!("\nInterrupt signal received. Exiting...");
                Ok(Some(EXIT_INTERRUPTED))
            }
        }
    });

    // stdin reads run on the blocking pool and cannot be cancelled; do not
    // wait for them.
    rt.shutdown_background();
    match outcome? {
        Some(code) => std::process::exit(code),
        None => Ok(()),
    }
}

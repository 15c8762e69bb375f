use anyhow::{Context, Result};
use clap::Parser;

use ldapflow::cli::{init_tracing, DaemonOpts};
use ldapflow::server::{InMemoryDirectoryServer, ServerSettings};

fn main() -> Result<()> {
    let opts = DaemonOpts::parse();
    init_tracing(opts.verbose);

    let mut settings = match &opts.config {
        Some(path) => ServerSettings::load(path)?,
        None => ServerSettings::default(),
    };
    if let Some(bind) = &opts.bind {
        settings.bind = bind.clone();
    }
    if let Some(data) = &opts.data {
        settings.data_file = Some(data.clone());
    }
    if !opts.base_dns.is_empty() {
        settings.base_dns = opts.base_dns.clone();
    }
    if let Some(limit) = opts.max_size_limit {
        settings.max_size_limit = limit;
    }
    if let Some(data) = &settings.data_file {
        if !data.is_file() {
            anyhow::bail!("Error: data file does not exist: {}", data.display());
        }
    }

    let server = InMemoryDirectoryServer::from_settings(&settings)?;
    println!("Starting in-memory directory:");
    println!("  Bind: {}", settings.bind);
    println!("  Base DNs: {}", settings.base_dns.join("; "));
    println!("  Entries: {}", server.directory().len());

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    rt.block_on(async {
        tokio::select! {
            r = server.serve(&settings.bind) => r,
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\nInterrupted by user. Exiting (Ctrl-C)...");
                Ok(())
            }
        }
    })
}

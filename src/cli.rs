//! Shared CLI helpers and small reusable Clap fragments

use clap::{Args, Parser};
use std::path::PathBuf;

use crate::search::SearchScope;

/// Options of the in-memory directory daemon
#[derive(Clone, Debug, Parser)]
#[command(author, version, about = "In-memory LDAP directory server")]
pub struct DaemonOpts {
    /// Bind address (host:port); overrides the config file
    #[arg(long)]
    pub bind: Option<String>,

    /// Server settings (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Entries to serve (JSON lines); overrides the config file
    #[arg(long)]
    pub data: Option<PathBuf>,

    /// Naming contexts served (repeatable); overrides the config file
    #[arg(long = "base-dn")]
    pub base_dns: Vec<String>,

    /// Server-side size limit (0 = none)
    #[arg(long)]
    pub max_size_limit: Option<i32>,

    /// Debug-level logging
    #[arg(short, long)]
    pub verbose: bool,
}

/// Where and how to connect
#[derive(Clone, Debug, Args)]
pub struct ConnectOpts {
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    #[arg(long, default_value_t = crate::protocol::DEFAULT_LDAP_PORT)]
    pub port: u16,

    /// Connection options (TOML); flags below override it
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Read responses on the calling thread instead of a reader thread
    #[arg(long)]
    pub sync: bool,

    /// Response timeout in ms (0 = wait forever)
    #[arg(long = "timeout-ms")]
    pub timeout_ms: Option<u64>,

    /// Write an operation log to this file
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// Print connection statistics as JSON when done
    #[arg(long)]
    pub stats: bool,
}

/// Search parameters
#[derive(Clone, Debug, Args)]
pub struct SearchOpts {
    #[arg(long = "base")]
    pub base_dn: String,

    /// base, one, sub or subordinates
    #[arg(long, default_value = "sub")]
    pub scope: SearchScope,

    #[arg(long = "size-limit", default_value_t = 0)]
    pub size_limit: i64,

    /// Server-side time limit in seconds
    #[arg(long = "time-limit", default_value_t = 0)]
    pub time_limit: i64,

    #[arg(long = "types-only")]
    pub types_only: bool,

    #[arg(long = "follow-referrals")]
    pub follow_referrals: bool,

    #[arg(long = "hop-limit")]
    pub hop_limit: Option<u32>,

    /// Print entries as they arrive instead of after the search completes
    #[arg(long)]
    pub stream: bool,

    /// Append returned entries to this JSON-lines file
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// RFC 4515 filter
    pub filter: String,

    /// Attributes to return (default: all user attributes)
    pub attributes: Vec<String>,
}

/// Install the `tracing` subscriber for a binary. `RUST_LOG` wins over `verbose`.
pub fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

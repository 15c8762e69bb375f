//! ldapflow - search and "Who am I?" against an LDAP server from the command line

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use parking_lot::Mutex;
use std::io::{self, Write};
use std::sync::Arc;

use ldapflow::cli::{init_tracing, ConnectOpts, SearchOpts};
use ldapflow::connection::LdapConnection;
use ldapflow::entry::Entry;
use ldapflow::filter::Filter;
use ldapflow::fixture::EntryFile;
use ldapflow::logger::TextLogger;
use ldapflow::options::ConnectionOptions;
use ldapflow::search::{SearchRequest, SearchResultEntry, SearchResultListener, SearchResultReference};
use ldapflow::transport::Transport;

#[derive(Parser, Debug)]
#[command(author, version, about = "Run LDAP searches with referral following and streaming")]
struct Cli {
    /// Debug-level logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Search the directory
    Search {
        #[command(flatten)]
        connect: ConnectOpts,
        #[command(flatten)]
        search: SearchOpts,
    },
    /// Ask the server which identity this connection has
    Whoami {
        #[command(flatten)]
        connect: ConnectOpts,
    },
}

fn write_entry(out: &mut impl Write, entry: &Entry) -> io::Result<()> {
    writeln!(out, "dn: {}", entry.dn)?;
    for attribute in &entry.attributes {
        if attribute.value_count() == 0 {
            writeln!(out, "{}:", attribute.name)?;
        }
        for value in &attribute.values {
            writeln!(out, "{}: {}", attribute.name, value)?;
        }
        for value in &attribute.binary_values {
            writeln!(out, "{}:: {}", attribute.name, STANDARD.encode(value))?;
        }
    }
    writeln!(out)
}

fn write_reference(out: &mut impl Write, reference: &SearchResultReference) -> io::Result<()> {
    writeln!(out, "# reference: {}", reference.urls.join(" "))?;
    writeln!(out)
}

/// Prints units the moment they arrive.
struct PrintingListener {
    out: Mutex<io::Stdout>,
}

impl SearchResultListener for PrintingListener {
    fn search_entry_returned(&self, entry: SearchResultEntry) {
        let _ = write_entry(&mut *self.out.lock(), &entry.entry);
    }

    fn search_reference_returned(&self, reference: SearchResultReference) {
        let _ = write_reference(&mut *self.out.lock(), &reference);
    }
}

fn connection_options(connect: &ConnectOpts) -> Result<ConnectionOptions> {
    let mut options = match &connect.config {
        Some(path) => ConnectionOptions::load(path)?,
        None => ConnectionOptions::default(),
    };
    if connect.sync {
        options.use_synchronous_mode = true;
    }
    if let Some(timeout) = connect.timeout_ms {
        options.response_timeout_ms = timeout;
    }
    if let Some(path) = &connect.log_file {
        options.logger = Some(Arc::new(TextLogger::new(path)?));
    }
    Ok(options)
}

fn connect(connect: &ConnectOpts, options: ConnectionOptions) -> Result<LdapConnection> {
    LdapConnection::connect(&connect.host, connect.port, options)
        .with_context(|| format!("Failed to connect to {}:{}", connect.host, connect.port))
}

fn print_stats(conn: &LdapConnection) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&conn.statistics().snapshot())?);
    Ok(())
}

fn run_search(connect_opts: &ConnectOpts, search: &SearchOpts) -> Result<()> {
    let mut options = connection_options(connect_opts)?;
    if search.follow_referrals {
        options.follow_referrals = true;
    }
    if let Some(limit) = search.hop_limit {
        options.referral_hop_limit = limit;
    }
    let conn = connect(connect_opts, options)?;

    let filter = Filter::parse(&search.filter)
        .with_context(|| format!("Invalid filter {}", search.filter))?;
    let mut request = if search.stream {
        let listener = Arc::new(PrintingListener {
            out: Mutex::new(io::stdout()),
        });
        SearchRequest::with_listener(listener, search.base_dn.clone(), search.scope, filter)
    } else {
        SearchRequest::new(search.base_dn.clone(), search.scope, filter)
    };
    request.set_size_limit(search.size_limit);
    request.set_time_limit_seconds(search.time_limit);
    request.set_types_only(search.types_only);
    if !search.attributes.is_empty() {
        request.set_attributes(Some(search.attributes.clone()));
    }

    let result = conn.process_search(&request)?;
    if !search.stream {
        let mut out = io::stdout().lock();
        for entry in result.search_entries().unwrap_or_default() {
            write_entry(&mut out, &entry.entry)?;
        }
        for reference in result.search_references().unwrap_or_default() {
            write_reference(&mut out, reference)?;
        }
    }
    if let Some(path) = &search.output {
        let written = EntryFile::new(path).export_result(&result)?;
        eprintln!("wrote {} entries to {}", written, path.display());
    }
    eprintln!("# {result}");
    if connect_opts.stats {
        print_stats(&conn)?;
    }
    result.into_result()?;
    Ok(())
}

fn run_whoami(connect_opts: &ConnectOpts) -> Result<()> {
    let conn = connect(connect_opts, connection_options(connect_opts)?)?;
    let identity = conn.who_am_i()?;
    if identity.is_empty() {
        println!("anonymous");
    } else {
        println!("{identity}");
    }
    if connect_opts.stats {
        print_stats(&conn)?;
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match &cli.command {
        Command::Search { connect, search } => run_search(connect, search),
        Command::Whoami { connect } => run_whoami(connect),
    }
}

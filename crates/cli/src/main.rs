//! # CLI - table store shell
//!
//! A REPL over a [`TableStore`]. Reads commands from stdin, runs them, and
//! prints results to stdout, so it works both interactively and with piped
//! scripts. Logs go to stderr.
//!
//! ## Commands
//!
//! ```text
//! TABLES                    List live tables with their IDs
//! CREATE table              Create a table (no-op if it exists)
//! DROP table                Drop a table and erase its data
//! PUT table key value       Insert or update a key
//! PUTTTL table key secs v   Insert a key that expires after `secs` seconds
//! GET table key             Look up a key (prints value or "(nil)")
//! DEL table key             Delete a key
//! SCAN table [prefix]       List keys of a table, optionally by prefix
//! EXPIRE                    Run one expiry sweep now
//! STATS                     Print store and metrics info
//! EXIT / QUIT               Shut down gracefully
//! ```
//!
//! ## Configuration
//!
//! ```text
//! TABLESTORE_TYPE          disk | map             (default: disk)
//! TABLESTORE_PATH          data directory         (default: data/tablestore)
//! TABLESTORE_WAL_SYNC      fsync every write      (default: true)
//! TABLESTORE_COMPACT_KB    WAL compaction size    (default: 4096)
//! TABLESTORE_GC_PERIOD_MS  sweep period, 0 = off  (default: 5000)
//! TABLESTORE_GC_BATCH      deletes per batch      (default: 1024)
//! TABLESTORE_TABLES        comma-separated schema; tables not listed are dropped
//! RUST_LOG                 log filter             (default: warn)
//! ```

use std::io::{self, BufRead, Write};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use config::Config;
use kvstore::{collect_entries, Store};
use tablestore::TableStore;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let config = Config::from_env();
    let mut store = match std::env::var("TABLESTORE_TABLES") {
        Ok(list) => {
            let tables: Vec<&str> = list
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .collect();
            TableStore::start(&config, &tables)
        }
        Err(_) => TableStore::load(&config),
    }
    .with_context(|| format!("failed to open table store at {}", config.path.display()))?;
    info!(
        path = %config.path.display(),
        tables = store.table_count(),
        "shell started"
    );

    println!(
        "tablestore started (type={:?}, path={}, tables={}, gc_period={}ms)",
        config.store_type,
        config.path.display(),
        store.table_count(),
        config.gc_period.as_millis()
    );
    println!("Commands: TABLES | CREATE t | DROP t | PUT t k v | PUTTTL t k secs v");
    println!("          GET t k | DEL t k | SCAN t [prefix] | EXPIRE | STATS | EXIT");
    print!("> ");
    io::stdout().flush().ok();

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "failed to read command, exiting");
                break;
            }
        };
        if !execute(&mut store, &line, &mut stdout)? {
            break;
        }
        print!("> ");
        stdout.flush().ok();
    }

    info!("shell exiting");
    store.shutdown().context("failed to shut down table store")?;
    Ok(())
}

/// Runs one command line. Returns `false` once the shell should exit.
fn execute<W: Write>(store: &mut TableStore, line: &str, out: &mut W) -> io::Result<bool> {
    let mut parts = line.split_whitespace();
    let Some(cmd) = parts.next() else {
        return Ok(true);
    };

    match cmd.to_uppercase().as_str() {
        "TABLES" => {
            let tables = store.get_tables();
            if tables.is_empty() {
                writeln!(out, "(none)")?;
            }
            for t in &tables {
                writeln!(out, "{} (id {})", t.name(), t.id())?;
            }
        }
        "CREATE" => match parts.next() {
            Some(name) => match store.get_or_create_table(name) {
                Ok(t) => writeln!(out, "OK (id {})", t.id())?,
                Err(e) => writeln!(out, "ERR create failed: {}", e)?,
            },
            None => writeln!(out, "ERR usage: CREATE table")?,
        },
        "DROP" => match parts.next() {
            Some(name) => match store.drop_table(name) {
                Ok(()) => writeln!(out, "OK")?,
                Err(e) => writeln!(out, "ERR drop failed: {}", e)?,
            },
            None => writeln!(out, "ERR usage: DROP table")?,
        },
        "PUT" => {
            let (table, key) = (parts.next(), parts.next());
            let value = parts.collect::<Vec<&str>>().join(" ");
            match (table, key) {
                (Some(t), Some(k)) if !value.is_empty() => {
                    match store.get_table(t).and_then(|t| t.put(k.as_bytes(), value.as_bytes())) {
                        Ok(()) => writeln!(out, "OK")?,
                        Err(e) => writeln!(out, "ERR put failed: {}", e)?,
                    }
                }
                _ => writeln!(out, "ERR usage: PUT table key value")?,
            }
        }
        "PUTTTL" => {
            let (table, key, secs) = (parts.next(), parts.next(), parts.next());
            let value = parts.collect::<Vec<&str>>().join(" ");
            let secs = secs.and_then(|s| s.parse::<u64>().ok());
            match (table, key, secs) {
                (Some(t), Some(k), Some(secs)) if !value.is_empty() => {
                    let ttl = Duration::from_secs(secs);
                    match store
                        .get_table(t)
                        .and_then(|t| t.put_with_ttl(k.as_bytes(), value.as_bytes(), ttl))
                    {
                        Ok(()) => writeln!(out, "OK")?,
                        Err(e) => writeln!(out, "ERR put failed: {}", e)?,
                    }
                }
                _ => writeln!(out, "ERR usage: PUTTTL table key secs value")?,
            }
        }
        "GET" => match (parts.next(), parts.next()) {
            (Some(t), Some(k)) => match store.get_table(t).and_then(|t| t.get(k.as_bytes())) {
                Ok(v) => writeln!(out, "{}", String::from_utf8_lossy(&v))?,
                Err(e) if e.is_not_found() => writeln!(out, "(nil)")?,
                Err(e) => writeln!(out, "ERR read failed: {}", e)?,
            },
            _ => writeln!(out, "ERR usage: GET table key")?,
        },
        "DEL" => match (parts.next(), parts.next()) {
            (Some(t), Some(k)) => match store.get_table(t).and_then(|t| t.delete(k.as_bytes())) {
                Ok(()) => writeln!(out, "OK")?,
                Err(e) => writeln!(out, "ERR del failed: {}", e)?,
            },
            _ => writeln!(out, "ERR usage: DEL table key")?,
        },
        "SCAN" => match parts.next() {
            Some(t) => {
                let prefix = parts.next().unwrap_or("").as_bytes();
                let entries = store
                    .get_table(t)
                    .and_then(|t| t.new_iterator(prefix))
                    .and_then(collect_entries);
                match entries {
                    Ok(entries) if entries.is_empty() => writeln!(out, "(empty)")?,
                    Ok(entries) => {
                        for (k, v) in &entries {
                            writeln!(
                                out,
                                "{} -> {}",
                                String::from_utf8_lossy(k),
                                String::from_utf8_lossy(v)
                            )?;
                        }
                        writeln!(out, "({} entries)", entries.len())?;
                    }
                    Err(e) => writeln!(out, "ERR scan failed: {}", e)?,
                }
            }
            None => writeln!(out, "ERR usage: SCAN table [prefix]")?,
        },
        "EXPIRE" => {
            let batch = store.options().gc_batch_size;
            match store.expire_keys(SystemTime::now(), batch) {
                Ok(n) => writeln!(out, "OK ({} expired)", n)?,
                Err(e) => writeln!(out, "ERR expire failed: {}", e)?,
            }
        }
        "STATS" => {
            writeln!(out, "{:?}", store)?;
            if let Some(metrics) = store.metrics() {
                writeln!(out, "{:?}", metrics.snapshot())?;
            }
        }
        "EXIT" | "QUIT" => {
            writeln!(out, "bye")?;
            return Ok(false);
        }
        other => writeln!(out, "unknown command: {}", other)?,
    }
    Ok(true)
}

//! # shardkv - ShardKV interactive shell
//!
//! Opens (or creates) a store, optionally serves the binary wire protocol on
//! a TCP port, and reads shell commands from stdin. See [`cli::shell`] for
//! the command list.
//!
//! ## Configuration
//!
//! ```text
//! SHARDKV_DIR                store directory               (default: "data")
//! SHARDKV_PARTS              parts on first run            (default: 8)
//! SHARDKV_BLOCKS             blocks per part on first run  (default: 8)
//! SHARDKV_COUNT              sets both counts when those are unset
//! SHARDKV_PERSIST            write manifest + block files  (default: "true")
//! SHARDKV_WRITE_PERIOD_SECS  write-back interval           (default: 10)
//! SHARDKV_LISTEN             host:port for the wire listener (default: off)
//! SHARDKV_LOG                error|warn|info|debug|trace   (default: info)
//! ```
//!
//! Logs go to stderr so piped stdout only carries command output.
//!
//! ## Example
//!
//! ```text
//! $ SHARDKV_DIR=/tmp/kv cargo run -p cli
//! ShardKV started (dir=/tmp/kv, parts=8, blocks=64, persist=true, listen=off)
//! > SET name Alice
//! OK
//! > GET name
//! Alice
//! > EXIT
//! bye
//! ```

use anyhow::{Context, Result};
use cli::server::Listener;
use cli::shell;
use cli::writeback::WriteBack;
use config::StoreConfig;
use std::io::{self, Write};
use std::str::FromStr;
use std::sync::Arc;
use store::Store;
use tracing::{info, Level};

/// Reads a configuration value from the environment, falling back to `default`.
fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn init_logging() -> Result<()> {
    let raw = env_or("SHARDKV_LOG", "info");
    let level = Level::from_str(&raw)
        .map_err(|_| anyhow::anyhow!("SHARDKV_LOG: expected error|warn|info|debug|trace, got {raw:?}"))?;
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(io::stderr)
        .init();
    Ok(())
}

fn main() -> Result<()> {
    init_logging()?;

    let cfg = StoreConfig::from_env()?;
    let store = Arc::new(
        Store::open(&cfg).with_context(|| format!("failed to open store at {}", cfg.dir.display()))?,
    );

    let listen = std::env::var("SHARDKV_LISTEN").ok().filter(|s| !s.is_empty());
    let listener = match &listen {
        Some(addr) => Some(Listener::bind(addr.as_str(), Arc::clone(&store))?),
        None => None,
    };

    let writeback = if cfg.persist {
        Some(WriteBack::spawn(Arc::clone(&store), cfg.write_period)?)
    } else {
        None
    };

    println!(
        "ShardKV started (dir={}, parts={}, blocks={}, persist={}, listen={})",
        cfg.dir.display(),
        store.part_count(),
        store.block_count(),
        cfg.persist,
        listener
            .as_ref()
            .map_or_else(|| "off".to_string(), |l| l.local_addr().to_string())
    );
    println!("Commands: SET key value [ttl] | GET key | DEL key | KEYS [prefix] | COUNT [prefix]");
    println!("          ROUTE key | FLUSH | VERIFY | STATS | EXIT");

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    shell::run(&store, stdin.lock(), &mut stdout)?;
    stdout.flush().ok();

    if let Some(l) = listener {
        l.shutdown();
    }
    if let Some(wb) = writeback {
        wb.stop();
    }
    let written = store.flush()?;
    info!(blocks = written, "shutdown complete");

    Ok(())
}

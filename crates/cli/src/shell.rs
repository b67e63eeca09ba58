//! Interactive shell.
//!
//! Reads one command per line, runs it against the store and prints the
//! result. Works the same interactively and with piped input.
//!
//! ```text
//! SET key value [ttl_secs]  Insert or update a key (ttl 0 or absent = never expires)
//! GET key                   Print the value or "(nil)"
//! DEL key                   Delete a key
//! KEYS [prefix]             List live keys, sorted
//! COUNT [prefix]            Count live keys
//! ROUTE key                 Show the part and block a key maps to
//! FLUSH                     Write dirty blocks and the manifest now
//! VERIFY                    Compare blocks with the manifest on disk
//! STATS                     Print store debug info
//! EXIT / QUIT               Leave the shell
//! ```

use anyhow::Result;
use ident::fingerprint;
use std::io::{BufRead, Write};
use store::{manifest::read_manifest, unix_now, Store};

pub const PROMPT: &str = "> ";

/// Runs commands from `input` until EOF or `EXIT`.
///
/// Command failures are printed as `ERR ...` lines and do not stop the
/// shell. Only I/O errors on `input` or `out` are returned.
pub fn run<R: BufRead, W: Write>(store: &Store, input: R, out: &mut W) -> Result<()> {
    write!(out, "{PROMPT}")?;
    out.flush()?;

    for line in input.lines() {
        let line = line?;
        let mut parts = line.split_whitespace();
        if let Some(cmd) = parts.next() {
            let args: Vec<&str> = parts.collect();
            if !execute(store, &cmd.to_uppercase(), &args, out)? {
                break;
            }
        }

        write!(out, "{PROMPT}")?;
        out.flush()?;
    }

    Ok(())
}

/// Runs one command. Returns `false` when the shell should exit.
fn execute<W: Write>(store: &Store, cmd: &str, args: &[&str], out: &mut W) -> Result<bool> {
    match cmd {
        "SET" => match args {
            [key, value] => set(store, key, value, 0, out)?,
            [key, value, ttl] => match ttl.parse::<u64>() {
                Ok(ttl) => set(store, key, value, ttl, out)?,
                Err(_) => writeln!(out, "ERR ttl must be a number of seconds: {ttl}")?,
            },
            _ => writeln!(out, "ERR usage: SET key value [ttl_secs]")?,
        },
        "GET" => match args {
            [key] => match store.get(key) {
                Some(slot) => writeln!(out, "{}", String::from_utf8_lossy(&slot.value))?,
                None => writeln!(out, "(nil)")?,
            },
            _ => writeln!(out, "ERR usage: GET key")?,
        },
        "DEL" => match args {
            [key] => {
                if store.del(key) {
                    writeln!(out, "OK")?;
                } else {
                    writeln!(out, "(nil)")?;
                }
            }
            _ => writeln!(out, "ERR usage: DEL key")?,
        },
        "KEYS" => {
            let keys = store.list_keys(args.first().copied().unwrap_or(""));
            if keys.is_empty() {
                writeln!(out, "(empty)")?;
            } else {
                for k in &keys {
                    writeln!(out, "{k}")?;
                }
                writeln!(out, "({} keys)", keys.len())?;
            }
        }
        "COUNT" => {
            writeln!(out, "{}", store.count_keys(args.first().copied().unwrap_or("")))?;
        }
        "ROUTE" => match args {
            [key] => {
                let f = fingerprint(key);
                match store.closest_part(&f) {
                    Some(part) => {
                        let block = store.route(&f);
                        writeln!(
                            out,
                            "fingerprint={} part={} block={}",
                            f,
                            part.id(),
                            block.id()
                        )?;
                    }
                    None => writeln!(out, "ERR store has no parts")?,
                }
            }
            _ => writeln!(out, "ERR usage: ROUTE key")?,
        },
        "FLUSH" => match store.flush() {
            Ok(n) => writeln!(out, "OK ({} blocks written)", n)?,
            Err(e) => writeln!(out, "ERR flush failed: {:#}", e)?,
        },
        "VERIFY" => verify(store, out)?,
        "STATS" => writeln!(out, "{:?}", store)?,
        "EXIT" | "QUIT" => {
            writeln!(out, "bye")?;
            return Ok(false);
        }
        other => writeln!(out, "unknown command: {}", other)?,
    }
    Ok(true)
}

fn set<W: Write>(store: &Store, key: &str, value: &str, ttl: u64, out: &mut W) -> Result<()> {
    let expires = if ttl == 0 {
        0
    } else {
        match unix_now().checked_add(ttl) {
            Some(t) => t,
            None => {
                writeln!(out, "ERR ttl too large: {}", ttl)?;
                return Ok(());
            }
        }
    };
    match store.set(key, value.as_bytes().to_vec(), expires) {
        Ok(()) => writeln!(out, "OK")?,
        Err(e) => writeln!(out, "ERR set failed: {}", e)?,
    }
    Ok(())
}

/// Blocks changed since the last write-back show up as mismatches.
fn verify<W: Write>(store: &Store, out: &mut W) -> Result<()> {
    if !store.persist() {
        writeln!(out, "ERR persistence disabled, no manifest to verify")?;
        return Ok(());
    }
    let manifest = match read_manifest(store.dir()) {
        Ok(Some(m)) => m,
        Ok(None) => {
            writeln!(out, "ERR no manifest in {}", store.dir().display())?;
            return Ok(());
        }
        Err(e) => {
            writeln!(out, "ERR {:#}", e)?;
            return Ok(());
        }
    };

    let mismatches = store.verify(&manifest);
    if mismatches.is_empty() {
        writeln!(out, "OK ({} blocks match)", manifest.block_count())?;
    } else {
        for m in &mismatches {
            match m.actual {
                Some(actual) => writeln!(
                    out,
                    "block {} expected {} actual {}",
                    m.block_id, m.expected, actual
                )?,
                None => writeln!(out, "block {} missing", m.block_id)?,
            }
        }
        writeln!(out, "({} mismatches)", mismatches.len())?;
    }
    Ok(())
}

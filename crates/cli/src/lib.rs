//! # CLI - ShardKV front ends
//!
//! Everything that sits in front of a [`store::Store`]: the interactive
//! shell, the wire-protocol listener and the periodic write-back loop. The
//! `shardkv` binary wires them together; they live in a library so the
//! tests can drive each one against an in-memory store.
//!
//! ```text
//!   stdin ──> shell::run ──┐
//!                          ├──> Arc<Store> <── WriteBack (every write_period)
//!   TCP ──> server::dispatch┘
//! ```
//!
//! | Module        | Purpose                                             |
//! |---------------|-----------------------------------------------------|
//! | [`shell`]     | Line-oriented REPL (SET/GET/DEL/KEYS/...)           |
//! | [`server`]    | Listener, per-connection loop, request dispatch     |
//! | [`writeback`] | Background thread calling [`store::Store::flush`]   |

pub mod server;
pub mod shell;
pub mod writeback;

//! Wire-protocol listener.
//!
//! One thread per connection, all sharing the store through an `Arc`. A
//! connection reads one request, answers it, and repeats until the client
//! sends `Close`, closes its end, or sends something that cannot be framed.
//! Framing errors are never retried: the stream offset is unknown afterwards.
//!
//! ## Responses
//!
//! | Op      | Ok                              | Otherwise        |
//! |---------|---------------------------------|------------------|
//! | `Ping`  | value echoed                    |                  |
//! | `Set`   | empty                           | `Error` + reason |
//! | `Get`   | value and expiry                | `NotFound`       |
//! | `Del`   | empty                           | `NotFound`       |
//! | `Count` | 8-byte big-endian count         |                  |
//! | `List`  | one message per key, `StreamEnd`|                  |
//!
//! `Count` and `List` treat the request key as a prefix. Every response
//! echoes the request's op byte.

use anyhow::{Context, Result};
use protocol::{Message, Op, ProtocolError, Status};
use std::io::{BufReader, BufWriter, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use store::Store;
use tracing::{debug, info, warn};

/// Answers one request, writing every response message to `w`.
///
/// # Errors
///
/// Only write failures; the connection is unusable afterwards.
pub fn dispatch<W: Write>(store: &Store, req: &Message, w: &mut W) -> Result<(), ProtocolError> {
    let op = req.op;
    let Some(kind) = Op::from_u8(op) else {
        let mut resp = Message::response(op, Status::Error);
        resp.value = format!("unknown op {op}").into_bytes();
        return resp.write_to(w);
    };

    match kind {
        Op::Ping => {
            let mut resp = Message::response(op, Status::Ok);
            resp.value = req.value.clone();
            resp.write_to(w)
        }
        Op::Set => match store.set(&req.key, req.value.clone(), req.expires) {
            Ok(()) => Message::response(op, Status::Ok).write_to(w),
            Err(e) => {
                let mut resp = Message::response(op, Status::Error);
                resp.value = e.to_string().into_bytes();
                resp.write_to(w)
            }
        },
        Op::Get => match store.get(&req.key) {
            Some(slot) => {
                let mut resp = Message::response(op, Status::Ok);
                resp.key = req.key.clone();
                resp.value = slot.value;
                resp.expires = slot.expires;
                resp.write_to(w)
            }
            None => Message::response(op, Status::NotFound).write_to(w),
        },
        Op::Del => {
            let status = if store.del(&req.key) {
                Status::Ok
            } else {
                Status::NotFound
            };
            Message::response(op, status).write_to(w)
        }
        Op::Count => Message::response(op, Status::Ok)
            .with_count(store.count_keys(&req.key) as u64)
            .write_to(w),
        Op::List => {
            for key in store.list_keys(&req.key) {
                let mut resp = Message::response(op, Status::Ok);
                resp.key = key;
                resp.write_to(w)?;
            }
            Message::response(op, Status::StreamEnd).write_to(w)
        }
        // handled by the connection loop before dispatch
        Op::Close => Message::response(op, Status::Ok).write_to(w),
    }
}

/// Serves one client until it closes or misbehaves.
pub fn handle_connection(store: &Store, stream: TcpStream) -> Result<()> {
    let peer = stream.peer_addr().ok();
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut writer = BufWriter::new(stream);

    loop {
        let req = match Message::read_from(&mut reader) {
            Ok(req) => req,
            Err(ProtocolError::ConnectionClosed) => {
                debug!(?peer, "client closed connection");
                return Ok(());
            }
            Err(e) => {
                warn!(?peer, error = %e, "dropping connection after framing error");
                return Ok(());
            }
        };

        if req.op == Op::Close as u8 {
            debug!(?peer, "client sent close");
            return Ok(());
        }

        if let Err(e) = dispatch(store, &req, &mut writer) {
            warn!(?peer, error = %e, "failed to write response");
            return Ok(());
        }
    }
}

/// A bound listener accepting connections on a background thread.
pub struct Listener {
    addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Listener {
    /// Binds `addr` and starts accepting connections for `store`.
    ///
    /// Port 0 picks a free port; see [`Listener::local_addr`].
    pub fn bind<A: ToSocketAddrs + std::fmt::Debug>(addr: A, store: Arc<Store>) -> Result<Self> {
        let listener =
            TcpListener::bind(&addr).with_context(|| format!("failed to bind {:?}", addr))?;
        let addr = listener.local_addr()?;
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);

        let handle = thread::Builder::new()
            .name("shardkv-listener".into())
            .spawn(move || accept_loop(listener, store, flag))?;

        info!(%addr, "listening");
        Ok(Self {
            addr,
            shutdown,
            handle: Some(handle),
        })
    }

    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stops accepting. Connections already open run to completion.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        // wake the blocking accept
        let _ = TcpStream::connect(self.addr);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop();
        }
    }
}

fn accept_loop(listener: TcpListener, store: Arc<Store>, shutdown: Arc<AtomicBool>) {
    for conn in listener.incoming() {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        let stream = match conn {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };
        let store = Arc::clone(&store);
        let spawned = thread::Builder::new()
            .name("shardkv-conn".into())
            .spawn(move || {
                if let Err(e) = handle_connection(&store, stream) {
                    warn!(error = %e, "connection setup failed");
                }
            });
        if let Err(e) = spawned {
            warn!(error = %e, "failed to spawn connection thread");
        }
    }
    debug!("listener stopped");
}

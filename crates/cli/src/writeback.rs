//! Periodic write-back of dirty blocks.

use anyhow::Result;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use store::Store;
use tracing::{debug, warn};

/// Background thread flushing a store every `period`.
///
/// Stopping (or dropping) it wakes the thread at once; it then runs one
/// last flush before exiting.
pub struct WriteBack {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl WriteBack {
    pub fn spawn(store: Arc<Store>, period: Duration) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name("shardkv-writeback".into())
            .spawn(move || loop {
                let stopping = match rx.recv_timeout(period) {
                    Err(RecvTimeoutError::Timeout) => false,
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
                };
                match store.flush() {
                    Ok(0) => {}
                    Ok(n) => debug!(blocks = n, "periodic write-back"),
                    Err(e) => warn!(error = %e, "periodic write-back failed"),
                }
                if stopping {
                    break;
                }
            })?;

        Ok(Self {
            stop: Some(tx),
            handle: Some(handle),
        })
    }

    /// Runs a final flush and waits for the thread to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(tx) = self.stop.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for WriteBack {
    fn drop(&mut self) {
        self.shutdown();
    }
}

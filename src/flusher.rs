//! Background flusher
//!
//! Periodically flushes every open region of a shared storage, so deferred
//! writes (`sync_writes = false`) reach disk without waiting for close.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Sender};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::storage::RegionStorage;

/// Handle to the flusher thread; stops it on `shutdown` or drop
pub struct BackgroundFlusher {
    shutdown_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl BackgroundFlusher {
    /// Start flushing every `config.flush_interval`
    pub fn spawn(storage: Arc<RegionStorage>) -> Result<Self> {
        let interval = storage.config().flush_interval;
        Self::spawn_with_interval(storage, interval)
    }

    pub fn spawn_with_interval(storage: Arc<RegionStorage>, interval: Duration) -> Result<Self> {
        let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(1);

        let thread = thread::Builder::new()
            .name("region-flusher".to_string())
            .spawn(move || {
                let ticker = channel::tick(interval);
                loop {
                    crossbeam::select! {
                        recv(ticker) -> _ => {
                            if let Err(e) = storage.flush() {
                                warn!(error = %e, "periodic region flush failed");
                            }
                        }
                        recv(shutdown_rx) -> _ => break,
                    }
                }
                // Final pass so nothing written before shutdown is left behind
                if let Err(e) = storage.flush() {
                    warn!(error = %e, "final region flush failed");
                }
                debug!("region flusher stopped");
            })?;

        info!(interval_ms = interval.as_millis() as u64, "started region flusher");

        Ok(Self {
            shutdown_tx: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    /// Stop the thread after a final flush and wait for it
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        // Dropping the sender disconnects the channel and wakes the thread
        self.shutdown_tx.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("region flusher thread panicked");
            }
        }
    }
}

impl Drop for BackgroundFlusher {
    fn drop(&mut self) {
        self.stop();
    }
}

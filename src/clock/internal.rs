//! Free-running internal source
//!
//! The frame counter is derived from `Instant` at read time; the ticker
//! thread only publishes it to subscribers and slaves.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::clock::broadcast::Broadcaster;
use crate::clock::source::SourceGuard;
use crate::clock::ClockShared;
use crate::config::BroadcastConfig;
use crate::error::ClockError;

pub(crate) struct InternalSource {
    shared: Arc<ClockShared>,
    broadcast: BroadcastConfig,
    worker: Option<(Sender<()>, JoinHandle<()>)>,
}

impl InternalSource {
    pub fn new(shared: Arc<ClockShared>, broadcast: BroadcastConfig) -> Self {
        Self { shared, broadcast, worker: None }
    }

    pub fn start(&mut self) -> Result<(), ClockError> {
        if self.worker.is_some() {
            return Ok(());
        }

        let guard = SourceGuard::new(&self.shared);
        let broadcaster = if self.broadcast.enabled {
            Some(Broadcaster::bind(self.broadcast.address)?)
        } else {
            None
        };
        let interval = Duration::from_millis(self.broadcast.interval_ms.max(1));

        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let shared = self.shared.clone();
        let handle = thread::Builder::new()
            .name("clock-ticker".into())
            .spawn(move || {
                let _guard = guard;
                if let Some(b) = &broadcaster {
                    debug!(target_addr = %b.target(), ?interval, "time broadcast started");
                }
                loop {
                    shared.publish_internal();
                    if let Some(b) = &broadcaster {
                        if let Err(err) = b.send(&shared.sync_datagram()) {
                            warn!(%err, "time broadcast send failed");
                        }
                    }
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })
            .map_err(ClockError::Spawn)?;

        self.worker = Some((stop_tx, handle));
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some((stop_tx, handle)) = self.worker.take() {
            let _ = stop_tx.send(());
            if handle.join().is_err() {
                error!("clock ticker thread panicked");
            }
            // leave the last internal position behind for whoever takes over
            self.shared.publish_internal();
        }
    }
}

impl Drop for InternalSource {
    fn drop(&mut self) {
        self.stop();
    }
}

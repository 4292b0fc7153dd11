//! Change queue worker
//!
//! A single spawned task owns the drain state. Writers append a queue entry
//! inside their transaction and then call [`ChangeQueue::trigger`], which only
//! bumps a generation counter and sends a non-blocking signal. The worker:
//!
//! - drains every pending entry, one transaction per entry
//! - runs one trailing pass when a trigger arrived while it was draining
//! - publishes the generation it observed before the pass once the pass ends
//! - falls back to polling at `poll_interval` while idle or after a failure
//!
//! [`ChangeQueue::settled`] waits until the published generation covers every
//! trigger issued before the call.

pub mod materialize;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::QueueConfig;
use crate::database::{Database, codec};
use crate::error::{LixError, Result};
use crate::plugin::PluginRegistry;

pub use materialize::MaterializeStats;

/// Handle to the queue worker of one lix
pub struct ChangeQueue {
    trigger_tx: mpsc::Sender<()>,
    requested: Arc<AtomicU64>,
    settled_rx: watch::Receiver<u64>,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ChangeQueue {
    /// Spawn the worker. Entries already persisted in the store are drained right away.
    pub fn spawn(db: Arc<Database>, plugins: Arc<PluginRegistry>, config: &QueueConfig) -> Self {
        let (trigger_tx, trigger_rx) = mpsc::channel(config.trigger_capacity.max(1));
        // Generation 1 stands for the startup drain
        let requested = Arc::new(AtomicU64::new(1));
        let (settled_tx, settled_rx) = watch::channel(0);
        let cancel = CancellationToken::new();

        let worker = Worker {
            db,
            plugins,
            trigger_rx,
            requested: requested.clone(),
            settled_tx,
            cancel: cancel.clone(),
            poll_interval: config.poll_interval,
        };
        let handle = tokio::spawn(worker.run());

        Self {
            trigger_tx,
            requested,
            settled_rx,
            cancel,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Signal that new entries were enqueued
    pub fn trigger(&self) {
        self.requested.fetch_add(1, Ordering::SeqCst);
        match self.trigger_tx.try_send(()) {
            // A pending signal already covers this trigger
            Ok(()) | Err(mpsc::error::TrySendError::Full(())) => {}
            Err(mpsc::error::TrySendError::Closed(())) => {
                tracing::warn!("Change queue worker stopped, trigger dropped");
            }
        }
    }

    /// Wait until every entry enqueued before this call has been drained.
    ///
    /// # Errors
    ///
    /// Returns [`LixError::QueueStopped`] if the worker exits first.
    pub async fn settled(&self) -> Result<()> {
        let target = self.requested.load(Ordering::SeqCst);
        let mut rx = self.settled_rx.clone();
        rx.wait_for(|done| *done >= target)
            .await
            .map(|_| ())
            .map_err(|_| LixError::QueueStopped)
    }

    /// Stop the worker and wait for the current pass to finish
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.lock().await.take() {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Change queue worker panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && !self.trigger_tx.is_closed()
    }
}

impl Drop for ChangeQueue {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Worker states. `more_work` is set when a trigger arrives during a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DrainState {
    Idle,
    Draining { batch: u64, more_work: bool },
}

struct Worker {
    db: Arc<Database>,
    plugins: Arc<PluginRegistry>,
    trigger_rx: mpsc::Receiver<()>,
    requested: Arc<AtomicU64>,
    settled_tx: watch::Sender<u64>,
    cancel: CancellationToken,
    poll_interval: Duration,
}

impl Worker {
    async fn run(mut self) {
        let mut batch = 1;
        let mut state = DrainState::Draining {
            batch,
            more_work: false,
        };

        loop {
            state = match state {
                DrainState::Idle => {
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        signal = self.trigger_rx.recv() => {
                            if signal.is_none() {
                                break;
                            }
                            batch += 1;
                            DrainState::Draining { batch, more_work: false }
                        }
                        _ = tokio::time::sleep(self.poll_interval) => {
                            batch += 1;
                            DrainState::Draining { batch, more_work: false }
                        }
                    }
                }
                DrainState::Draining { batch: current, more_work } => {
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    self.drain_batch(current, more_work).await
                }
            };
        }

        tracing::debug!("Change queue worker stopped");
    }

    /// One pass plus the transition it implies
    async fn drain_batch(&mut self, batch: u64, trailing: bool) -> DrainState {
        let observed = self.requested.load(Ordering::SeqCst);

        match self.drain_pass().await {
            Ok(stats) => {
                if stats.entries > 0 {
                    tracing::info!(
                        batch,
                        trailing,
                        entries = stats.entries,
                        inserted = stats.changes.inserted,
                        updated = stats.changes.updated,
                        collapsed = stats.changes.collapsed,
                        "Drained change queue"
                    );
                }
                self.settled_tx.send_replace(observed);

                // A trigger that raced the end of the pass forces one more pass
                if self.trigger_rx.try_recv().is_ok() {
                    DrainState::Draining {
                        batch,
                        more_work: true,
                    }
                } else {
                    DrainState::Idle
                }
            }
            Err(e) => {
                // The entry stays queued and is retried on the next poll
                tracing::error!(batch, error = %e, "Change queue iteration failed");
                self.settled_tx.send_replace(observed);
                DrainState::Idle
            }
        }
    }

    async fn drain_pass(&self) -> Result<PassStats> {
        let mut stats = PassStats::default();
        loop {
            let plugins = self.plugins.clone();
            let processed = self
                .db
                .transaction(move |tx| {
                    let Some(entry) = codec::next_queue_entry(tx)? else {
                        return Ok(None);
                    };
                    let changes = materialize::process_entry(tx, &plugins, &entry)?;
                    tracing::debug!(
                        entry = entry.id,
                        file_id = %entry.file_id,
                        path = %entry.path,
                        "Materialized queue entry"
                    );
                    Ok(Some(changes))
                })
                .await?;

            match processed {
                Some(changes) => {
                    stats.entries += 1;
                    stats.changes.inserted += changes.inserted;
                    stats.changes.updated += changes.updated;
                    stats.changes.collapsed += changes.collapsed;
                }
                None => return Ok(stats),
            }
        }
    }
}

#[derive(Debug, Default)]
struct PassStats {
    entries: usize,
    changes: MaterializeStats,
}

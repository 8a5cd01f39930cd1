// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Grouped-fsync durable append path (original spec §4.2). Writes land on
//! the file immediately; whether (and when) the caller is told the bytes
//! are durable depends on the configured [`FsyncMode`].
//!
//! The source this was modeled on deliberately under-counts the promise
//! queue while a fsync is in flight — new arrivals during the syscall are
//! serviced by the next tick, never by the one in progress. `fsync()`
//! below preserves that: it snapshots `completed` before calling `force`
//! and never resolves more than that many promises.

use std::{
    collections::VecDeque,
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::{
    sync::{Mutex, oneshot},
    task::JoinHandle,
    time::{Instant, sleep},
};
use tracing::{debug, warn};

use crate::storage::{Histogram, StorageError};

/// Which fsync policy a [`PeriodicSyncStorage`] runs under, derived from a
/// configured period.
#[derive(Debug, Clone, Copy)]
pub enum FsyncMode {
    /// `period == 0`: every write is followed by an immediate fsync.
    Synchronous,
    /// `period == ∞`: writes resolve immediately; durability is not
    /// guaranteed.
    Never,
    /// `0 < period < ∞`: writes enqueue and are resolved in batches no
    /// more often than every `period`.
    Grouped(Duration),
}

impl FsyncMode {
    pub fn from_period(period: Option<Duration>) -> Self {
        match period {
            None => FsyncMode::Never,
            Some(d) if d.is_zero() => FsyncMode::Synchronous,
            Some(d) => FsyncMode::Grouped(d),
        }
    }
}

/// The durable sink `PeriodicSyncStorage` appends to. `sync_data` takes
/// `&self` (like `tokio::fs::File`'s own inherent method) so a fsync can
/// run concurrently with a write against an independently-cloned handle.
pub trait SyncFile: Send + Sync + Sized + 'static {
    fn write_all<'a>(
        &'a mut self,
        buf: &'a [u8],
    ) -> impl Future<Output = io::Result<()>> + Send + 'a;

    fn sync_data(&self) -> impl Future<Output = io::Result<()>> + Send;

    fn try_clone(&self) -> impl Future<Output = io::Result<Self>> + Send;
}

impl SyncFile for tokio::fs::File {
    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        use tokio::io::AsyncWriteExt;
        AsyncWriteExt::write_all(self, buf).await
    }

    async fn sync_data(&self) -> io::Result<()> {
        tokio::fs::File::sync_data(self).await
    }

    async fn try_clone(&self) -> io::Result<Self> {
        tokio::fs::File::try_clone(self).await
    }
}

struct TimestampedPromise {
    tx: oneshot::Sender<Result<(), StorageError>>,
    enqueued_at: Instant,
}

/// Counters and latency samples for the durable write path.
#[derive(Debug, Default)]
pub struct StorageMetrics {
    pub fsync_count: AtomicU64,
    pub fsync_error_count: AtomicU64,
    pub fsync_duration_usec: Histogram,
    pub fsync_lag_usec: Histogram,
}

/// Durable append-to-file path with three fsync modes and per-write
/// completion futures.
pub struct PeriodicSyncStorage<F: SyncFile> {
    mode: FsyncMode,
    write_file: Mutex<F>,
    fsync_file: F,
    queue: Mutex<VecDeque<TimestampedPromise>>,
    fsync_lock: Mutex<()>,
    task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    pub metrics: Arc<StorageMetrics>,
}

impl<F: SyncFile> PeriodicSyncStorage<F> {
    pub async fn new(file: F, mode: FsyncMode) -> io::Result<Arc<Self>> {
        let fsync_file = file.try_clone().await?;
        Ok(Arc::new(Self {
            mode,
            write_file: Mutex::new(file),
            fsync_file,
            queue: Mutex::new(VecDeque::new()),
            fsync_lock: Mutex::new(()),
            task: Mutex::new(None),
            closed: AtomicBool::new(false),
            metrics: Arc::new(StorageMetrics::default()),
        }))
    }

    /// Writes `buf` in full, then dispatches on the configured fsync mode.
    /// In grouped mode the returned future does not resolve until a later
    /// fsync tick drains this write's promise.
    pub async fn write(self: &Arc<Self>, buf: &[u8]) -> Result<(), StorageError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StorageError::Closed);
        }

        {
            let mut f = self.write_file.lock().await;
            f.write_all(buf)
                .await
                .map_err(|e| StorageError::FsyncFailed(e.to_string()))?;
        }

        match self.mode {
            FsyncMode::Never => Ok(()),
            FsyncMode::Synchronous => self.force_once().await,
            FsyncMode::Grouped(period) => {
                let (tx, rx) = oneshot::channel();
                {
                    let mut q = self.queue.lock().await;
                    q.push_back(TimestampedPromise { tx, enqueued_at: Instant::now() });
                }
                self.ensure_task_running(period).await;
                rx.await.unwrap_or(Err(StorageError::Closed))
            },
        }
    }

    async fn ensure_task_running(self: &Arc<Self>, period: Duration) {
        let mut guard = self.task.lock().await;
        let needs_spawn = guard.as_ref().is_none_or(JoinHandle::is_finished);
        if needs_spawn {
            let spawn_target = Arc::clone(self);
            *guard = Some(tokio::spawn(async move {
                spawn_target.run_periodic(period).await;
            }));
        }
    }

    async fn run_periodic(self: Arc<Self>, period: Duration) {
        loop {
            sleep(period).await;
            self.fsync().await;
            if self.queue.lock().await.is_empty() {
                debug!("periodic fsync task idle, stopping");
                return;
            }
        }
    }

    /// Snapshots the queue length, forces the file, then resolves exactly
    /// that many oldest promises (never more — surplus arrivals wait for
    /// the next tick).
    async fn fsync(&self) {
        let _serialize = self.fsync_lock.lock().await;
        let fsync_start = Instant::now();
        let completed = self.queue.lock().await.len();

        match self.fsync_file.sync_data().await {
            Err(e) => {
                self.metrics.fsync_error_count.fetch_add(1, Ordering::Relaxed);
                warn!("fsync failed: {e}");
                let err = StorageError::FsyncFailed(e.to_string());
                let mut q = self.queue.lock().await;
                for _ in 0..completed.min(q.len()) {
                    if let Some(p) = q.pop_front() {
                        let _ = p.tx.send(Err(err.clone()));
                    }
                }
            },
            Ok(()) => {
                self.metrics.fsync_count.fetch_add(1, Ordering::Relaxed);
                let period = match self.mode {
                    FsyncMode::Grouped(d) => d,
                    _ => Duration::ZERO,
                };
                let mut q = self.queue.lock().await;
                for _ in 0..completed.min(q.len()) {
                    if let Some(p) = q.pop_front() {
                        let behind =
                            fsync_start.saturating_duration_since(p.enqueued_at).saturating_sub(period);
                        self.metrics.fsync_lag_usec.sample(behind.as_micros() as f64);
                        let _ = p.tx.send(Ok(()));
                    }
                }
                self.metrics.fsync_duration_usec.sample(fsync_start.elapsed().as_micros() as f64);
            },
        }
    }

    /// Synchronous-mode path: force immediately, no promise queue involved.
    async fn force_once(&self) -> Result<(), StorageError> {
        let _serialize = self.fsync_lock.lock().await;
        let start = Instant::now();
        let res = self.fsync_file.sync_data().await;
        self.metrics.fsync_duration_usec.sample(start.elapsed().as_micros() as f64);
        match res {
            Ok(()) => {
                self.metrics.fsync_count.fetch_add(1, Ordering::Relaxed);
                Ok(())
            },
            Err(e) => {
                self.metrics.fsync_error_count.fetch_add(1, Ordering::Relaxed);
                Err(StorageError::FsyncFailed(e.to_string()))
            },
        }
    }

    /// Idempotent. Stops the periodic task and performs a final fsync;
    /// concurrent writes during close are explicitly undefined.
    pub async fn close(self: &Arc<Self>) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.task.lock().await.take() {
            handle.abort();
        }
        self.fsync().await;
    }
}

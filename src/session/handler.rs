// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! `Session` (the per-connection data object, original spec §3) and
//! `SessionHandler` (the command surface operating on it, original spec
//! §4.3). Cancellation follows the teacher's `io_with_timeout` idiom
//! (`src/client/common.rs`): race a `CancellationToken::cancelled()` branch
//! of `tokio::select!` against the collaborator future rather than thread a
//! token through the collaborator's own signature.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::SystemTime,
};

use bytes::Bytes;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::{
    availability::{SessionAvailability, Status},
    error::{GateScope, SessionError},
    pending_read_set::PendingReadSet,
    queue::{Item, QueueCollection, QueueName},
    session::broker::Broker,
};

/// Per-connection data object (original spec §3). `finished` is monotonic:
/// once set, no new waiter or pending read may be admitted.
pub struct Session {
    pub session_id: u64,
    pub client_address: String,
    pub pending_reads: PendingReadSet,
    waiters: Mutex<HashMap<u64, CancellationToken>>,
    next_waiter_id: AtomicU64,
    pub finished: AtomicBool,
}

impl Session {
    pub fn new(session_id: u64, client_address: String) -> Self {
        Self {
            session_id,
            client_address,
            pending_reads: PendingReadSet::new(),
            waiters: Mutex::new(HashMap::new()),
            next_waiter_id: AtomicU64::new(0),
            finished: AtomicBool::new(false),
        }
    }

    async fn register_waiter(&self, token: CancellationToken) -> u64 {
        let id = self.next_waiter_id.fetch_add(1, Ordering::SeqCst);
        self.waiters.lock().await.insert(id, token);
        id
    }

    async fn deregister_waiter(&self, id: u64) {
        self.waiters.lock().await.remove(&id);
    }

    /// Fires every tracked waiter's cancellation trigger and clears the set.
    /// Safe to call concurrently with a waiter resolving on its own: the
    /// `select!` in `getItem`/`monitor_until` tolerates either outcome.
    async fn cancel_all_waiters(&self) {
        let mut g = self.waiters.lock().await;
        for (_, token) in g.drain() {
            token.cancel();
        }
    }
}

/// What a monitor stream stopped for; purely informational (logged by the
/// adapter, not part of the wire contract beyond the trailing `END`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorOutcome {
    Unavailable,
    MaxItemsReached,
    DeadlineElapsed,
    TooManyOpenReads,
    FetchReturnedNone,
    ReceiverClosed,
}

/// The bound command surface for one connection. Cheap to hold by value;
/// all shared state lives behind the `Arc<Broker<Q>>`.
pub struct SessionHandler<Q: QueueCollection> {
    broker: Arc<Broker<Q>>,
    session: Arc<Session>,
    availability: SessionAvailability,
}

impl<Q: QueueCollection> Clone for SessionHandler<Q> {
    fn clone(&self) -> Self {
        Self {
            broker: self.broker.clone(),
            session: self.session.clone(),
            availability: self.availability,
        }
    }
}

impl<Q: QueueCollection> SessionHandler<Q> {
    pub(crate) fn new(
        broker: Arc<Broker<Q>>,
        session: Arc<Session>,
        availability: SessionAvailability,
    ) -> Self {
        Self { broker, session, availability }
    }

    pub fn session_id(&self) -> u64 {
        self.session.session_id
    }

    pub fn client_address(&self) -> &str {
        &self.session.client_address
    }

    pub fn config(&self) -> &crate::cfg::config::BrokerConfig {
        &self.broker.config
    }

    pub fn metrics(&self) -> &crate::metrics::Metrics {
        &self.broker.metrics
    }

    /// Not gated by the availability policy: informational, not a read/write
    /// against queue contents (original spec §4.4's `stats`/`dump_stats`).
    pub async fn queue_names(&self) -> Vec<String> {
        self.broker.queues.queue_names().await
    }

    pub async fn queue_stats(&self, queue: &QueueName) -> HashMap<String, String> {
        self.broker.queues.stats(queue).await
    }

    fn who(&self) -> String {
        format!("session:{}", self.session.session_id)
    }

    fn check_gate(&self, scope: GateScope, op: &'static str) -> Result<(), SessionError> {
        self.availability.check(&self.broker.gate, scope, op)
    }

    /// Pre-existing pending reads forbid a non-transactional `get` on the
    /// same queue (original spec §4.3). Called by the protocol adapter
    /// before dispatching a plain `get` (no `open`/`peek`/`close`/`abort`).
    pub async fn check_transactional(&self, queue: &QueueName) -> Result<(), SessionError> {
        let pending = self.session.pending_reads.size(queue.as_str()).await;
        if pending > 0 {
            return Err(SessionError::TransactionViolation {
                queue: queue.as_str().to_string(),
                pending,
            });
        }
        Ok(())
    }

    /// Gated as a write. Delegates to `QueueCollection::add`.
    pub async fn set_item(
        &self,
        queue: &QueueName,
        flags: u32,
        expiry: Option<SystemTime>,
        data: Bytes,
    ) -> Result<bool, SessionError> {
        self.check_gate(GateScope::Write, "set")?;
        let start = tokio::time::Instant::now();
        let stored =
            self.broker.queues.add(queue, data, flags, expiry, SystemTime::now(), &self.who()).await;
        self.broker.metrics.cmd_set.inc();
        self.broker.metrics.set_latency_usec.sample(start.elapsed().as_micros() as f64);
        Ok(stored)
    }

    /// Gated as a read. Registers a cancellable waiter around the
    /// collaborator's `remove` future; on success with `opening`, admits the
    /// xid to the session's `PendingReadSet`, honoring the "finished but
    /// add" race (original spec §9): the xid is admitted, then immediately
    /// released if `finish` was observed in the interim.
    pub async fn get_item(
        &self,
        queue: &QueueName,
        timeout: Option<tokio::time::Instant>,
        opening: bool,
        peeking: bool,
    ) -> Result<Option<Item>, SessionError> {
        self.check_gate(GateScope::Read, "get")?;

        if opening {
            let max = self.broker.config.sessions.max_open_reads;
            if self.session.pending_reads.size(queue.as_str()).await >= max as usize {
                return Err(SessionError::TooManyOpenReads {
                    queue: queue.as_str().to_string(),
                    max,
                });
            }
        }

        if peeking {
            self.broker.metrics.cmd_peek.inc();
        } else {
            self.broker.metrics.cmd_get.inc();
        }

        let fetch_start = tokio::time::Instant::now();
        let item = self.fetch_one(queue, timeout, opening, peeking).await;

        if item.is_some() {
            self.broker.metrics.get_hits.inc();
        } else {
            self.broker.metrics.get_misses.inc();
        }
        self.broker
            .metrics
            .sample_queue_get_latency(queue.as_str(), fetch_start.elapsed().as_micros() as f64);

        if let Some(item) = &item {
            if opening {
                self.session.pending_reads.add(queue.as_str(), item.xid).await;
                if self.session.finished.load(Ordering::SeqCst) {
                    self.session
                        .pending_reads
                        .remove(queue.as_str(), &HashSet::from([item.xid]))
                        .await;
                    self.broker.queues.unremove(queue, item.xid).await;
                    self.broker.metrics.finished_but_added.inc();
                }
            }
        }

        Ok(item)
    }

    /// One cancellable fetch: races the collaborator's `remove` future
    /// against this waiter's own cancellation trigger, which `finish` fires.
    async fn fetch_one(
        &self,
        queue: &QueueName,
        deadline: Option<tokio::time::Instant>,
        opening: bool,
        peeking: bool,
    ) -> Option<Item> {
        let token = CancellationToken::new();
        let waiter_id = self.session.register_waiter(token.clone()).await;

        let result = tokio::select! {
            _ = token.cancelled() => None,
            item = self.broker.queues.remove(queue, deadline, opening, peeking, &self.who()) => item,
        };

        self.session.deregister_waiter(waiter_id).await;
        result
    }

    /// Pops one xid for `queue`; if present, releases it back to the queue.
    pub async fn abort_read(&self, queue: &QueueName) -> bool {
        match self.session.pending_reads.pop(queue.as_str()).await {
            Some(xid) => {
                self.broker.queues.unremove(queue, xid).await;
                true
            },
            None => {
                warn!(queue = %queue, session = self.session.session_id, "abort with no pending read");
                false
            },
        }
    }

    /// Pops one xid for `queue`; if present, durably confirms it.
    pub async fn close_read(&self, queue: &QueueName) -> bool {
        match self.session.pending_reads.pop(queue.as_str()).await {
            Some(xid) => {
                self.broker.queues.confirm_remove(queue, xid).await;
                true
            },
            None => false,
        }
    }

    /// Confirms up to `n` of the oldest pending xids for `queue`.
    pub async fn close_reads(&self, queue: &QueueName, n: usize) -> bool {
        let xids = self.session.pending_reads.pop_n(queue.as_str(), n).await;
        let confirmed = !xids.is_empty();
        for xid in xids {
            self.broker.queues.confirm_remove(queue, xid).await;
        }
        confirmed
    }

    /// Streams items to `tx` until one of the termination conditions in
    /// original spec §4.3 is met. Rewritten as an explicit loop rather than
    /// the source's self-tail-recursion (original spec §9's "stack-unsafe
    /// recursion" note); the observable contract is unchanged.
    pub async fn monitor_until(
        &self,
        queue: &QueueName,
        deadline: Option<tokio::time::Instant>,
        max_items: Option<u64>,
        opening: bool,
        tx: mpsc::Sender<Item>,
    ) -> MonitorOutcome {
        let mut delivered: u64 = 0;
        loop {
            if self.check_gate(GateScope::Read, "monitor").is_err() {
                return MonitorOutcome::Unavailable;
            }
            if let Some(max) = max_items {
                if delivered >= max {
                    return MonitorOutcome::MaxItemsReached;
                }
            }
            if let Some(dl) = deadline {
                if tokio::time::Instant::now() >= dl {
                    return MonitorOutcome::DeadlineElapsed;
                }
            }
            let max_open = self.broker.config.sessions.max_open_reads as usize;
            if self.session.pending_reads.total().await >= max_open {
                return MonitorOutcome::TooManyOpenReads;
            }

            let item = self.fetch_one(queue, deadline, opening, false).await;
            let Some(item) = item else {
                return MonitorOutcome::FetchReturnedNone;
            };

            if opening {
                self.session.pending_reads.add(queue.as_str(), item.xid).await;
                if self.session.finished.load(Ordering::SeqCst) {
                    self.session
                        .pending_reads
                        .remove(queue.as_str(), &HashSet::from([item.xid]))
                        .await;
                    self.broker.queues.unremove(queue, item.xid).await;
                    self.broker.metrics.finished_but_added.inc();
                    return MonitorOutcome::FetchReturnedNone;
                }
            }

            delivered += 1;
            if tx.send(item).await.is_err() {
                return MonitorOutcome::ReceiverClosed;
            }
        }
    }

    pub async fn flush(&self, queue: &QueueName) -> Result<(), SessionError> {
        self.check_gate(GateScope::Write, "flush")?;
        self.broker.queues.flush(queue, &self.who()).await;
        Ok(())
    }

    pub async fn flush_expired(&self, queue: &QueueName) -> Result<u64, SessionError> {
        self.check_gate(GateScope::Write, "flush_expired")?;
        Ok(self.broker.queues.flush_expired(queue, &self.who()).await)
    }

    pub async fn flush_all_queues(&self) -> Result<(), SessionError> {
        self.check_gate(GateScope::Write, "flush_all")?;
        for name in self.broker.queues.queue_names().await {
            if let Ok(queue) = QueueName::parse(&name) {
                self.broker.queues.flush(&queue, &self.who()).await;
            }
        }
        Ok(())
    }

    pub async fn flush_all_expired(&self) -> Result<u64, SessionError> {
        self.check_gate(GateScope::Write, "flush_all_expired")?;
        Ok(self.broker.queues.flush_all_expired().await)
    }

    pub async fn delete(&self, queue: &QueueName) -> Result<(), SessionError> {
        self.check_gate(GateScope::Write, "delete")?;
        self.broker.queues.delete(queue, &self.who()).await;
        Ok(())
    }

    pub fn current_status(&self) -> Result<Status, SessionError> {
        self.broker.gate.status().map(|s| s.get()).ok_or(SessionError::StatusNotConfigured)
    }

    pub fn set_status(&self, status: Status) -> Result<(), SessionError> {
        self.broker
            .gate
            .status()
            .map(|s| s.set(status))
            .ok_or(SessionError::StatusNotConfigured)
    }

    pub fn mark_up(&self) -> Result<(), SessionError> {
        self.set_status(Status::Up)
    }

    pub fn mark_read_only(&self) -> Result<(), SessionError> {
        self.set_status(Status::ReadOnly)
    }

    pub fn mark_quiescent(&self) -> Result<(), SessionError> {
        self.set_status(Status::Quiescent)
    }

    /// Schedules a process-wide shutdown after a short, configurable delay
    /// so the response to this command can flush (original spec §9's
    /// "shutdown delay" note: the source's 100ms magic number becomes
    /// `config.sessions.shutdown_delay`).
    pub fn shutdown(&self) {
        let token = self.broker.shutdown.clone();
        let delay = self.broker.config.sessions.shutdown_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            token.cancel();
        });
    }

    /// Idempotent. Sets `finished`, cancels every tracked waiter, rolls back
    /// every pending read via `unremove`, and decrements the global session
    /// counter.
    pub async fn finish(&self) {
        if self.session.finished.swap(true, Ordering::SeqCst) {
            return;
        }
        self.session.cancel_all_waiters().await;
        let (_, snapshot) = self.session.pending_reads.cancel_all().await;
        for (queue, xids) in snapshot {
            if let Ok(queue) = QueueName::parse(&queue) {
                for xid in xids {
                    self.broker.queues.unremove(&queue, xid).await;
                }
            }
        }
        self.broker.gate.disconnect();
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Per-session, per-queue ordered set of reserved transaction ids (xids).
//!
//! Session-local state, mutated behind a single mutex (original spec §5's
//! "Shared-resource policy"). `cancelAll` snapshots and clears under the
//! lock, then performs the external `unremove` calls outside it so the
//! collaborator never has to be called while the lock is held.

use std::collections::{HashMap, HashSet, VecDeque};

use tokio::sync::Mutex;

/// Ordered, per-queue xid bookkeeping for one session.
#[derive(Debug, Default)]
pub struct PendingReadSet {
    inner: Mutex<HashMap<String, VecDeque<u32>>>,
}

impl PendingReadSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `xid` to `queue`'s sequence. The caller is responsible for
    /// checking the session-wide `maxOpenReads` bound before calling this.
    pub async fn add(&self, queue: &str, xid: u32) {
        let mut g = self.inner.lock().await;
        g.entry(queue.to_string()).or_default().push_back(xid);
    }

    /// Removes and returns the oldest xid for `queue`, if any.
    pub async fn pop(&self, queue: &str) -> Option<u32> {
        let mut g = self.inner.lock().await;
        let xid = g.get_mut(queue).and_then(VecDeque::pop_front);
        Self::prune(&mut g, queue);
        xid
    }

    /// Removes and returns up to `n` of the oldest xids for `queue`. May
    /// return fewer than `n`.
    pub async fn pop_n(&self, queue: &str, n: usize) -> Vec<u32> {
        let mut g = self.inner.lock().await;
        let taken = match g.get_mut(queue) {
            Some(seq) => {
                let k = n.min(seq.len());
                seq.drain(..k).collect()
            },
            None => Vec::new(),
        };
        Self::prune(&mut g, queue);
        taken
    }

    /// Drains every xid for `queue`.
    pub async fn pop_all(&self, queue: &str) -> Vec<u32> {
        let mut g = self.inner.lock().await;
        let taken = g.remove(queue).map(Vec::from).unwrap_or_default();
        taken
    }

    /// Non-destructive snapshot of `queue`'s pending xids, oldest first.
    pub async fn peek(&self, queue: &str) -> Vec<u32> {
        let g = self.inner.lock().await;
        g.get(queue).map(|seq| seq.iter().copied().collect()).unwrap_or_default()
    }

    /// Number of pending xids for `queue`.
    pub async fn size(&self, queue: &str) -> usize {
        let g = self.inner.lock().await;
        g.get(queue).map_or(0, VecDeque::len)
    }

    /// Total pending xids across every queue, for checking `maxOpenReads`.
    pub async fn total(&self) -> usize {
        let g = self.inner.lock().await;
        g.values().map(VecDeque::len).sum()
    }

    /// Removes any of `ids` present in `queue`'s sequence; returns those
    /// actually removed.
    pub async fn remove(&self, queue: &str, ids: &HashSet<u32>) -> HashSet<u32> {
        let mut g = self.inner.lock().await;
        let removed = match g.get_mut(queue) {
            Some(seq) => {
                let mut removed = HashSet::new();
                seq.retain(|x| {
                    if ids.contains(x) {
                        removed.insert(*x);
                        false
                    } else {
                        true
                    }
                });
                removed
            },
            None => HashSet::new(),
        };
        Self::prune(&mut g, queue);
        removed
    }

    /// Atomically snapshots and clears the whole map, returning it so the
    /// caller can issue one `unremove` per `(queue, xid)` outside the lock.
    /// Returns the total count cancelled.
    pub async fn cancel_all(&self) -> (usize, HashMap<String, VecDeque<u32>>) {
        let mut g = self.inner.lock().await;
        let snapshot = std::mem::take(&mut *g);
        let total = snapshot.values().map(VecDeque::len).sum();
        (total, snapshot)
    }

    fn prune(g: &mut HashMap<String, VecDeque<u32>>, queue: &str) {
        if g.get(queue).is_some_and(VecDeque::is_empty) {
            g.remove(queue);
        }
    }
}

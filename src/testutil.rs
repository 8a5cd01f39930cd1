// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! An in-memory [`QueueCollection`] test double. The durable journal, fan-out
//! and expiry sweeper are out of scope for this crate (original spec §1); this
//! gives the session handler and protocol adapter tests something to drive
//! that obeys the same contract (original spec §6) a real implementation would.

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::SystemTime,
};

use bytes::Bytes;
use dashmap::DashMap;
use tokio::{
    sync::{Mutex, Notify},
    time::Instant,
};

use crate::queue::{Item, QueueCollection, QueueName};

#[derive(Clone)]
struct StoredItem {
    data: Bytes,
    flags: u32,
    expiry: Option<SystemTime>,
}

#[derive(Default)]
struct QueueState {
    items: VecDeque<StoredItem>,
    reserved: HashMap<u32, StoredItem>,
    next_xid: u32,
}

struct QueueEntry {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl Default for QueueEntry {
    fn default() -> Self {
        Self { state: Mutex::new(QueueState::default()), notify: Notify::new() }
    }
}

/// A non-durable, process-local stand-in for the real queue container.
pub struct InMemoryQueueCollection {
    queues: DashMap<String, Arc<QueueEntry>>,
}

impl Default for InMemoryQueueCollection {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryQueueCollection {
    pub fn new() -> Self {
        Self { queues: DashMap::new() }
    }

    fn entry(&self, queue: &str) -> Arc<QueueEntry> {
        self.queues
            .entry(queue.to_string())
            .or_insert_with(|| Arc::new(QueueEntry::default()))
            .clone()
    }

    fn evict_expired(state: &mut QueueState) -> u64 {
        let now = SystemTime::now();
        let before = state.items.len();
        state.items.retain(|item| item.expiry.is_none_or(|e| e > now));
        (before - state.items.len()) as u64
    }
}

impl QueueCollection for InMemoryQueueCollection {
    async fn add(
        &self,
        queue: &QueueName,
        data: Bytes,
        flags: u32,
        expiry: Option<SystemTime>,
        _now: SystemTime,
        _who: &str,
    ) -> bool {
        let entry = self.entry(queue.as_str());
        {
            let mut st = entry.state.lock().await;
            st.items.push_back(StoredItem { data, flags, expiry });
        }
        entry.notify.notify_waiters();
        true
    }

    async fn remove(
        &self,
        queue: &QueueName,
        deadline: Option<Instant>,
        opening: bool,
        peeking: bool,
        _who: &str,
    ) -> Option<Item> {
        let entry = self.entry(queue.as_str());
        loop {
            {
                let mut st = entry.state.lock().await;
                Self::evict_expired(&mut st);
                if let Some(front) = st.items.front().cloned() {
                    if peeking {
                        return Some(Item { data: front.data, flags: front.flags, xid: 0 });
                    }
                    st.items.pop_front();
                    if opening {
                        st.next_xid += 1;
                        let xid = st.next_xid;
                        st.reserved.insert(xid, front.clone());
                        return Some(Item { data: front.data, flags: front.flags, xid });
                    }
                    return Some(Item { data: front.data, flags: front.flags, xid: 0 });
                }
            }
            match deadline {
                None => return None,
                Some(dl) => {
                    let now = Instant::now();
                    if now >= dl {
                        return None;
                    }
                    let _ = tokio::time::timeout(dl - now, entry.notify.notified()).await;
                },
            }
        }
    }

    async fn unremove(&self, queue: &QueueName, xid: u32) {
        let entry = self.entry(queue.as_str());
        {
            let mut st = entry.state.lock().await;
            if let Some(item) = st.reserved.remove(&xid) {
                st.items.push_front(item);
            }
        }
        entry.notify.notify_waiters();
    }

    async fn confirm_remove(&self, queue: &QueueName, xid: u32) {
        let entry = self.entry(queue.as_str());
        entry.state.lock().await.reserved.remove(&xid);
    }

    async fn flush(&self, queue: &QueueName, _who: &str) {
        let entry = self.entry(queue.as_str());
        entry.state.lock().await.items.clear();
    }

    async fn flush_expired(&self, queue: &QueueName, _who: &str) -> u64 {
        let entry = self.entry(queue.as_str());
        let mut st = entry.state.lock().await;
        Self::evict_expired(&mut st)
    }

    async fn flush_all_expired(&self) -> u64 {
        let mut total = 0;
        for entry in self.queues.iter() {
            let mut st = entry.state.lock().await;
            total += Self::evict_expired(&mut st);
        }
        total
    }

    async fn delete(&self, queue: &QueueName, _who: &str) {
        self.queues.remove(queue.as_str());
    }

    async fn queue_names(&self) -> Vec<String> {
        self.queues.iter().map(|e| e.key().clone()).collect()
    }

    async fn stats(&self, queue: &QueueName) -> HashMap<String, String> {
        let entry = self.entry(queue.as_str());
        let st = entry.state.lock().await;
        let mut m = HashMap::new();
        m.insert("items".to_string(), st.items.len().to_string());
        m.insert("open_transactions".to_string(), st.reserved.len().to_string());
        m
    }

    async fn current_items(&self, queue: &QueueName) -> u64 {
        let entry = self.entry(queue.as_str());
        entry.state.lock().await.items.len() as u64
    }

    async fn current_bytes(&self, queue: &QueueName) -> u64 {
        let entry = self.entry(queue.as_str());
        entry.state.lock().await.items.iter().map(|i| i.data.len() as u64).sum()
    }

    async fn reserved_memory_ratio(&self) -> f64 {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_then_remove_is_fifo() {
        let c = InMemoryQueueCollection::new();
        let q = QueueName::parse("q").unwrap();
        c.add(&q, Bytes::from_static(b"a"), 0, None, SystemTime::now(), "t").await;
        c.add(&q, Bytes::from_static(b"b"), 0, None, SystemTime::now(), "t").await;

        let first = c.remove(&q, None, false, false, "t").await.unwrap();
        assert_eq!(first.data, Bytes::from_static(b"a"));
        let second = c.remove(&q, None, false, false, "t").await.unwrap();
        assert_eq!(second.data, Bytes::from_static(b"b"));
        assert!(c.remove(&q, None, false, false, "t").await.is_none());
    }

    #[tokio::test]
    async fn open_then_unremove_restores_head() {
        let c = InMemoryQueueCollection::new();
        let q = QueueName::parse("q").unwrap();
        c.add(&q, Bytes::from_static(b"x"), 0, None, SystemTime::now(), "t").await;

        let item = c.remove(&q, None, true, false, "t").await.unwrap();
        assert_ne!(item.xid, 0);
        c.unremove(&q, item.xid).await;

        let again = c.remove(&q, None, false, false, "t").await.unwrap();
        assert_eq!(again.data, Bytes::from_static(b"x"));
    }

    #[tokio::test]
    async fn peek_does_not_consume() {
        let c = InMemoryQueueCollection::new();
        let q = QueueName::parse("q").unwrap();
        c.add(&q, Bytes::from_static(b"x"), 0, None, SystemTime::now(), "t").await;

        let peeked = c.remove(&q, None, false, true, "t").await.unwrap();
        assert_eq!(peeked.data, Bytes::from_static(b"x"));
        let real = c.remove(&q, None, false, false, "t").await.unwrap();
        assert_eq!(real.data, Bytes::from_static(b"x"));
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Process-wide counters and latency histograms backing the `stats` /
//! `dump_stats` commands (original spec §4.4) and the design note on the
//! "finished but add" race (original spec §9).

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::storage::Histogram;

/// A single monotonically-increasing counter, cheap to read from `stats`.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Process-wide command and latency metrics.
#[derive(Debug, Default)]
pub struct Metrics {
    pub cmd_get: Counter,
    pub cmd_set: Counter,
    pub cmd_peek: Counter,
    pub get_hits: Counter,
    pub get_misses: Counter,
    /// Incremented whenever `getItem` observes the "finished but add" race
    /// (original spec §9): an item was reserved after the owning session
    /// already called `finish`.
    pub finished_but_added: Counter,
    pub set_latency_usec: Histogram,
    per_queue_get_latency_usec: DashMap<String, Histogram>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sample_queue_get_latency(&self, queue: &str, usec: f64) {
        self.per_queue_get_latency_usec.entry(queue.to_string()).or_default().sample(usec);
    }

    /// Renders `STAT <key> <value>\r\n` lines (without the trailing `END`)
    /// for the `stats` command.
    pub fn render_stat_lines(&self) -> Vec<(String, String)> {
        vec![
            ("cmd_get".to_string(), self.cmd_get.get().to_string()),
            ("cmd_set".to_string(), self.cmd_set.get().to_string()),
            ("cmd_peek".to_string(), self.cmd_peek.get().to_string()),
            ("get_hits".to_string(), self.get_hits.get().to_string()),
            ("get_misses".to_string(), self.get_misses.get().to_string()),
            (
                "set_latency_usec_mean".to_string(),
                format!("{:.2}", self.set_latency_usec.mean()),
            ),
        ]
    }

    pub fn queue_latency_mean(&self, queue: &str) -> Option<f64> {
        self.per_queue_get_latency_usec.get(queue).map(|h| h.mean())
    }
}

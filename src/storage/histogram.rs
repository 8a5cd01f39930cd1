// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! A minimal, dependency-free latency histogram. The teacher crate pulls in
//! `fastrace`/`tracing` for spans but has no metrics-aggregation crate in
//! its stack; rather than add one for a handful of gauges, this keeps
//! count/sum/max, which is what the `stats`/`dump_stats` commands need to
//! render (original spec §4.4).

use std::sync::atomic::{AtomicU64, Ordering};

/// Running count/sum/max of a stream of `f64` samples (e.g. microseconds).
#[derive(Debug, Default)]
pub struct Histogram {
    count: AtomicU64,
    // Sum and max are stored as bit patterns of f64 via `u64` to stay
    // lock-free; `sample` serializes updates to `max` with a CAS loop.
    sum_bits: AtomicU64,
    max_bits: AtomicU64,
}

impl Histogram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sample(&self, value: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_bits
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                Some(f64::to_bits(f64::from_bits(bits) + value))
            })
            .ok();
        self.max_bits
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                let cur = f64::from_bits(bits);
                if value > cur { Some(f64::to_bits(value)) } else { None }
            })
            .ok();
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn sum(&self) -> f64 {
        f64::from_bits(self.sum_bits.load(Ordering::Relaxed))
    }

    pub fn max(&self) -> f64 {
        f64::from_bits(self.max_bits.load(Ordering::Relaxed))
    }

    pub fn mean(&self) -> f64 {
        let c = self.count();
        if c == 0 { 0.0 } else { self.sum() / c as f64 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_count_sum_max() {
        let h = Histogram::new();
        h.sample(1.0);
        h.sample(3.0);
        h.sample(2.0);
        assert_eq!(h.count(), 3);
        assert_eq!(h.sum(), 6.0);
        assert_eq!(h.max(), 3.0);
        assert!((h.mean() - 2.0).abs() < f64::EPSILON);
    }
}

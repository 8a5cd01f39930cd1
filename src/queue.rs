// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The downstream collaborator contract (original spec §6): the durable
//! journal, queue fan-out, expiry sweeper and the `QueueCollection`
//! container that owns queues are out of scope for this crate and are
//! consumed here only through this trait.
//!
//! `SessionHandler` is generic over `Q: QueueCollection` rather than coded
//! against a trait object, matching the teacher's preference for concrete
//! generic contexts (`StateMachineCtx<Ctx, Res>`) over `dyn` dispatch where
//! the call sites are already monomorphic.

use std::{collections::HashMap, time::SystemTime};

use bytes::Bytes;
use tokio::time::Instant;

use crate::error::SessionError;

/// A non-empty, `/`-free queue name. `/` is reserved for reliable-read
/// option syntax (original spec §6).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueName(String);

impl QueueName {
    pub fn parse(raw: &str) -> Result<Self, SessionError> {
        if raw.is_empty() {
            return Err(SessionError::Protocol {
                op: "queue_name",
                detail: "queue name must not be empty".to_string(),
            });
        }
        if raw.contains('/') {
            return Err(SessionError::Protocol {
                op: "queue_name",
                detail: format!("queue name {raw:?} must not contain '/'"),
            });
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::borrow::Borrow<str> for QueueName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// An opaque payload plus the reservation id assigned when it is removed
/// under `opening = true`.
#[derive(Debug, Clone)]
pub struct Item {
    pub data: Bytes,
    pub flags: u32,
    pub xid: u32,
}

/// The async contract `SessionHandler` drives. Every method here belongs to
/// the external `QueueCollection`; this crate provides no durable
/// implementation of it (see [`crate::testutil`] for an in-memory test
/// double used only by this crate's own tests).
pub trait QueueCollection: Send + Sync {
    /// Appends `data` to `queue`. Returns whether the item was actually
    /// stored (queues may refuse for capacity reasons).
    fn add(
        &self,
        queue: &QueueName,
        data: Bytes,
        flags: u32,
        expiry: Option<SystemTime>,
        now: SystemTime,
        who: &str,
    ) -> impl Future<Output = bool> + Send;

    /// Waits (up to `deadline`, if any) for an item to become available and
    /// reserves/peeks/pops it. `deadline == None` is a single non-blocking
    /// attempt (the wire default when no `t=` option is given); `Some`
    /// polls until an item arrives or the deadline passes. The returned
    /// future is cancel-safe: dropping it before completion abandons the
    /// wait without side effects.
    fn remove(
        &self,
        queue: &QueueName,
        deadline: Option<Instant>,
        opening: bool,
        peeking: bool,
        who: &str,
    ) -> impl Future<Output = Option<Item>> + Send;

    /// Releases a reservation, returning the item to the head of the queue.
    fn unremove(&self, queue: &QueueName, xid: u32) -> impl Future<Output = ()> + Send;

    /// Durably consumes a reservation.
    fn confirm_remove(
        &self,
        queue: &QueueName,
        xid: u32,
    ) -> impl Future<Output = ()> + Send;

    fn flush(&self, queue: &QueueName, who: &str) -> impl Future<Output = ()> + Send;

    fn flush_expired(
        &self,
        queue: &QueueName,
        who: &str,
    ) -> impl Future<Output = u64> + Send;

    fn flush_all_expired(&self) -> impl Future<Output = u64> + Send;

    fn delete(&self, queue: &QueueName, who: &str) -> impl Future<Output = ()> + Send;

    fn queue_names(&self) -> impl Future<Output = Vec<String>> + Send;

    fn stats(
        &self,
        queue: &QueueName,
    ) -> impl Future<Output = HashMap<String, String>> + Send;

    fn current_items(&self, queue: &QueueName) -> impl Future<Output = u64> + Send;

    fn current_bytes(&self, queue: &QueueName) -> impl Future<Output = u64> + Send;

    fn reserved_memory_ratio(&self) -> impl Future<Output = f64> + Send;
}

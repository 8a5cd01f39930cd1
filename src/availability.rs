// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Global admission checks: `refuseReads` / `refuseWrites` derived from
//! connection-count thresholds, plus an optional shared [`ServerStatus`].

use std::{
    fmt,
    sync::atomic::{AtomicU32, AtomicU8, Ordering},
};

use serde::{Deserialize, Serialize};

use crate::error::GateScope;

/// Server-wide up/quiescent/read-only status, settable via the `status`
/// command when configured (original spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Up,
    ReadOnly,
    Quiescent,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Status::Up => "UP",
            Status::ReadOnly => "READONLY",
            Status::Quiescent => "QUIESCENT",
        })
    }
}

impl Status {
    fn block_reads(self) -> bool {
        matches!(self, Status::Quiescent)
    }

    fn block_writes(self) -> bool {
        matches!(self, Status::ReadOnly | Status::Quiescent)
    }

    fn to_u8(self) -> u8 {
        match self {
            Status::Up => 0,
            Status::ReadOnly => 1,
            Status::Quiescent => 2,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => Status::ReadOnly,
            2 => Status::Quiescent,
            _ => Status::Up,
        }
    }
}

/// Shared, atomically-updated server status. Installed once; `status`
/// commands fail with `StatusNotConfigured` while it is absent.
#[derive(Debug, Default)]
pub struct ServerStatus {
    state: AtomicU8,
}

impl ServerStatus {
    pub fn new(initial: Status) -> Self {
        Self { state: AtomicU8::new(initial.to_u8()) }
    }

    pub fn get(&self) -> Status {
        Status::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn set(&self, s: Status) {
        self.state.store(s.to_u8(), Ordering::SeqCst);
    }
}

impl Default for Status {
    fn default() -> Self {
        Status::Up
    }
}

/// Thresholds (in concurrently open sessions) past which reads and/or
/// writes are refused outright, independent of `ServerStatus`.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct AvailabilityThresholds {
    /// Sessions beyond this count cause `refuseWrites = true`.
    #[serde(default = "default_refuse_writes_above")]
    pub refuse_writes_above: u32,
    /// Sessions beyond this count cause `refuseReads = true`.
    #[serde(default = "default_refuse_reads_above")]
    pub refuse_reads_above: u32,
}

fn default_refuse_writes_above() -> u32 {
    u32::MAX
}

fn default_refuse_reads_above() -> u32 {
    u32::MAX
}

impl Default for AvailabilityThresholds {
    fn default() -> Self {
        Self {
            refuse_writes_above: default_refuse_writes_above(),
            refuse_reads_above: default_refuse_reads_above(),
        }
    }
}

/// Global admission policy. `(refuseWrites, refuseReads)` is computed once
/// per session at connect time from the live session count, then combined
/// per-operation with an optional shared [`ServerStatus`].
pub struct AvailabilityGate {
    thresholds: AvailabilityThresholds,
    sessions_count: AtomicU32,
    status: Option<std::sync::Arc<ServerStatus>>,
}

/// Snapshot of the gate decision taken at connect time for one session.
#[derive(Debug, Clone, Copy)]
pub struct SessionAvailability {
    refuse_writes: bool,
    refuse_reads: bool,
}

impl AvailabilityGate {
    pub fn new(thresholds: AvailabilityThresholds) -> Self {
        Self { thresholds, sessions_count: AtomicU32::new(0), status: None }
    }

    pub fn with_status(mut self, status: std::sync::Arc<ServerStatus>) -> Self {
        self.status = Some(status);
        self
    }

    pub fn status(&self) -> Option<&std::sync::Arc<ServerStatus>> {
        self.status.as_ref()
    }

    /// Called when a session connects; derives this session's fixed
    /// `(refuseWrites, refuseReads)` policy from the live session count.
    pub fn connect(&self) -> SessionAvailability {
        let n = self.sessions_count.fetch_add(1, Ordering::SeqCst) + 1;
        SessionAvailability {
            refuse_writes: n > self.thresholds.refuse_writes_above,
            refuse_reads: n > self.thresholds.refuse_reads_above,
        }
    }

    pub fn disconnect(&self) {
        self.sessions_count.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn sessions_count(&self) -> u32 {
        self.sessions_count.load(Ordering::SeqCst)
    }
}

impl SessionAvailability {
    /// Checks admission for `op`, consulting both the connect-time policy
    /// and any live `ServerStatus`.
    pub fn check(
        &self,
        gate: &AvailabilityGate,
        scope: GateScope,
        op: &'static str,
    ) -> Result<(), crate::error::SessionError> {
        let blocked_by_status = gate.status.as_ref().is_some_and(|s| match scope {
            GateScope::Read => s.get().block_reads(),
            GateScope::Write => s.get().block_writes(),
        });
        let blocked = match scope {
            GateScope::Read => self.refuse_reads,
            GateScope::Write => self.refuse_writes,
        } || blocked_by_status;

        if blocked {
            Err(crate::error::SessionError::Unavailable { op, scope })
        } else {
            Ok(())
        }
    }
}

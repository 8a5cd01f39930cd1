// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The durable write path: [`periodic_sync::PeriodicSyncStorage`] batches
//! writes into grouped fsyncs while returning a per-write completion
//! future, per original spec §4.2.

pub mod histogram;
pub mod periodic_sync;

pub use histogram::Histogram;
pub use periodic_sync::{FsyncMode, PeriodicSyncStorage, SyncFile};
use thiserror::Error;

/// Failure modes surfaced from the durable write path.
#[derive(Debug, Error, Clone)]
pub enum StorageError {
    /// `force()` (fsync) failed at the I/O layer.
    #[error("fsync failed: {0}")]
    FsyncFailed(String),
    /// The storage was closed while the write/promise was still pending.
    #[error("storage closed")]
    Closed,
}

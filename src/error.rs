// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Error taxonomy for the session handler and storage cores.
//!
//! `SessionError` is what `SessionHandler` operations return; the
//! `MemcacheAdapter` maps every variant onto a wire response and, for the
//! terminal variants, a post-response disconnect (see
//! [`SessionError::is_terminal`]).

use thiserror::Error;

/// Which admission check rejected an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateScope {
    Read,
    Write,
}

impl std::fmt::Display for GateScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            GateScope::Read => "read",
            GateScope::Write => "write",
        })
    }
}

/// Errors raised by [`crate::session::SessionHandler`] operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Malformed command framing or option syntax. First occurrence per
    /// session is logged by the adapter; later ones are not (see original
    /// spec §7).
    #[error("protocol error in {op}: {detail}")]
    Protocol { op: &'static str, detail: String },

    /// A non-transactional `get` was issued against a queue that already has
    /// pending reliable reads open in this session.
    #[error("transaction violation: queue {queue:?} has {pending} pending read(s)")]
    TransactionViolation { queue: String, pending: usize },

    /// `get/open` was attempted while the session's pending count for the
    /// queue already equals `maxOpenReads`.
    #[error("too many open reads on queue {queue:?} (max {max})")]
    TooManyOpenReads { queue: String, max: u32 },

    /// The operation was refused by the [`crate::availability::AvailabilityGate`].
    #[error("unavailable: {op} ({scope})")]
    Unavailable { op: &'static str, scope: GateScope },

    /// `status` was used without a configured `ServerStatus`.
    #[error("status not configured")]
    StatusNotConfigured,

    /// Propagated from `PeriodicSyncStorage` through the downstream queue
    /// collaborator.
    #[error("storage I/O error: {0}")]
    StorageIo(#[from] crate::storage::StorageError),
}

impl SessionError {
    /// Whether the connection must be dropped after the response for this
    /// error is flushed (original spec §7's propagation policy).
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionError::StorageIo(_))
    }

    /// The short name used for the first-occurrence-only log line and for
    /// metrics tagging.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::Protocol { .. } => "protocol_error",
            SessionError::TransactionViolation { .. } => "transaction_violation",
            SessionError::TooManyOpenReads { .. } => "too_many_open_reads",
            SessionError::Unavailable { .. } => "unavailable",
            SessionError::StatusNotConfigured => "status_not_configured",
            SessionError::StorageIo(_) => "storage_io_error",
        }
    }
}

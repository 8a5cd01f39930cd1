// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Process-wide shared state: the queue collaborator, availability gate,
//! metrics and the session-id counter. One [`Broker`] is constructed at
//! startup and shared (via `Arc`) across every accepted connection.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use tokio_util::sync::CancellationToken;

use crate::{
    availability::AvailabilityGate, cfg::config::BrokerConfig, metrics::Metrics,
    queue::QueueCollection, session::handler::{Session, SessionHandler},
};

/// Shared, process-wide broker state. Generic over the downstream
/// [`QueueCollection`] so the core stays free of any concrete storage
/// dependency (original spec §1's "out of scope" boundary).
pub struct Broker<Q: QueueCollection> {
    pub queues: Arc<Q>,
    pub gate: Arc<AvailabilityGate>,
    pub config: Arc<BrokerConfig>,
    pub metrics: Arc<Metrics>,
    /// Fired by `SessionHandler::shutdown` once its flush delay elapses;
    /// the transport listens on this to stop accepting new connections.
    pub shutdown: CancellationToken,
    next_session_id: AtomicU64,
}

impl<Q: QueueCollection> Broker<Q> {
    pub fn new(queues: Arc<Q>, gate: Arc<AvailabilityGate>, config: Arc<BrokerConfig>) -> Arc<Self> {
        Arc::new(Self {
            queues,
            gate,
            config,
            metrics: Arc::new(Metrics::new()),
            shutdown: CancellationToken::new(),
            next_session_id: AtomicU64::new(0),
        })
    }

    /// Admits a new connection: derives its availability policy, assigns it
    /// a fresh monotonic session id, and returns a bound handler.
    pub fn new_session(self: &Arc<Self>, client_address: String) -> SessionHandler<Q> {
        let availability = self.gate.connect();
        let session_id = self.next_session_id.fetch_add(1, Ordering::SeqCst) + 1;
        let session = Arc::new(Session::new(session_id, client_address));
        SessionHandler::new(self.clone(), session, availability)
    }
}

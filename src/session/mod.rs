// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The protocol-agnostic command surface (original spec §4.3): per-session
//! reliable-read bookkeeping, monitor streaming, availability gating and
//! waiter cancellation, generic over the external [`crate::queue::QueueCollection`].

mod broker;
mod handler;

pub use broker::Broker;
pub use handler::{MonitorOutcome, Session, SessionHandler};

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Shared scaffolding for the end-to-end scenarios in original spec §8:
//! a full `Broker` wired to the in-memory `QueueCollection`, driven entirely
//! through `MemcacheAdapter::handle_line`/`handle_set` so these tests cover
//! the same path a real connection would.

use std::sync::Arc;

use bytes::Bytes;
use queue_broker_core::{
    availability::AvailabilityGate,
    cfg::config::BrokerConfig,
    protocol::{Command, MemcacheAdapter, ParsedLine, parse_line},
    session::Broker,
    testutil::InMemoryQueueCollection,
};

pub fn new_broker(max_open_reads: u32) -> Arc<Broker<InMemoryQueueCollection>> {
    let mut config = BrokerConfig::for_tests();
    config.sessions.max_open_reads = max_open_reads;
    let config = Arc::new(config);
    let gate = Arc::new(AvailabilityGate::new(config.availability.thresholds));
    Broker::new(Arc::new(InMemoryQueueCollection::new()), gate, config)
}

pub fn new_adapter(
    broker: &Arc<Broker<InMemoryQueueCollection>>,
    client: &str,
) -> MemcacheAdapter<InMemoryQueueCollection> {
    MemcacheAdapter::new(broker.new_session(client.to_string()))
}

/// Drives a `set <queue> <flags> <expiry> <len>\r\n<data>\r\n` request
/// through the adapter exactly as the transport would, and returns the
/// rendered response line.
pub async fn set(
    adapter: &MemcacheAdapter<InMemoryQueueCollection>,
    queue: &str,
    data: &[u8],
) -> String {
    let line = format!("set {queue} 0 0 {}", data.len());
    match parse_line(&line).unwrap() {
        ParsedLine::AwaitingSetPayload(header) => {
            let (response, _disconnect) = adapter.handle_set(&header, Bytes::copy_from_slice(data)).await;
            render(&response)
        },
        ParsedLine::Command(_) => panic!("set must parse as AwaitingSetPayload"),
    }
}

/// Drives a `get`/`gets` request line and returns `(response, disconnect)`.
pub async fn get(adapter: &MemcacheAdapter<InMemoryQueueCollection>, raw: &str) -> (String, bool) {
    let line = format!("get {raw}");
    match parse_line(&line).unwrap() {
        ParsedLine::Command(cmd) => {
            let (response, disconnect) = adapter.dispatch(cmd).await;
            (render(&response), disconnect)
        },
        ParsedLine::AwaitingSetPayload(_) => unreachable!(),
    }
}

pub async fn confirm(adapter: &MemcacheAdapter<InMemoryQueueCollection>, queue: &str, n: u64) -> String {
    let line = format!("confirm {queue} {n}");
    match parse_line(&line).unwrap() {
        ParsedLine::Command(cmd @ Command::Confirm { .. }) => render(&adapter.dispatch(cmd).await.0),
        _ => unreachable!(),
    }
}

fn render(response: &queue_broker_core::protocol::Response) -> String {
    String::from_utf8(response.render().to_vec()).unwrap()
}

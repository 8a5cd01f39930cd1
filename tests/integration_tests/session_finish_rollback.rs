// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use crate::integration_tests::common::{get, new_adapter, new_broker, set};

/// Original spec §8, scenario 5.
#[tokio::test]
async fn session_finish_rolls_back_pending_reads_across_queues() {
    let broker = new_broker(100);
    let first = new_adapter(&broker, "client-a");

    assert_eq!(set(&first, "a", b"1").await, "STORED\r\n");
    assert_eq!(set(&first, "b", b"2").await, "STORED\r\n");

    let (response, _) = get(&first, "a/open").await;
    assert_eq!(response, "VALUE a 0 1\r\n1\r\nEND\r\n");
    let (response, _) = get(&first, "b/open").await;
    assert_eq!(response, "VALUE b 0 1\r\n2\r\nEND\r\n");

    // Simulates the transport dropping the connection.
    first.handler().finish().await;

    let second = new_adapter(&broker, "client-b");
    let (response, _) = get(&second, "a").await;
    assert_eq!(response, "VALUE a 0 1\r\n1\r\nEND\r\n");
    let (response, _) = get(&second, "b").await;
    assert_eq!(response, "VALUE b 0 1\r\n2\r\nEND\r\n");
}

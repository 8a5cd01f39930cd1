// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use crate::integration_tests::common::{get, new_adapter, new_broker, set};

/// Original spec §8, scenario 3.
#[tokio::test]
async fn abort_returns_item_to_head() {
    let broker = new_broker(100);
    let adapter = new_adapter(&broker, "client-a");

    assert_eq!(set(&adapter, "q", b"X").await, "STORED\r\n");

    let (response, _) = get(&adapter, "q/open").await;
    assert_eq!(response, "VALUE q 0 1\r\nX\r\nEND\r\n");

    let (response, disconnect) = get(&adapter, "q/abort").await;
    assert_eq!(response, "END\r\n");
    assert!(!disconnect);

    let (response, _) = get(&adapter, "q").await;
    assert_eq!(response, "VALUE q 0 1\r\nX\r\nEND\r\n");
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use crate::integration_tests::common::{get, new_adapter, new_broker, set};

/// Original spec §8, scenario 1.
#[tokio::test]
async fn basic_fifo() {
    let broker = new_broker(100);
    let adapter = new_adapter(&broker, "client-a");

    assert_eq!(set(&adapter, "work", b"hello").await, "STORED\r\n");

    let (response, disconnect) = get(&adapter, "work").await;
    assert_eq!(response, "VALUE work 0 5\r\nhello\r\nEND\r\n");
    assert!(!disconnect);

    let (response, disconnect) = get(&adapter, "work").await;
    assert_eq!(response, "END\r\n");
    assert!(!disconnect);
}

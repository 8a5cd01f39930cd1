// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use crate::integration_tests::common::{confirm, get, new_adapter, new_broker, set};

/// Original spec §8, scenario 2.
#[tokio::test]
async fn reliable_read_confirm() {
    let broker = new_broker(100);
    let first = new_adapter(&broker, "client-a");

    assert_eq!(set(&first, "q", b"ABC").await, "STORED\r\n");

    let (response, disconnect) = get(&first, "q/open").await;
    assert_eq!(response, "VALUE q 0 3\r\nABC\r\nEND\r\n");
    assert!(!disconnect);

    // Non-transactional get on a queue with a pending read is a protocol
    // error that disconnects the session.
    let (response, disconnect) = get(&first, "q").await;
    assert!(response.starts_with("ERROR"));
    assert!(disconnect);
    first.handler().finish().await;

    // A fresh connection observes the item still reserved; open+confirm
    // releases it for good.
    let second = new_adapter(&broker, "client-b");
    let (response, disconnect) = get(&second, "q/open").await;
    assert_eq!(response, "VALUE q 0 3\r\nABC\r\nEND\r\n");
    assert!(!disconnect);

    assert_eq!(confirm(&second, "q", 1).await, "END\r\n");

    let (response, _) = get(&second, "q").await;
    assert_eq!(response, "END\r\n");
}

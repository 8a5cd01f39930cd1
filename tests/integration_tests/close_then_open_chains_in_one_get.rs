// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use crate::integration_tests::common::{get, new_adapter, new_broker, set};

/// `close` and `open` are not in the forbidden-combination list (original
/// spec §4.4: only `(peek|abort)` with `(open|close)` is rejected), so
/// `get key/close/open` must confirm the previously opened read and still
/// perform a fresh reliable read in the same request.
#[tokio::test]
async fn close_confirms_previous_read_and_open_still_opens_a_new_one() {
    let broker = new_broker(100);
    let adapter = new_adapter(&broker, "client-a");

    assert_eq!(set(&adapter, "q", b"first").await, "STORED\r\n");
    assert_eq!(set(&adapter, "q", b"second").await, "STORED\r\n");

    let (response, _) = get(&adapter, "q/open").await;
    assert_eq!(response, "VALUE q 0 5\r\nfirst\r\nEND\r\n");

    // Confirms "first" (the close half) and opens a reliable read on
    // "second" (the open half), in one request.
    let (response, disconnect) = get(&adapter, "q/close/open").await;
    assert_eq!(response, "VALUE q 0 6\r\nsecond\r\nEND\r\n");
    assert!(!disconnect);

    // "first" was durably confirmed, not returned to the head. Confirming
    // the still-open "second" as well drains the queue for good.
    let (response, _) = get(&adapter, "q/close").await;
    assert_eq!(response, "END\r\n");
    let (response, _) = get(&adapter, "q").await;
    assert_eq!(response, "END\r\n");
}

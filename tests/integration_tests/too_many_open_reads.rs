// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use crate::integration_tests::common::{get, new_adapter, new_broker, set};

/// Original spec §8, scenario 4.
#[tokio::test]
async fn too_many_open_reads_disconnects() {
    let broker = new_broker(1);
    let adapter = new_adapter(&broker, "client-a");

    for _ in 0..3 {
        assert_eq!(set(&adapter, "q", b"x").await, "STORED\r\n");
    }

    let (response, disconnect) = get(&adapter, "q/open").await;
    assert!(response.starts_with("VALUE"));
    assert!(!disconnect);

    let (response, disconnect) = get(&adapter, "q/open").await;
    assert!(response.starts_with("ERROR"));
    assert!(disconnect);
}

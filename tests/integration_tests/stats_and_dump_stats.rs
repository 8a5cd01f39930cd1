// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use queue_broker_core::protocol::Command;

use crate::integration_tests::common::{new_adapter, new_broker, set};

#[tokio::test]
async fn stats_reports_command_counters() {
    let broker = new_broker(100);
    let adapter = new_adapter(&broker, "client-a");

    set(&adapter, "q", b"x").await;

    let (response, disconnect) = adapter.dispatch(Command::Stats).await;
    assert!(!disconnect);
    let rendered = String::from_utf8(response.render().to_vec()).unwrap();
    assert!(rendered.contains("STAT cmd_set 1"));
    assert!(rendered.ends_with("END\r\n"));
}

#[tokio::test]
async fn dump_stats_lists_queue_names_sorted() {
    let broker = new_broker(100);
    let adapter = new_adapter(&broker, "client-a");

    set(&adapter, "zebra", b"x").await;
    set(&adapter, "alpha", b"y").await;

    let (response, _) = adapter.dispatch(Command::DumpStats { queues: Vec::new() }).await;
    let rendered = String::from_utf8(response.render().to_vec()).unwrap();

    let alpha_pos = rendered.find("STAT alpha").unwrap();
    let zebra_pos = rendered.find("STAT zebra").unwrap();
    assert!(alpha_pos < zebra_pos);
    assert!(rendered.ends_with("END\r\n"));
}

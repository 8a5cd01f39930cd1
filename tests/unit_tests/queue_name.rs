// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use queue_broker_core::queue::QueueName;

#[test]
fn accepts_plain_names() {
    assert!(QueueName::parse("work").is_ok());
    assert!(QueueName::parse("work-items_2").is_ok());
}

#[test]
fn rejects_empty_name() {
    assert!(QueueName::parse("").is_err());
}

#[test]
fn rejects_slash_in_name() {
    assert!(QueueName::parse("a/b").is_err());
    assert!(QueueName::parse("/leading").is_err());
    assert!(QueueName::parse("trailing/").is_err());
}

#[test]
fn display_round_trips_the_raw_string() {
    let q = QueueName::parse("orders").unwrap();
    assert_eq!(q.as_str(), "orders");
    assert_eq!(format!("{q}"), "orders");
}

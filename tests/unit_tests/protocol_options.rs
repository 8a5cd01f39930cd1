// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::{Duration, SystemTime};

use queue_broker_core::protocol::{GetOptions, normalize_expiry};

#[test]
fn plain_key_has_no_options() {
    let (key, opts) = GetOptions::parse("work").unwrap();
    assert_eq!(key, "work");
    assert_eq!(opts, GetOptions::default());
}

#[test]
fn open_and_close_are_forbidden_with_peek_or_abort() {
    assert!(GetOptions::parse("q/open/peek").is_err());
    assert!(GetOptions::parse("q/close/abort").is_err());
}

#[test]
fn open_and_close_may_combine_with_each_other() {
    // Neither invariant in original spec §4.4 forbids open+close together;
    // only (peek|abort) combined with (open|close) is rejected.
    let (_, opts) = GetOptions::parse("q/open/close").unwrap();
    assert!(opts.open && opts.close);
}

#[test]
fn unknown_option_is_rejected() {
    assert!(GetOptions::parse("q/bogus").is_err());
}

#[test]
fn bad_timeout_value_is_rejected() {
    assert!(GetOptions::parse("q/t=notanumber").is_err());
}

#[test]
fn expiry_boundary_at_one_million_is_absolute() {
    let now = SystemTime::now();
    let boundary = normalize_expiry(1_000_000, now).unwrap();
    assert_eq!(boundary, SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000));

    let just_under = normalize_expiry(999_999, now).unwrap();
    assert!(just_under > now);
}

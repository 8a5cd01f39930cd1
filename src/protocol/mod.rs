// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Wire-level command parsing and response formatting (original spec §4.4).
//! Parsing/formatting only; transport (accept loop, byte framing) is out of
//! scope for this crate (original spec §1) and lives in the binary entry
//! point.

mod memcache_adapter;

pub use memcache_adapter::{
    Command, GetOptions, MemcacheAdapter, ParsedLine, Response, SetHeader, normalize_expiry,
    parse_line,
};

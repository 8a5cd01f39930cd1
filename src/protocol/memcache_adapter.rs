// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Command-line parsing, option decoding and response formatting for the
//! memcache-compatible text protocol (original spec §4.4, §6).

use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::{Duration, SystemTime},
};

use bytes::{BufMut, Bytes, BytesMut};
use tokio::sync::mpsc;
use tracing::warn;

use crate::{
    availability::Status,
    error::SessionError,
    queue::{Item, QueueCollection, QueueName},
    session::{MonitorOutcome, SessionHandler},
};

/// Reliable-read options parsed from `get <key>[/opt]*` (original spec §6).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GetOptions {
    pub timeout: Option<Duration>,
    pub open: bool,
    pub close: bool,
    pub abort: bool,
    pub peek: bool,
}

impl GetOptions {
    /// Splits `key[/opt]*` and validates the forbidden option combinations:
    /// `(peek|abort)` with `(open|close)`, and `peek` with `abort`.
    pub fn parse(raw: &str) -> Result<(String, Self), SessionError> {
        let mut parts = raw.split('/');
        let key = parts.next().unwrap_or("").to_string();
        if key.is_empty() {
            return Err(SessionError::Protocol {
                op: "get",
                detail: "empty key".to_string(),
            });
        }

        let mut opts = GetOptions::default();
        for opt in parts {
            if let Some(ms) = opt.strip_prefix("t=") {
                let ms: u64 = ms.parse().map_err(|_| SessionError::Protocol {
                    op: "get",
                    detail: format!("bad timeout option {opt:?}"),
                })?;
                opts.timeout = Some(Duration::from_millis(ms));
                continue;
            }
            match opt {
                "open" => opts.open = true,
                "close" => opts.close = true,
                "abort" => opts.abort = true,
                "peek" => opts.peek = true,
                other => {
                    return Err(SessionError::Protocol {
                        op: "get",
                        detail: format!("unknown option {other:?}"),
                    });
                },
            }
        }

        if (opts.peek || opts.abort) && (opts.open || opts.close) {
            return Err(SessionError::Protocol {
                op: "get",
                detail: "peek/abort cannot combine with open/close".to_string(),
            });
        }
        if opts.peek && opts.abort {
            return Err(SessionError::Protocol {
                op: "get",
                detail: "peek cannot combine with abort".to_string(),
            });
        }

        Ok((key, opts))
    }

    fn is_transactional(&self) -> bool {
        self.open || self.close || self.abort || self.peek
    }
}

/// Normalizes the `set` expiry field (original spec §6): `0` means no
/// expiry, values below one million are seconds-from-now, otherwise the
/// value is an absolute unix-seconds timestamp.
pub fn normalize_expiry(raw: u64, now: SystemTime) -> Option<SystemTime> {
    if raw == 0 {
        None
    } else if raw < 1_000_000 {
        Some(now + Duration::from_secs(raw))
    } else {
        Some(SystemTime::UNIX_EPOCH + Duration::from_secs(raw))
    }
}

/// One parsed request line. `set` is handled out of band via
/// [`MemcacheAdapter::handle_set`] once the transport has read its binary
/// payload, since framing is out of this crate's scope (original spec §1).
#[derive(Debug, Clone)]
pub enum Command {
    Get { key: String, options: GetOptions },
    Monitor { key: String, timeout: Duration, max_items: Option<u64> },
    Confirm { key: String, count: usize },
    Delete { key: String },
    Flush { key: String },
    FlushAll,
    FlushExpired { key: String },
    FlushAllExpired,
    Stats,
    DumpStats { queues: Vec<String> },
    Status { requested: Option<Status> },
    Version,
    Reload,
    Shutdown,
    Quit,
}

/// Header of a `set` request; the transport reads `len` bytes plus a
/// trailing CRLF and passes them to [`MemcacheAdapter::handle_set`].
#[derive(Debug, Clone)]
pub struct SetHeader {
    pub key: String,
    pub flags: u32,
    pub expiry_raw: u64,
    pub len: usize,
}

/// Either a complete command or the header of a `set` awaiting its payload.
#[derive(Debug, Clone)]
pub enum ParsedLine {
    Command(Command),
    AwaitingSetPayload(SetHeader),
}

/// A response the transport renders to the wire. `render` is binary-safe:
/// payload bytes are never interpreted as UTF-8.
#[derive(Debug, Clone)]
pub enum Response {
    /// A single line (the transport appends CRLF).
    Line(String),
    /// `VALUE <key> <flags> <len>\r\n<data>\r\nEND`.
    Value { key: String, flags: u32, data: Bytes },
    /// Several lines followed by a trailing `END`.
    Lines(Vec<String>),
    /// No body at all (`shutdown`/`quit`).
    Empty,
}

impl Response {
    pub fn render(&self) -> Bytes {
        match self {
            Response::Line(s) => {
                let mut b = BytesMut::with_capacity(s.len() + 2);
                b.put(s.as_bytes());
                b.put(&b"\r\n"[..]);
                b.freeze()
            },
            Response::Value { key, flags, data } => {
                let header = format!("VALUE {key} {flags} {}\r\n", data.len());
                let mut b = BytesMut::with_capacity(header.len() + data.len() + 7);
                b.put(header.as_bytes());
                b.put(data.clone());
                b.put(&b"\r\nEND\r\n"[..]);
                b.freeze()
            },
            Response::Lines(lines) => {
                let mut b = BytesMut::new();
                for line in lines {
                    b.put(line.as_bytes());
                    b.put(&b"\r\n"[..]);
                }
                b.put(&b"END\r\n"[..]);
                b.freeze()
            },
            Response::Empty => Bytes::new(),
        }
    }
}

/// Parses one request line (already stripped of its trailing CRLF).
pub fn parse_line(line: &str) -> Result<ParsedLine, SessionError> {
    let mut tokens = line.split_whitespace();
    let verb = tokens.next().ok_or_else(|| SessionError::Protocol {
        op: "parse",
        detail: "empty command line".to_string(),
    })?;

    let bad = |op: &'static str| SessionError::Protocol {
        op,
        detail: format!("malformed {op} command: {line:?}"),
    };

    let command = match verb {
        "get" | "gets" => {
            let raw = tokens.next().ok_or_else(|| bad("get"))?;
            let (key, options) = GetOptions::parse(raw)?;
            Command::Get { key, options }
        },
        "monitor" => {
            let key = tokens.next().ok_or_else(|| bad("monitor"))?.to_string();
            let secs: u64 =
                tokens.next().ok_or_else(|| bad("monitor"))?.parse().map_err(|_| bad("monitor"))?;
            let max_items =
                tokens.next().map(|s| s.parse::<u64>()).transpose().map_err(|_| bad("monitor"))?;
            Command::Monitor { key, timeout: Duration::from_secs(secs), max_items }
        },
        "confirm" => {
            let key = tokens.next().ok_or_else(|| bad("confirm"))?.to_string();
            let count: usize =
                tokens.next().ok_or_else(|| bad("confirm"))?.parse().map_err(|_| bad("confirm"))?;
            Command::Confirm { key, count }
        },
        "set" => {
            let key = tokens.next().ok_or_else(|| bad("set"))?.to_string();
            let flags: u32 =
                tokens.next().ok_or_else(|| bad("set"))?.parse().map_err(|_| bad("set"))?;
            let expiry_raw: u64 =
                tokens.next().ok_or_else(|| bad("set"))?.parse().map_err(|_| bad("set"))?;
            let len: usize =
                tokens.next().ok_or_else(|| bad("set"))?.parse().map_err(|_| bad("set"))?;
            return Ok(ParsedLine::AwaitingSetPayload(SetHeader { key, flags, expiry_raw, len }));
        },
        "delete" => Command::Delete { key: tokens.next().ok_or_else(|| bad("delete"))?.to_string() },
        "flush" => Command::Flush { key: tokens.next().ok_or_else(|| bad("flush"))?.to_string() },
        "flush_all" => Command::FlushAll,
        "flush_expired" => {
            Command::FlushExpired { key: tokens.next().ok_or_else(|| bad("flush_expired"))?.to_string() }
        },
        "flush_all_expired" => Command::FlushAllExpired,
        "stats" => Command::Stats,
        "dump_stats" => Command::DumpStats { queues: tokens.map(str::to_string).collect() },
        "status" => {
            let requested = match tokens.next() {
                None => None,
                Some("up") => Some(Status::Up),
                Some("readonly") => Some(Status::ReadOnly),
                Some("quiescent") => Some(Status::Quiescent),
                Some(_) => return Err(bad("status")),
            };
            Command::Status { requested }
        },
        "version" => Command::Version,
        "reload" => Command::Reload,
        "shutdown" => Command::Shutdown,
        "quit" => Command::Quit,
        _ => {
            return Err(SessionError::Protocol {
                op: "parse",
                detail: format!("unknown command {verb:?}"),
            });
        },
    };
    Ok(ParsedLine::Command(command))
}

/// Binds a [`SessionHandler`] to the wire protocol: dispatches parsed
/// commands, maps `SessionError` onto the right wire verb, and logs the
/// first client-induced error per session (original spec §7).
pub struct MemcacheAdapter<Q: QueueCollection> {
    handler: SessionHandler<Q>,
    logged_client_error: AtomicBool,
}

impl<Q: QueueCollection> MemcacheAdapter<Q> {
    pub fn new(handler: SessionHandler<Q>) -> Self {
        Self { handler, logged_client_error: AtomicBool::new(false) }
    }

    pub fn handler(&self) -> &SessionHandler<Q> {
        &self.handler
    }

    /// Dispatches one non-`set`, non-`monitor` command to exactly one
    /// response. Returns `(response, disconnect)`.
    pub async fn dispatch(&self, command: Command) -> (Response, bool) {
        match command {
            Command::Get { key, options } => self.handle_get(key, options).await,
            Command::Confirm { key, count } => self.handle_confirm(key, count).await,
            Command::Delete { key } => self.handle_delete(key).await,
            Command::Flush { key } => self.handle_flush(key).await,
            Command::FlushAll => self.handle_flush_all().await,
            Command::FlushExpired { key } => self.handle_flush_expired(key).await,
            Command::FlushAllExpired => self.handle_flush_all_expired().await,
            Command::Stats => self.handle_stats().await,
            Command::DumpStats { queues } => self.handle_dump_stats(queues).await,
            Command::Status { requested } => self.handle_status(requested),
            Command::Version => (
                Response::Line(format!("VERSION {}", self.handler.config().server.version)),
                false,
            ),
            Command::Reload => (Response::Line("Reloaded config.".to_string()), false),
            Command::Shutdown => {
                self.handler.shutdown();
                (Response::Empty, true)
            },
            Command::Monitor { .. } => (
                Response::Line(
                    "CLIENT_ERROR monitor must be dispatched via handle_monitor".to_string(),
                ),
                true,
            ),
            Command::Quit => (Response::Empty, true),
        }
    }

    /// Parses and dispatches one request line directly; malformed lines
    /// become `CLIENT_ERROR`+disconnect (original spec §7).
    pub async fn handle_line(&self, line: &str) -> (Response, bool) {
        match parse_line(line) {
            Ok(ParsedLine::Command(cmd)) => self.dispatch(cmd).await,
            Ok(ParsedLine::AwaitingSetPayload(_)) => (
                Response::Line(
                    "CLIENT_ERROR set requires a payload, use handle_set".to_string(),
                ),
                true,
            ),
            Err(e) => self.error_response(e),
        }
    }

    pub async fn handle_set(&self, header: &SetHeader, data: Bytes) -> (Response, bool) {
        let queue = match QueueName::parse(&header.key) {
            Ok(q) => q,
            Err(e) => return self.error_response(e),
        };
        let expiry = normalize_expiry(header.expiry_raw, SystemTime::now());
        match self.handler.set_item(&queue, header.flags, expiry, data).await {
            Ok(true) => (Response::Line("STORED".to_string()), false),
            Ok(false) => (Response::Line("NOT_STORED".to_string()), false),
            Err(e) => self.error_response(e),
        }
    }

    /// Streams a `monitor` response: one `VALUE` per item, concluded by a
    /// single `END` once the handler's fetch loop terminates.
    pub async fn handle_monitor(
        &self,
        key: &str,
        timeout: Duration,
        max_items: Option<u64>,
        tx: mpsc::Sender<Bytes>,
    ) -> Result<MonitorOutcome, SessionError> {
        let queue = QueueName::parse(key)?;
        let deadline = Some(tokio::time::Instant::now() + timeout);
        let (item_tx, mut item_rx) = mpsc::channel::<Item>(16);
        let key_owned = key.to_string();
        let render_task = tokio::spawn(async move {
            while let Some(item) = item_rx.recv().await {
                let response =
                    Response::Value { key: key_owned.clone(), flags: item.flags, data: item.data };
                if tx.send(rendered_value_without_end(&response)).await.is_err() {
                    break;
                }
            }
        });

        let outcome = self.handler.monitor_until(&queue, deadline, max_items, false, item_tx).await;
        let _ = render_task.await;
        Ok(outcome)
    }

    async fn handle_get(&self, key: String, options: GetOptions) -> (Response, bool) {
        let queue = match QueueName::parse(&key) {
            Ok(q) => q,
            Err(e) => return self.error_response(e),
        };

        if !options.is_transactional() {
            if let Err(e) = self.handler.check_transactional(&queue).await {
                return self.error_response(e);
            }
        }

        if options.abort {
            self.handler.abort_read(&queue).await;
            return (Response::Line("END".to_string()), false);
        }
        if options.close {
            self.handler.close_read(&queue).await;
            if !options.open {
                return (Response::Line("END".to_string()), false);
            }
        }

        let deadline = options.timeout.map(|d| tokio::time::Instant::now() + d);
        match self.handler.get_item(&queue, deadline, options.open, options.peek).await {
            Ok(Some(item)) => (Response::Value { key, flags: item.flags, data: item.data }, false),
            Ok(None) => (Response::Line("END".to_string()), false),
            Err(e) => self.error_response(e),
        }
    }

    async fn handle_confirm(&self, key: String, count: usize) -> (Response, bool) {
        let queue = match QueueName::parse(&key) {
            Ok(q) => q,
            Err(e) => return self.error_response(e),
        };
        let confirmed = self.handler.close_reads(&queue, count).await;
        (Response::Line(if confirmed { "END".to_string() } else { "ERROR".to_string() }), false)
    }

    async fn handle_delete(&self, key: String) -> (Response, bool) {
        let queue = match QueueName::parse(&key) {
            Ok(q) => q,
            Err(e) => return self.error_response(e),
        };
        match self.handler.delete(&queue).await {
            Ok(()) => (Response::Line("DELETED".to_string()), false),
            Err(e) => self.error_response(e),
        }
    }

    async fn handle_flush(&self, key: String) -> (Response, bool) {
        let queue = match QueueName::parse(&key) {
            Ok(q) => q,
            Err(e) => return self.error_response(e),
        };
        match self.handler.flush(&queue).await {
            Ok(()) => (Response::Line("END".to_string()), false),
            Err(e) => self.error_response(e),
        }
    }

    async fn handle_flush_all(&self) -> (Response, bool) {
        match self.handler.flush_all_queues().await {
            Ok(()) => (Response::Line("Flushed all queues.".to_string()), false),
            Err(e) => self.error_response(e),
        }
    }

    async fn handle_flush_expired(&self, key: String) -> (Response, bool) {
        let queue = match QueueName::parse(&key) {
            Ok(q) => q,
            Err(e) => return self.error_response(e),
        };
        match self.handler.flush_expired(&queue).await {
            Ok(count) => (Response::Line(count.to_string()), false),
            Err(e) => self.error_response(e),
        }
    }

    async fn handle_flush_all_expired(&self) -> (Response, bool) {
        match self.handler.flush_all_expired().await {
            Ok(count) => (Response::Line(count.to_string()), false),
            Err(e) => self.error_response(e),
        }
    }

    async fn handle_stats(&self) -> (Response, bool) {
        let lines = self
            .handler
            .metrics()
            .render_stat_lines()
            .into_iter()
            .map(|(k, v)| format!("STAT {k} {v}"))
            .collect();
        (Response::Lines(lines), false)
    }

    async fn handle_dump_stats(&self, queues: Vec<String>) -> (Response, bool) {
        let mut names = if queues.is_empty() { self.handler.queue_names().await } else { queues };
        names.sort();
        let mut lines = Vec::new();
        for name in names {
            let Ok(queue) = QueueName::parse(&name) else { continue };
            let stats = self.handler.queue_stats(&queue).await;
            let mut keys: Vec<_> = stats.keys().cloned().collect();
            keys.sort();
            for k in keys {
                lines.push(format!("STAT {name} {k} {}", stats[&k]));
            }
        }
        (Response::Lines(lines), false)
    }

    fn handle_status(&self, requested: Option<Status>) -> (Response, bool) {
        match requested {
            None => match self.handler.current_status() {
                Ok(status) => (Response::Line(status.to_string()), false),
                Err(e) => self.error_response(e),
            },
            Some(status) => match self.handler.set_status(status) {
                Ok(()) => (Response::Line("END".to_string()), false),
                Err(e) => self.error_response(e),
            },
        }
    }

    /// Public entry point for a request line that failed to parse: maps the
    /// error onto the right wire verb the same way a dispatched command
    /// would (original spec §7).
    pub async fn dispatch_error(&self, err: SessionError) -> (Response, bool) {
        self.error_response(err)
    }

    fn error_response(&self, err: SessionError) -> (Response, bool) {
        let disconnect = err.is_terminal();
        if matches!(err, SessionError::Protocol { .. })
            && !self.logged_client_error.swap(true, Ordering::SeqCst)
        {
            warn!(session = self.handler.session_id(), error = %err, "client error");
        }

        let line = match &err {
            SessionError::Protocol { .. } => format!("CLIENT_ERROR {err}"),
            SessionError::Unavailable { .. } => format!("SERVER_ERROR {err}"),
            SessionError::StorageIo(_) => format!("SERVER_ERROR {err}"),
            SessionError::TransactionViolation { .. }
            | SessionError::TooManyOpenReads { .. }
            | SessionError::StatusNotConfigured => "ERROR".to_string(),
        };
        (Response::Line(line), disconnect)
    }
}

/// Renders a streamed monitor item as `VALUE …\r\n<data>\r\n` without the
/// trailing `END` (that's appended once, after the stream closes).
fn rendered_value_without_end(response: &Response) -> Bytes {
    let Response::Value { key, flags, data } = response else {
        return Bytes::new();
    };
    let header = format!("VALUE {key} {flags} {}\r\n", data.len());
    let mut b = BytesMut::with_capacity(header.len() + data.len() + 2);
    b.put(header.as_bytes());
    b.put(data.clone());
    b.put(&b"\r\n"[..]);
    b.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_get_with_open_option() {
        let (key, opts) = GetOptions::parse("work/open/t=500").unwrap();
        assert_eq!(key, "work");
        assert!(opts.open);
        assert_eq!(opts.timeout, Some(Duration::from_millis(500)));
    }

    #[test]
    fn rejects_peek_with_open() {
        assert!(GetOptions::parse("work/peek/open").is_err());
    }

    #[test]
    fn rejects_peek_with_abort() {
        assert!(GetOptions::parse("work/peek/abort").is_err());
    }

    #[test]
    fn rejects_empty_key() {
        assert!(GetOptions::parse("/open").is_err());
    }

    #[test]
    fn expiry_zero_is_none() {
        let now = SystemTime::now();
        assert_eq!(normalize_expiry(0, now), None);
    }

    #[test]
    fn expiry_below_threshold_is_relative() {
        let now = SystemTime::now();
        let expiry = normalize_expiry(60, now).unwrap();
        assert!(expiry > now);
        assert!(expiry <= now + Duration::from_secs(61));
    }

    #[test]
    fn expiry_above_threshold_is_absolute() {
        let now = SystemTime::now();
        let expiry = normalize_expiry(2_000_000_000, now).unwrap();
        assert_eq!(expiry, SystemTime::UNIX_EPOCH + Duration::from_secs(2_000_000_000));
    }

    #[test]
    fn parses_set_header() {
        match parse_line("set work 0 60 5").unwrap() {
            ParsedLine::AwaitingSetPayload(h) => {
                assert_eq!(h.key, "work");
                assert_eq!(h.flags, 0);
                assert_eq!(h.expiry_raw, 60);
                assert_eq!(h.len, 5);
            },
            _ => panic!("expected AwaitingSetPayload"),
        }
    }

    #[test]
    fn unknown_command_is_protocol_error() {
        assert!(parse_line("frobnicate work").is_err());
    }

    #[test]
    fn renders_value_response() {
        let r = Response::Value { key: "q".to_string(), flags: 0, data: Bytes::from_static(b"hi") };
        assert_eq!(&r.render()[..], b"VALUE q 0 2\r\nhi\r\nEND\r\n");
    }
}

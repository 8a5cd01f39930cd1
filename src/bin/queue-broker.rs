// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Transport entry point: accepts TCP connections, frames the
//! memcache-compatible line protocol, and drives one `MemcacheAdapter` per
//! connection. Framing and the connection-accept loop are explicitly out of
//! the library core's scope (original spec §1); this binary is the thinnest
//! wiring that makes the core runnable, mirroring the teacher's own
//! standalone `main.rs` entry point.

use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Parser;
use queue_broker_core::{
    availability::AvailabilityGate,
    cfg::{cli::resolve_config_path, config::BrokerConfig, logger::init_logger},
    protocol::{self, MemcacheAdapter},
    session::Broker,
    testutil::InMemoryQueueCollection,
};
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "queue-broker", about = "Durable, in-order, per-queue message broker")]
struct Args {
    /// Path to the broker's YAML configuration file.
    #[arg(long, default_value = "config/broker.yaml")]
    config: String,
    /// Path to the logger's YAML configuration file.
    #[arg(long, default_value = "config/logger.yaml")]
    log_config: String,
    /// Address to bind the text-protocol listener to.
    #[arg(long, default_value = "127.0.0.1:22133")]
    bind: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let _guard = match init_logger(&args.log_config) {
        Ok(g) => Some(g),
        Err(e) => {
            eprintln!("failed to initialize logger, falling back to stderr: {e:#}");
            None
        },
    };

    let config_path = resolve_config_path(&args.config).unwrap_or_else(|_| args.config.clone().into());
    let config = Arc::new(
        BrokerConfig::load_from_file(&config_path)
            .with_context(|| format!("failed to load config from {config_path:?}"))
            .unwrap_or_else(|e| {
                warn!(error = %e, "using default configuration");
                BrokerConfig::default()
            }),
    );

    let gate = Arc::new(AvailabilityGate::new(config.availability.thresholds));
    let queues = Arc::new(InMemoryQueueCollection::new());
    let broker = Broker::new(queues, gate, config);

    let listener = TcpListener::bind(&args.bind).await.context("failed to bind listener")?;
    info!(addr = %args.bind, "queue-broker listening");

    loop {
        tokio::select! {
            _ = broker.shutdown.cancelled() => {
                info!("shutdown requested, closing listener");
                break;
            }
            accepted = listener.accept() => {
                let (socket, peer) = accepted.context("accept failed")?;
                let handler = broker.new_session(peer.to_string());
                tokio::spawn(async move {
                    if let Err(e) = serve_connection(socket, handler).await {
                        error!(peer = %peer, error = %e, "connection ended with error");
                    }
                });
            }
        }
    }

    Ok(())
}

async fn serve_connection(
    socket: TcpStream,
    handler: queue_broker_core::session::SessionHandler<InMemoryQueueCollection>,
) -> Result<()> {
    let adapter = MemcacheAdapter::new(handler);
    let (read_half, mut write_half) = socket.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    loop {
        line.clear();
        let n = reader.read_line(&mut line).await.context("read failed")?;
        if n == 0 {
            break;
        }
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            continue;
        }

        match protocol::parse_line(trimmed) {
            Ok(protocol::ParsedLine::AwaitingSetPayload(header)) => {
                let mut buf = vec![0u8; header.len];
                reader.read_exact(&mut buf).await.context("failed reading set payload")?;
                let mut crlf = [0u8; 2];
                reader.read_exact(&mut crlf).await.context("failed reading set trailer")?;
                let (response, disconnect) =
                    adapter.handle_set(&header, Bytes::from(buf)).await;
                write_half.write_all(&response.render()).await?;
                if disconnect {
                    break;
                }
            },
            Ok(protocol::ParsedLine::Command(protocol::Command::Monitor {
                key,
                timeout,
                max_items,
            })) => {
                let (tx, mut rx) = tokio::sync::mpsc::channel::<Bytes>(16);
                let monitor_adapter = &adapter;
                let monitor = monitor_adapter.handle_monitor(&key, timeout, max_items, tx);
                tokio::pin!(monitor);
                loop {
                    tokio::select! {
                        chunk = rx.recv() => {
                            match chunk {
                                Some(bytes) => write_half.write_all(&bytes).await?,
                                None => break,
                            }
                        }
                        outcome = &mut monitor => {
                            outcome.ok();
                            break;
                        }
                    }
                }
                write_half.write_all(b"END\r\n").await?;
            },
            Ok(protocol::ParsedLine::Command(cmd)) => {
                let (response, disconnect) = adapter.dispatch(cmd).await;
                write_half.write_all(&response.render()).await?;
                if disconnect {
                    break;
                }
            },
            Err(e) => {
                let (response, disconnect) = adapter.dispatch_error(e).await;
                write_half.write_all(&response.render()).await?;
                if disconnect {
                    break;
                }
            },
        }
    }

    adapter.handler().finish().await;
    Ok(())
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use queue_broker_core::storage::{FsyncMode, PeriodicSyncStorage};

fn temp_path(tag: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("queue-broker-core-test-{tag}-{}.log", std::process::id()))
}

#[test]
fn from_period_maps_zero_to_synchronous_and_none_to_never() {
    assert!(matches!(FsyncMode::from_period(Some(Duration::ZERO)), FsyncMode::Synchronous));
    assert!(matches!(FsyncMode::from_period(None), FsyncMode::Never));
    assert!(matches!(
        FsyncMode::from_period(Some(Duration::from_millis(50))),
        FsyncMode::Grouped(d) if d == Duration::from_millis(50)
    ));
}

#[tokio::test]
async fn synchronous_mode_persists_bytes_through_a_real_file() {
    let path = temp_path("sync");
    let file = tokio::fs::File::create(&path).await.unwrap();
    let storage = PeriodicSyncStorage::new(file, FsyncMode::Synchronous).await.unwrap();

    storage.write(b"hello world").await.unwrap();
    storage.close().await;

    let contents = tokio::fs::read(&path).await.unwrap();
    assert_eq!(contents, b"hello world");
    let _ = tokio::fs::remove_file(&path).await;
}

#[tokio::test(start_paused = true)]
async fn grouped_mode_eventually_resolves_every_write() {
    let path = temp_path("grouped");
    let file = tokio::fs::File::create(&path).await.unwrap();
    let storage =
        PeriodicSyncStorage::new(file, FsyncMode::Grouped(Duration::from_millis(20))).await.unwrap();

    let a = storage.write(b"a").await;
    let b = storage.write(b"b").await;
    assert!(a.is_ok());
    assert!(b.is_ok());

    storage.close().await;
    let contents = tokio::fs::read(&path).await.unwrap();
    assert_eq!(contents, b"ab");
    let _ = tokio::fs::remove_file(&path).await;
}

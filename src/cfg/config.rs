// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fs, path::Path, time::Duration};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

use crate::availability::{AvailabilityThresholds, Status};

/// Top-level broker configuration, loaded from YAML at startup.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct BrokerConfig {
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub availability: AvailabilityConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Per-session limits (original spec §4.3, §9).
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SessionsConfig {
    /// Bound on a single queue's pending-read count for one session.
    #[serde(default = "default_max_open_reads")]
    pub max_open_reads: u32,
    /// Delay before a `shutdown` command tears down the transport, giving
    /// the response time to flush (original spec §9's "shutdown delay").
    #[serde(default = "default_shutdown_delay", with = "serde_millis")]
    pub shutdown_delay: Duration,
}

fn default_max_open_reads() -> u32 {
    100
}

fn default_shutdown_delay() -> Duration {
    Duration::from_millis(100)
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            max_open_reads: default_max_open_reads(),
            shutdown_delay: default_shutdown_delay(),
        }
    }
}

/// Durable write path configuration (original spec §4.2).
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct StorageConfig {
    /// Fsync period in milliseconds. `Some(0)` selects synchronous mode
    /// (fsync after every write); `None` selects never-sync mode; any other
    /// value selects grouped mode with that period.
    #[serde(default)]
    pub sync_period_ms: Option<u64>,
}

impl StorageConfig {
    pub fn fsync_mode(&self) -> crate::storage::FsyncMode {
        crate::storage::FsyncMode::from_period(self.sync_period_ms.map(Duration::from_millis))
    }
}

/// Admission policy configuration (original spec §4.5).
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct AvailabilityConfig {
    #[serde(default)]
    pub thresholds: AvailabilityThresholds,
    /// Whether a shared `ServerStatus` is installed at all; when false,
    /// `status`/`markUp`/etc. fail with `StatusNotConfigured`.
    #[serde(default)]
    pub status_enabled: bool,
    #[serde(default)]
    pub initial_status: Status,
}

/// Server identity reported by `version` and used in log lines.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { version: default_version() }
    }
}

impl BrokerConfig {
    /// Loads the configuration from YAML, validates it, and returns the
    /// ready-to-use value.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let mut cfg: BrokerConfig =
            serde_yaml::from_str(&s).context("failed to parse config YAML")?;
        cfg.validate_and_normalize()?;
        Ok(cfg)
    }

    /// Validates invariants and normalizes derived fields.
    pub fn validate_and_normalize(&mut self) -> Result<()> {
        ensure!(self.sessions.max_open_reads >= 1, "sessions.max_open_reads must be >= 1");
        ensure!(!self.server.version.is_empty(), "server.version must not be empty");
        Ok(())
    }

    /// A small, deterministic configuration for this crate's own tests.
    pub fn for_tests() -> Self {
        Self {
            sessions: SessionsConfig { max_open_reads: 1, ..SessionsConfig::default() },
            ..Self::default()
        }
    }
}

/// Serde helper for representing `Duration` as a number of milliseconds.
mod serde_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(d)?;
        Ok(Duration::from_millis(ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let mut cfg = BrokerConfig::default();
        assert!(cfg.validate_and_normalize().is_ok());
    }

    #[test]
    fn rejects_zero_max_open_reads() {
        let mut cfg = BrokerConfig { sessions: SessionsConfig { max_open_reads: 0, ..SessionsConfig::default() }, ..BrokerConfig::default() };
        assert!(cfg.validate_and_normalize().is_err());
    }

    #[test]
    fn parses_yaml() {
        let yaml = r#"
sessions:
  max_open_reads: 50
  shutdown_delay: 250
storage:
  sync_period_ms: 100
availability:
  thresholds:
    refuse_writes_above: 1000
    refuse_reads_above: 2000
  status_enabled: true
server:
  version: "2.3.1"
"#;
        let mut cfg: BrokerConfig = serde_yaml::from_str(yaml).unwrap();
        cfg.validate_and_normalize().unwrap();
        assert_eq!(cfg.sessions.max_open_reads, 50);
        assert_eq!(cfg.sessions.shutdown_delay, Duration::from_millis(250));
        assert_eq!(cfg.storage.sync_period_ms, Some(100));
        assert_eq!(cfg.availability.thresholds.refuse_writes_above, 1000);
        assert!(cfg.availability.status_enabled);
        assert_eq!(cfg.server.version, "2.3.1");
    }
}

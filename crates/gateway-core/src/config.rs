//! Gateway configuration (spec §6's defaults table).
//!
//! # Design summary
//! - **Why**: every tunable the spec names needs one canonical default so
//!   `GatewayConfig::default()` and a loaded TOML file agree when a field is
//!   omitted; `serde(deny_unknown_fields)` catches config typos at startup
//!   rather than silently ignoring them.
//! - **What**: durations are stored in seconds/milliseconds as plain
//!   integers at the TOML layer (so the format stays diffable) and exposed
//!   as [`std::time::Duration`] through accessor methods.

use std::time::Duration;

use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct GatewayConfig {
    pub max_connections: usize,
    pub heartbeat_interval_secs: u64,
    pub heartbeat_timeout_secs: u64,
    pub handshake_timeout_secs: u64,
    pub auth_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub write_timeout_secs: u64,
    pub pong_timeout_secs: u64,
    pub max_message_size_bytes: usize,
    pub registry_ttl_secs: u64,
    pub registry_renew_interval_secs: u64,
    pub max_messages_per_second: u32,
    pub user_cache_ttl_secs: u64,
    pub group_cache_ttl_secs: u64,
    pub large_group_threshold: usize,
    pub mailbox_capacity: usize,
    pub dedup_ttl_secs: u64,
    pub routing_call_timeout_secs: u64,
    pub registry_call_timeout_secs: u64,
    pub push_write_timeout_secs: u64,
    pub shutdown_drain_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_connections: 100_000,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            handshake_timeout_secs: 10,
            auth_timeout_secs: 3,
            read_timeout_secs: 90,
            write_timeout_secs: 10,
            pong_timeout_secs: 60,
            max_message_size_bytes: 10 * 1024,
            registry_ttl_secs: 90,
            registry_renew_interval_secs: 30,
            max_messages_per_second: 100,
            user_cache_ttl_secs: 5 * 60,
            group_cache_ttl_secs: 5 * 60,
            large_group_threshold: 1_000,
            mailbox_capacity: 256,
            dedup_ttl_secs: 7 * 24 * 60 * 60,
            routing_call_timeout_secs: 5,
            registry_call_timeout_secs: 3,
            push_write_timeout_secs: 1,
            shutdown_drain_secs: 10,
        }
    }
}

impl GatewayConfig {
    /// Parses a TOML document, rejecting unknown keys. Missing keys fall
    /// back to [`GatewayConfig::default`].
    pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Hard ceiling on total connection inactivity (spec §6: "Close
    /// connection when no activity within this window"), enforced by the
    /// heartbeat task alongside `pong_timeout`.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.pong_timeout_secs)
    }

    /// Read-side idle bound (spec §6): the reader task closes the
    /// connection if no frame arrives within this window.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub fn registry_ttl(&self) -> Duration {
        Duration::from_secs(self.registry_ttl_secs)
    }

    pub fn registry_renew_interval(&self) -> Duration {
        Duration::from_secs(self.registry_renew_interval_secs)
    }

    pub fn user_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.user_cache_ttl_secs)
    }

    pub fn group_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.group_cache_ttl_secs)
    }

    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_secs(self.dedup_ttl_secs)
    }

    pub fn routing_call_timeout(&self) -> Duration {
        Duration::from_secs(self.routing_call_timeout_secs)
    }

    pub fn registry_call_timeout(&self) -> Duration {
        Duration::from_secs(self.registry_call_timeout_secs)
    }

    pub fn push_write_timeout(&self) -> Duration {
        Duration::from_secs(self.push_write_timeout_secs)
    }

    pub fn shutdown_drain(&self) -> Duration {
        Duration::from_secs(self.shutdown_drain_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let cfg = GatewayConfig::default();
        assert_eq!(cfg.max_connections, 100_000);
        assert_eq!(cfg.max_messages_per_second, 100);
        assert_eq!(cfg.large_group_threshold, 1_000);
        assert_eq!(cfg.mailbox_capacity, 256);
        assert_eq!(cfg.dedup_ttl_secs, 604_800);
    }

    #[test]
    fn partial_toml_overrides_only_named_fields() {
        let cfg = GatewayConfig::from_toml_str("max_connections = 500\n").unwrap();
        assert_eq!(cfg.max_connections, 500);
        assert_eq!(cfg.max_messages_per_second, 100);
    }

    #[test]
    fn unknown_key_is_rejected() {
        assert!(GatewayConfig::from_toml_str("totally_unknown = 1\n").is_err());
    }
}

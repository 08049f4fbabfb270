//! Configuration management for Tollgate.
//!
//! Loaded once at startup and passed by reference into every component;
//! nothing here is mutable at runtime.

use std::collections::HashMap;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::gate::{QuotaRule, TrustTier};

/// Main configuration for the Tollgate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TollgateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Decision-log store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Gate configuration
    #[serde(default)]
    pub gate: GateConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    "127.0.0.1:8080".parse().unwrap()
}

/// Decision-log store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the SQLite database file
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Retention horizon for log and violation rows, in days. Must stay
    /// much larger than the largest configured window.
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,

    /// Interval between retention sweeps, in seconds
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            retention_days: default_retention_days(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

fn default_db_path() -> String {
    "tollgate.db".to_string()
}

fn default_retention_days() -> i64 {
    30
}

fn default_sweep_interval_secs() -> u64 {
    3600
}

/// One entry of the route→service prefix table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutePrefix {
    pub prefix: String,
    pub service: String,
}

/// Gate configuration: path lists, the service table and the quota tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Service name whose identifiers are messaging-channel phone numbers
    #[serde(default = "default_messaging_service")]
    pub messaging_service: String,

    /// Paths that bypass gating entirely
    #[serde(default = "default_skip_paths")]
    pub skip_paths: Vec<String>,

    /// Paths gated against the relaxed quota variant
    #[serde(default = "default_permissive_paths")]
    pub permissive_paths: Vec<String>,

    /// Route→service prefix table, longest prefix wins
    #[serde(default = "default_routes")]
    pub routes: Vec<RoutePrefix>,

    /// Service applied when no prefix matches
    #[serde(default = "default_fallback_service")]
    pub fallback_service: String,

    /// Quota tables
    #[serde(default)]
    pub quotas: QuotaTables,

    /// Trust-classification horizons
    #[serde(default)]
    pub trust: TrustConfig,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            messaging_service: default_messaging_service(),
            skip_paths: default_skip_paths(),
            permissive_paths: default_permissive_paths(),
            routes: default_routes(),
            fallback_service: default_fallback_service(),
            quotas: QuotaTables::default(),
            trust: TrustConfig::default(),
        }
    }
}

fn default_messaging_service() -> String {
    "whatsapp".to_string()
}

fn default_skip_paths() -> Vec<String> {
    vec![
        "/health".to_string(),
        "/status".to_string(),
        "/api/auth/refresh".to_string(),
        "/webhooks/signature".to_string(),
    ]
}

fn default_permissive_paths() -> Vec<String> {
    vec![
        "/api/auth/login".to_string(),
        "/api/auth/register".to_string(),
        "/api/auth/password-reset".to_string(),
    ]
}

fn default_routes() -> Vec<RoutePrefix> {
    [
        ("/api/bookings", "bookings"),
        ("/api/clients", "clients"),
        ("/api/auth", "auth"),
        ("/api/notifications", "notifications"),
        ("/webhooks/whatsapp", "whatsapp"),
        ("/webhooks", "webhooks"),
    ]
    .into_iter()
    .map(|(prefix, service)| RoutePrefix {
        prefix: prefix.to_string(),
        service: service.to_string(),
    })
    .collect()
}

fn default_fallback_service() -> String {
    "api".to_string()
}

/// Quota tables: per service, per trust tier, permissive variants, and the
/// default applied to unknown keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaTables {
    #[serde(default = "default_service_quotas")]
    pub services: HashMap<String, QuotaRule>,

    #[serde(default = "default_permissive_quotas")]
    pub permissive: HashMap<String, QuotaRule>,

    #[serde(default = "default_tier_quotas")]
    pub tiers: HashMap<TrustTier, QuotaRule>,

    #[serde(default = "default_quota_rule", rename = "default")]
    pub default_rule: QuotaRule,
}

impl Default for QuotaTables {
    fn default() -> Self {
        Self {
            services: default_service_quotas(),
            permissive: default_permissive_quotas(),
            tiers: default_tier_quotas(),
            default_rule: default_quota_rule(),
        }
    }
}

fn default_service_quotas() -> HashMap<String, QuotaRule> {
    [
        ("bookings", QuotaRule::new(10, 3_600_000)),
        ("clients", QuotaRule::new(30, 900_000)),
        ("auth", QuotaRule::new(10, 900_000)),
        ("notifications", QuotaRule::new(60, 3_600_000)),
        ("webhooks", QuotaRule::new(120, 60_000)),
    ]
    .into_iter()
    .map(|(service, rule)| (service.to_string(), rule))
    .collect()
}

fn default_permissive_quotas() -> HashMap<String, QuotaRule> {
    [("auth", QuotaRule::new(30, 900_000))]
        .into_iter()
        .map(|(service, rule)| (service.to_string(), rule))
        .collect()
}

fn default_tier_quotas() -> HashMap<TrustTier, QuotaRule> {
    [
        (TrustTier::Trusted, QuotaRule::new(50, 1_800_000)),
        (TrustTier::Existing, QuotaRule::new(20, 1_800_000)),
        (TrustTier::New, QuotaRule::new(10, 1_800_000)),
        (TrustTier::Unknown, QuotaRule::new(5, 1_800_000)),
    ]
    .into_iter()
    .collect()
}

fn default_quota_rule() -> QuotaRule {
    QuotaRule::new(100, 900_000)
}

/// Horizons for the roster lookups behind trust classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustConfig {
    #[serde(default = "default_booking_horizon_days")]
    pub booking_horizon_days: i64,

    #[serde(default = "default_conversation_horizon_days")]
    pub conversation_horizon_days: i64,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            booking_horizon_days: default_booking_horizon_days(),
            conversation_horizon_days: default_conversation_horizon_days(),
        }
    }
}

fn default_booking_horizon_days() -> i64 {
    30
}

fn default_conversation_horizon_days() -> i64 {
    7
}

impl TollgateConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &str) -> crate::error::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: TollgateConfig = serde_yaml::from_str(&contents)
            .map_err(|e| crate::error::TollgateError::Config(e.to_string()))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_coherent() {
        let config = TollgateConfig::default();
        assert_eq!(config.gate.quotas.services["bookings"].limit, 10);
        assert_eq!(config.gate.quotas.tiers[&TrustTier::Unknown].limit, 5);
        assert_eq!(config.gate.quotas.tiers[&TrustTier::Unknown].window_ms, 1_800_000);
        // Retention must dwarf the largest window
        let max_window_ms = config
            .gate
            .quotas
            .services
            .values()
            .map(|r| r.window_ms)
            .max()
            .unwrap();
        assert!(config.store.retention_days as u64 * 86_400_000 > max_window_ms * 10);
    }

    #[test]
    fn partial_yaml_overrides_keep_defaults() {
        let yaml = r#"
server:
  listen_addr: "0.0.0.0:9000"
gate:
  quotas:
    services:
      bookings: {limit: 3, window_ms: 1000}
"#;
        let config: TollgateConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.listen_addr.port(), 9000);
        assert_eq!(config.gate.quotas.services["bookings"].limit, 3);
        // Untouched sections keep their defaults
        assert_eq!(config.gate.messaging_service, "whatsapp");
        assert_eq!(config.store.retention_days, 30);
        assert_eq!(config.gate.quotas.default_rule.limit, 100);
    }

    #[test]
    fn tier_quotas_parse_from_yaml() {
        let yaml = r#"
gate:
  quotas:
    tiers:
      trusted: {limit: 99, window_ms: 60000}
      unknown: {limit: 1, window_ms: 60000}
"#;
        let config: TollgateConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.gate.quotas.tiers[&TrustTier::Trusted].limit, 99);
        assert_eq!(config.gate.quotas.tiers[&TrustTier::Unknown].limit, 1);
    }
}

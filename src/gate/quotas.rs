//! Quota rules and the registry that resolves them per service or trust tier.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::trust::TrustTier;

/// Maximum number of requests allowed within a trailing window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaRule {
    pub limit: u64,
    pub window_ms: u64,
}

impl QuotaRule {
    pub const fn new(limit: u64, window_ms: u64) -> Self {
        Self { limit, window_ms }
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn chrono_window(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.window_ms as i64)
    }
}

/// Static quota tables, loaded once at startup and immutable thereafter.
///
/// Messaging-channel traffic is looked up by trust tier; everything else by
/// service name. Unknown keys resolve to the default rule rather than
/// erroring.
pub struct QuotaRegistry {
    services: HashMap<String, QuotaRule>,
    permissive: HashMap<String, QuotaRule>,
    tiers: HashMap<TrustTier, QuotaRule>,
    default_rule: QuotaRule,
}

impl QuotaRegistry {
    pub fn new(
        services: HashMap<String, QuotaRule>,
        permissive: HashMap<String, QuotaRule>,
        tiers: HashMap<TrustTier, QuotaRule>,
        default_rule: QuotaRule,
    ) -> Self {
        Self {
            services,
            permissive,
            tiers,
            default_rule,
        }
    }

    /// Resolve the rule for a service. The permissive variant falls back to
    /// the standard table, which falls back to the default rule.
    pub fn for_service(&self, service: &str, permissive: bool) -> QuotaRule {
        if permissive {
            if let Some(rule) = self.permissive.get(service) {
                return *rule;
            }
        }
        self.services
            .get(service)
            .copied()
            .unwrap_or(self.default_rule)
    }

    /// Resolve the rule for a messaging-channel trust tier.
    pub fn for_tier(&self, tier: TrustTier) -> QuotaRule {
        self.tiers.get(&tier).copied().unwrap_or(self.default_rule)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> QuotaRegistry {
        let mut services = HashMap::new();
        services.insert("bookings".to_string(), QuotaRule::new(10, 3_600_000));
        services.insert("auth".to_string(), QuotaRule::new(10, 900_000));

        let mut permissive = HashMap::new();
        permissive.insert("auth".to_string(), QuotaRule::new(30, 900_000));

        let mut tiers = HashMap::new();
        tiers.insert(TrustTier::Trusted, QuotaRule::new(50, 1_800_000));
        tiers.insert(TrustTier::Unknown, QuotaRule::new(5, 1_800_000));

        QuotaRegistry::new(services, permissive, tiers, QuotaRule::new(100, 900_000))
    }

    #[test]
    fn service_lookup() {
        assert_eq!(registry().for_service("bookings", false).limit, 10);
    }

    #[test]
    fn permissive_variant_is_looser_than_standard() {
        let registry = registry();
        let standard = registry.for_service("auth", false);
        let relaxed = registry.for_service("auth", true);
        assert!(relaxed.limit > standard.limit);
    }

    #[test]
    fn permissive_lookup_falls_back_to_standard_table() {
        assert_eq!(registry().for_service("bookings", true).limit, 10);
    }

    #[test]
    fn unknown_service_resolves_to_default() {
        assert_eq!(registry().for_service("no-such-service", false).limit, 100);
    }

    #[test]
    fn tier_lookup() {
        assert_eq!(registry().for_tier(TrustTier::Unknown).limit, 5);
        assert_eq!(registry().for_tier(TrustTier::Trusted).limit, 50);
        // Unconfigured tier falls back to the default rule
        assert_eq!(registry().for_tier(TrustTier::New).limit, 100);
    }

    #[test]
    fn window_conversions() {
        let rule = QuotaRule::new(10, 3_600_000);
        assert_eq!(rule.window(), Duration::from_secs(3600));
        assert_eq!(rule.chrono_window(), chrono::Duration::hours(1));
    }
}

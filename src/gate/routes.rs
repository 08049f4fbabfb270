//! Route classification: skip-list, permissive-list, and longest-prefix
//! mapping from paths to logical service names.

use crate::config::RoutePrefix;

/// Outcome of classifying a request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteClass {
    /// Gating bypassed entirely (health checks, internal callbacks).
    Skip,
    /// Gated against the relaxed quota variant of the service.
    Permissive(String),
    /// Gated against the service's standard quota.
    Service(String),
}

/// Pure function of configuration and path; no side effects.
pub struct RouteClassifier {
    skip: Vec<String>,
    permissive: Vec<String>,
    /// `(prefix, service)` pairs sorted by descending prefix length so a
    /// single first-match pass yields the longest match.
    routes: Vec<(String, String)>,
    fallback: String,
}

impl RouteClassifier {
    pub fn new(
        skip: Vec<String>,
        permissive: Vec<String>,
        table: Vec<RoutePrefix>,
        fallback: String,
    ) -> Self {
        let mut routes: Vec<(String, String)> =
            table.into_iter().map(|r| (r.prefix, r.service)).collect();
        routes.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        Self {
            skip,
            permissive,
            routes,
            fallback,
        }
    }

    /// Skip-list first, then permissive-list, then the service table.
    pub fn classify(&self, path: &str) -> RouteClass {
        if self.skip.iter().any(|p| path.starts_with(p.as_str())) {
            return RouteClass::Skip;
        }
        if self.permissive.iter().any(|p| path.starts_with(p.as_str())) {
            return RouteClass::Permissive(self.service_for(path));
        }
        RouteClass::Service(self.service_for(path))
    }

    /// Longest-prefix match, defaulting to the fallback service.
    fn service_for(&self, path: &str) -> String {
        self.routes
            .iter()
            .find(|(prefix, _)| path.starts_with(prefix.as_str()))
            .map(|(_, service)| service.clone())
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> RouteClassifier {
        RouteClassifier::new(
            vec!["/health".to_string(), "/status".to_string()],
            vec!["/api/auth/login".to_string(), "/api/auth/register".to_string()],
            vec![
                RoutePrefix {
                    prefix: "/api/bookings".to_string(),
                    service: "bookings".to_string(),
                },
                RoutePrefix {
                    prefix: "/api/auth".to_string(),
                    service: "auth".to_string(),
                },
                RoutePrefix {
                    prefix: "/webhooks".to_string(),
                    service: "webhooks".to_string(),
                },
                RoutePrefix {
                    prefix: "/webhooks/whatsapp".to_string(),
                    service: "whatsapp".to_string(),
                },
            ],
            "api".to_string(),
        )
    }

    #[test]
    fn skip_list_matches_first() {
        assert_eq!(classifier().classify("/health"), RouteClass::Skip);
        assert_eq!(classifier().classify("/status/live"), RouteClass::Skip);
    }

    #[test]
    fn permissive_paths_keep_their_service() {
        assert_eq!(
            classifier().classify("/api/auth/login"),
            RouteClass::Permissive("auth".to_string())
        );
    }

    #[test]
    fn non_permissive_sibling_uses_standard_quota() {
        assert_eq!(
            classifier().classify("/api/auth/me"),
            RouteClass::Service("auth".to_string())
        );
    }

    #[test]
    fn longest_prefix_wins() {
        assert_eq!(
            classifier().classify("/webhooks/whatsapp/inbound"),
            RouteClass::Service("whatsapp".to_string())
        );
        assert_eq!(
            classifier().classify("/webhooks/stripe"),
            RouteClass::Service("webhooks".to_string())
        );
    }

    #[test]
    fn unmatched_paths_fall_back() {
        assert_eq!(
            classifier().classify("/something/else"),
            RouteClass::Service("api".to_string())
        );
    }
}

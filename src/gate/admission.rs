//! The admission gate: one verdict per inbound request.
//!
//! The gate holds no counters of its own; every check is a fresh count
//! against the persisted decision log, so arbitrarily many workers can share
//! one gate. The count and the later log insert are deliberately separate,
//! untransacted store calls, so enforcement at the window boundary is
//! approximate under concurrent bursts.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::config::GateConfig;
use crate::store::{
    ActivityStore, RequestLogEntry, ViolationEntry, ViolationKind,
};

use super::identity::{Identity, IdentifierResolver, RequestFacts};
use super::quotas::{QuotaRegistry, QuotaRule};
use super::routes::{RouteClass, RouteClassifier};

/// Generous rule applied when the store cannot answer the window count.
const FAIL_OPEN_RULE: QuotaRule = QuotaRule::new(1000, 60_000);

/// Status recorded for denied requests.
const DENIED_STATUS: u16 = 429;

/// Terminal outcome of an admission check.
#[derive(Debug)]
pub enum Verdict {
    /// Path is skip-listed; pass through without logging.
    Skipped,
    Admitted(Admission),
    Denied(Denial),
}

/// An admitted request, plus what the quota headers should carry and what
/// the request logger needs once the downstream response is known.
#[derive(Debug, Clone)]
pub struct Admission {
    pub identity: Identity,
    pub service: String,
    pub limit: u64,
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
}

/// A denied request. The log rows have already been written by the time the
/// caller sees this.
#[derive(Debug, Clone)]
pub struct Denial {
    pub limit: u64,
    pub retry_after_secs: u64,
}

/// Orchestrates route classification, identity resolution, quota lookup and
/// the window count into a single per-request decision.
pub struct Gate {
    routes: RouteClassifier,
    quotas: QuotaRegistry,
    identities: IdentifierResolver,
    store: Arc<dyn ActivityStore>,
    messaging_service: String,
}

impl Gate {
    pub fn new(
        config: &GateConfig,
        store: Arc<dyn ActivityStore>,
        identities: IdentifierResolver,
    ) -> Self {
        let routes = RouteClassifier::new(
            config.skip_paths.clone(),
            config.permissive_paths.clone(),
            config.routes.clone(),
            config.fallback_service.clone(),
        );
        let quotas = QuotaRegistry::new(
            config.quotas.services.clone(),
            config.quotas.permissive.clone(),
            config.quotas.tiers.clone(),
            config.quotas.default_rule,
        );
        Self {
            routes,
            quotas,
            identities,
            store,
            messaging_service: config.messaging_service.clone(),
        }
    }

    /// Whether the path resolves to the messaging-channel service, in which
    /// case the caller should surface the payload for phone extraction.
    pub fn is_messaging_path(&self, path: &str) -> bool {
        match self.routes.classify(path) {
            RouteClass::Skip => false,
            RouteClass::Permissive(service) | RouteClass::Service(service) => {
                service == self.messaging_service
            }
        }
    }

    /// Decide admission for one request. Never errors: classification
    /// failures degrade through the resolver chain and store failures fail
    /// open.
    pub async fn check(&self, facts: &RequestFacts) -> Verdict {
        let (service, permissive) = match self.routes.classify(&facts.path) {
            RouteClass::Skip => {
                debug!(path = %facts.path, "Skip-listed path, bypassing gate");
                return Verdict::Skipped;
            }
            RouteClass::Permissive(service) => (service, true),
            RouteClass::Service(service) => (service, false),
        };

        let messaging = service == self.messaging_service;
        let identity = self.identities.resolve(facts, messaging).await;

        let rule = match identity.trust {
            Some(tier) => self.quotas.for_tier(tier),
            None => self.quotas.for_service(&service, permissive),
        };

        let now = Utc::now();
        let window_start = now - rule.chrono_window();

        // Fail-open boundary: if the store cannot answer, admit under a
        // generous fallback rule. The occurrence is still logged through the
        // ordinary best-effort request logger.
        let count = match self
            .store
            .count_requests(
                &identity.identifier,
                identity.identifier_type,
                &service,
                window_start,
            )
            .await
        {
            Ok(count) => count,
            Err(e) => {
                error!(
                    error = %e,
                    identity = %identity,
                    service = %service,
                    "Window count failed, admitting fail-open"
                );
                return Verdict::Admitted(Admission {
                    identity,
                    service,
                    limit: FAIL_OPEN_RULE.limit,
                    remaining: FAIL_OPEN_RULE.limit.saturating_sub(1),
                    reset_at: now + FAIL_OPEN_RULE.chrono_window(),
                });
            }
        };

        if count < rule.limit {
            debug!(
                identity = %identity,
                service = %service,
                count,
                limit = rule.limit,
                "Request admitted"
            );
            Verdict::Admitted(Admission {
                remaining: rule.limit.saturating_sub(count + 1),
                reset_at: now + rule.chrono_window(),
                limit: rule.limit,
                identity,
                service,
            })
        } else {
            warn!(
                identity = %identity,
                service = %service,
                count,
                limit = rule.limit,
                "Quota exceeded, denying request"
            );
            self.record_denial(&identity, &service, facts, count, window_start, now)
                .await;
            Verdict::Denied(Denial {
                limit: rule.limit,
                retry_after_secs: rule.window().as_secs(),
            })
        }
    }

    /// Append the request-log row for an admitted request once the
    /// downstream status is known. Best-effort: a logging failure must not
    /// affect the decision already made.
    pub async fn record_outcome(
        &self,
        admission: &Admission,
        facts: &RequestFacts,
        status_code: u16,
        response_time_ms: u64,
    ) {
        let entry = RequestLogEntry {
            id: Uuid::new_v4(),
            identifier: admission.identity.identifier.clone(),
            identifier_type: admission.identity.identifier_type,
            service_name: admission.service.clone(),
            endpoint: facts.path.clone(),
            method: facts.method.clone(),
            status_code,
            response_time_ms,
            user_agent: facts.user_agent.clone(),
            ip_address: facts.client_ip().map(str::to_string),
            country_code: facts.country_code.clone(),
            created_at: Utc::now(),
        };
        if let Err(e) = self.store.record_request(entry).await {
            warn!(error = %e, "Failed to append request log entry");
        }
    }

    /// One request-log row (status 429) and one violation row per denial,
    /// both best-effort.
    async fn record_denial(
        &self,
        identity: &Identity,
        service: &str,
        facts: &RequestFacts,
        observed_count: u64,
        window_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) {
        let response_time_ms = facts.received_at.elapsed().as_millis() as u64;
        let request_entry = RequestLogEntry {
            id: Uuid::new_v4(),
            identifier: identity.identifier.clone(),
            identifier_type: identity.identifier_type,
            service_name: service.to_string(),
            endpoint: facts.path.clone(),
            method: facts.method.clone(),
            status_code: DENIED_STATUS,
            response_time_ms,
            user_agent: facts.user_agent.clone(),
            ip_address: facts.client_ip().map(str::to_string),
            country_code: facts.country_code.clone(),
            created_at: now,
        };
        if let Err(e) = self.store.record_request(request_entry).await {
            warn!(error = %e, "Failed to append request log entry for denial");
        }

        let violation = ViolationEntry {
            id: Uuid::new_v4(),
            identifier: identity.identifier.clone(),
            identifier_type: identity.identifier_type,
            service_name: service.to_string(),
            endpoint: facts.path.clone(),
            kind: ViolationKind::RateLimitExceeded,
            request_count: observed_count,
            window_start,
            window_end: now,
            user_agent: facts.user_agent.clone(),
            ip_address: facts.client_ip().map(str::to_string),
            created_at: now,
        };
        if let Err(e) = self.store.record_violation(violation).await {
            warn!(error = %e, "Failed to append violation entry");
        }
    }
}

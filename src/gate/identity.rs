//! Identifier resolution: the subject quota is accounted against.
//!
//! The fallback chain is messaging phone → authenticated user → network
//! address → the `unknown` sentinel. Resolution never fails; later stages of
//! the gate rely on always getting a value back.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use crate::store::{IdentifierType, SubjectResolver};

use super::trust::{TrustClassifier, TrustTier};

/// Sentinel identifier when no network address can be derived.
pub const UNKNOWN_IDENTIFIER: &str = "unknown";

/// The resolved subject for quota accounting.
#[derive(Debug, Clone)]
pub struct Identity {
    pub identifier: String,
    pub identifier_type: IdentifierType,
    /// Present only for messaging-channel phone numbers.
    pub trust: Option<TrustTier>,
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.identifier_type, self.identifier)
    }
}

/// Facts about one inbound request, assembled by the HTTP layer.
#[derive(Debug, Clone)]
pub struct RequestFacts {
    pub path: String,
    pub method: String,
    pub bearer_token: Option<String>,
    /// Phone number extracted from a messaging webhook payload.
    pub phone: Option<String>,
    pub forwarded_for: Option<String>,
    pub user_agent: Option<String>,
    pub country_code: Option<String>,
    /// When the request entered the gate; drives latency accounting.
    pub received_at: Instant,
}

impl RequestFacts {
    pub fn new(path: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method: method.into(),
            bearer_token: None,
            phone: None,
            forwarded_for: None,
            user_agent: None,
            country_code: None,
            received_at: Instant::now(),
        }
    }

    /// Caller network address: first entry of the forwarded-address header.
    pub fn client_ip(&self) -> Option<&str> {
        self.forwarded_for.as_deref().and_then(first_forwarded_entry)
    }
}

/// Derives a stable subject from request facts. Failures degrade to the next
/// tier instead of erroring.
pub struct IdentifierResolver {
    subjects: Arc<dyn SubjectResolver>,
    trust: TrustClassifier,
}

impl IdentifierResolver {
    pub fn new(subjects: Arc<dyn SubjectResolver>, trust: TrustClassifier) -> Self {
        Self { subjects, trust }
    }

    pub async fn resolve(&self, facts: &RequestFacts, messaging: bool) -> Identity {
        if messaging {
            if let Some(phone) = &facts.phone {
                let trust = self.trust.classify(phone).await;
                return Identity {
                    identifier: phone.clone(),
                    identifier_type: IdentifierType::PhoneNumber,
                    trust: Some(trust),
                };
            }
        }

        if let Some(token) = &facts.bearer_token {
            match self.subjects.subject_for_token(token).await {
                Ok(Some(user_id)) => {
                    return Identity {
                        identifier: user_id,
                        identifier_type: IdentifierType::UserId,
                        trust: None,
                    };
                }
                Ok(None) => {}
                Err(e) => {
                    debug!(error = %e, "Subject lookup failed, falling back to network address");
                }
            }
        }

        Identity {
            identifier: facts
                .client_ip()
                .unwrap_or(UNKNOWN_IDENTIFIER)
                .to_string(),
            identifier_type: IdentifierType::Ip,
            trust: None,
        }
    }
}

/// First non-empty entry of a forwarded-address header value.
fn first_forwarded_entry(value: &str) -> Option<&str> {
    value
        .split(',')
        .next()
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Extract a phone number from a messaging webhook payload.
///
/// Twilio-style channels deliver form-urlencoded bodies with a `From` field
/// carrying a `whatsapp:` prefix; cloud-API style channels deliver JSON.
pub fn phone_from_payload(content_type: Option<&str>, body: &[u8]) -> Option<String> {
    if body.is_empty() {
        return None;
    }
    if content_type.is_some_and(|ct| ct.starts_with("application/json")) {
        let value: serde_json::Value = serde_json::from_slice(body).ok()?;
        for key in ["from", "From", "phone", "phoneNumber", "wa_id"] {
            if let Some(raw) = value.get(key).and_then(|v| v.as_str()) {
                if !raw.trim().is_empty() {
                    return Some(normalize_phone(raw));
                }
            }
        }
        return None;
    }

    let fields: HashMap<String, String> = serde_urlencoded::from_bytes(body).ok()?;
    for key in ["From", "from", "WaId", "phone"] {
        if let Some(raw) = fields.get(key) {
            if !raw.trim().is_empty() {
                return Some(normalize_phone(raw));
            }
        }
    }
    None
}

fn normalize_phone(raw: &str) -> String {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix("whatsapp:")
        .unwrap_or(trimmed)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryRosters, MemorySubjects, StoreError};
    use async_trait::async_trait;

    fn resolver(subjects: Arc<MemorySubjects>) -> IdentifierResolver {
        let trust = TrustClassifier::new(Arc::new(MemoryRosters::new()), 30, 7);
        IdentifierResolver::new(subjects, trust)
    }

    fn facts() -> RequestFacts {
        let mut facts = RequestFacts::new("/api/bookings", "GET");
        facts.forwarded_for = Some("203.0.113.9, 10.0.0.1".to_string());
        facts
    }

    #[tokio::test]
    async fn messaging_phone_takes_priority() {
        let subjects = Arc::new(MemorySubjects::new());
        subjects.add_token("tok", "user-42");
        let resolver = resolver(subjects);

        let mut facts = facts();
        facts.bearer_token = Some("tok".to_string());
        facts.phone = Some("+15550100".to_string());

        let identity = resolver.resolve(&facts, true).await;
        assert_eq!(identity.identifier, "+15550100");
        assert_eq!(identity.identifier_type, IdentifierType::PhoneNumber);
        assert_eq!(identity.trust, Some(TrustTier::Unknown));
    }

    #[tokio::test]
    async fn messaging_without_phone_degrades_to_auth() {
        let subjects = Arc::new(MemorySubjects::new());
        subjects.add_token("tok", "user-42");
        let resolver = resolver(subjects);

        let mut facts = facts();
        facts.bearer_token = Some("tok".to_string());

        let identity = resolver.resolve(&facts, true).await;
        assert_eq!(identity.identifier, "user-42");
        assert_eq!(identity.identifier_type, IdentifierType::UserId);
        assert!(identity.trust.is_none());
    }

    #[tokio::test]
    async fn invalid_token_degrades_to_ip() {
        let resolver = resolver(Arc::new(MemorySubjects::new()));

        let mut facts = facts();
        facts.bearer_token = Some("bogus".to_string());

        let identity = resolver.resolve(&facts, false).await;
        assert_eq!(identity.identifier, "203.0.113.9");
        assert_eq!(identity.identifier_type, IdentifierType::Ip);
    }

    #[tokio::test]
    async fn missing_forwarded_header_yields_sentinel() {
        let resolver = resolver(Arc::new(MemorySubjects::new()));
        let facts = RequestFacts::new("/api/bookings", "GET");

        let identity = resolver.resolve(&facts, false).await;
        assert_eq!(identity.identifier, UNKNOWN_IDENTIFIER);
        assert_eq!(identity.identifier_type, IdentifierType::Ip);
    }

    struct FailingSubjects;

    #[async_trait]
    impl SubjectResolver for FailingSubjects {
        async fn subject_for_token(&self, _token: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::Unavailable("auth store down".into()))
        }
    }

    #[tokio::test]
    async fn subject_lookup_error_degrades_to_ip() {
        let trust = TrustClassifier::new(Arc::new(MemoryRosters::new()), 30, 7);
        let resolver = IdentifierResolver::new(Arc::new(FailingSubjects), trust);

        let mut facts = facts();
        facts.bearer_token = Some("tok".to_string());

        let identity = resolver.resolve(&facts, false).await;
        assert_eq!(identity.identifier_type, IdentifierType::Ip);
        assert_eq!(identity.identifier, "203.0.113.9");
    }

    #[test]
    fn phone_from_form_payload() {
        let body = b"From=whatsapp%3A%2B15550100&Body=hi";
        let phone = phone_from_payload(Some("application/x-www-form-urlencoded"), body);
        assert_eq!(phone, Some("+15550100".to_string()));
    }

    #[test]
    fn phone_from_json_payload() {
        let body = br#"{"from": "+15550100", "text": "hi"}"#;
        let phone = phone_from_payload(Some("application/json"), body);
        assert_eq!(phone, Some("+15550100".to_string()));
    }

    #[test]
    fn payload_without_phone_yields_none() {
        assert_eq!(
            phone_from_payload(Some("application/json"), br#"{"text": "hi"}"#),
            None
        );
        assert_eq!(
            phone_from_payload(Some("application/x-www-form-urlencoded"), b"Body=hi"),
            None
        );
        assert_eq!(phone_from_payload(None, b""), None);
    }

    #[test]
    fn forwarded_entry_parsing() {
        assert_eq!(first_forwarded_entry("1.2.3.4, 5.6.7.8"), Some("1.2.3.4"));
        assert_eq!(first_forwarded_entry("  1.2.3.4  "), Some("1.2.3.4"));
        assert_eq!(first_forwarded_entry(""), None);
    }
}

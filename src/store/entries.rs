//! Persisted decision-log records.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Subject category an identifier belongs to.
///
/// Stored alongside the identifier so that, say, user id `42` and a phone
/// number that happens to read `42` never share a quota bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentifierType {
    /// Caller network address (or the `unknown` sentinel)
    Ip,
    /// Authenticated user id
    UserId,
    /// Messaging-channel phone number
    PhoneNumber,
    /// Session token subject
    Session,
}

impl IdentifierType {
    /// Stable string form used in the store.
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentifierType::Ip => "ip",
            IdentifierType::UserId => "user_id",
            IdentifierType::PhoneNumber => "phone_number",
            IdentifierType::Session => "session",
        }
    }
}

impl std::fmt::Display for IdentifierType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Category of a recorded violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    RateLimitExceeded,
    SpamDetected,
    SuspiciousActivity,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationKind::RateLimitExceeded => "rate_limit_exceeded",
            ViolationKind::SpamDetected => "spam_detected",
            ViolationKind::SuspiciousActivity => "suspicious_activity",
        }
    }
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One processed request, admitted or denied. Append-only; rows are removed
/// only by the retention sweeper.
#[derive(Debug, Clone)]
pub struct RequestLogEntry {
    pub id: Uuid,
    pub identifier: String,
    pub identifier_type: IdentifierType,
    pub service_name: String,
    pub endpoint: String,
    pub method: String,
    pub status_code: u16,
    pub response_time_ms: u64,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub country_code: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One denied request, with the window bounds and the count observed at
/// denial time. Append-only.
#[derive(Debug, Clone)]
pub struct ViolationEntry {
    pub id: Uuid,
    pub identifier: String,
    pub identifier_type: IdentifierType,
    pub service_name: String,
    pub endpoint: String,
    pub kind: ViolationKind,
    pub request_count: u64,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

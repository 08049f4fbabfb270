//! In-memory store implementations for tests and development.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::{
    ActivityStore, IdentifierType, PurgeOutcome, RequestLogEntry, RosterDirectory, StoreError,
    SubjectResolver, ViolationEntry,
};

/// Decision log held in process memory. Same semantics as the SQLite store,
/// minus durability.
#[derive(Default)]
pub struct MemoryStore {
    requests: RwLock<Vec<RequestLogEntry>>,
    violations: RwLock<Vec<ViolationEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all request-log rows, for assertions.
    pub fn request_entries(&self) -> Vec<RequestLogEntry> {
        self.requests.read().clone()
    }

    /// Snapshot of all violation rows, for assertions.
    pub fn violation_entries(&self) -> Vec<ViolationEntry> {
        self.violations.read().clone()
    }

    pub fn clear(&self) {
        self.requests.write().clear();
        self.violations.write().clear();
    }
}

#[async_trait]
impl ActivityStore for MemoryStore {
    async fn count_requests(
        &self,
        identifier: &str,
        identifier_type: IdentifierType,
        service: &str,
        window_start: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let requests = self.requests.read();
        let count = requests
            .iter()
            .filter(|e| {
                e.identifier == identifier
                    && e.identifier_type == identifier_type
                    && e.service_name == service
                    && e.created_at >= window_start
            })
            .count();
        Ok(count as u64)
    }

    async fn record_request(&self, entry: RequestLogEntry) -> Result<(), StoreError> {
        self.requests.write().push(entry);
        Ok(())
    }

    async fn record_violation(&self, entry: ViolationEntry) -> Result<(), StoreError> {
        self.violations.write().push(entry);
        Ok(())
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<PurgeOutcome, StoreError> {
        let mut requests = self.requests.write();
        let before_requests = requests.len();
        requests.retain(|e| e.created_at >= cutoff);
        let requests_deleted = (before_requests - requests.len()) as u64;

        let mut violations = self.violations.write();
        let before_violations = violations.len();
        violations.retain(|e| e.created_at >= cutoff);
        let violations_deleted = (before_violations - violations.len()) as u64;

        Ok(PurgeOutcome {
            requests_deleted,
            violations_deleted,
        })
    }
}

#[derive(Default)]
struct RosterData {
    allow_list: HashSet<String>,
    clients: HashSet<String>,
    bookings: Vec<(String, DateTime<Utc>)>,
    conversations: Vec<(String, DateTime<Utc>)>,
}

/// In-memory roster directory for tests.
#[derive(Default)]
pub struct MemoryRosters {
    data: RwLock<RosterData>,
}

impl MemoryRosters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_allow_listed(&self, phone: &str) {
        self.data.write().allow_list.insert(phone.to_string());
    }

    pub fn add_client(&self, phone: &str) {
        self.data.write().clients.insert(phone.to_string());
    }

    pub fn add_booking(&self, phone: &str, at: DateTime<Utc>) {
        self.data.write().bookings.push((phone.to_string(), at));
    }

    pub fn add_conversation(&self, phone: &str, at: DateTime<Utc>) {
        self.data.write().conversations.push((phone.to_string(), at));
    }
}

#[async_trait]
impl RosterDirectory for MemoryRosters {
    async fn is_allow_listed(&self, phone: &str) -> Result<bool, StoreError> {
        Ok(self.data.read().allow_list.contains(phone))
    }

    async fn is_known_client(&self, phone: &str) -> Result<bool, StoreError> {
        Ok(self.data.read().clients.contains(phone))
    }

    async fn has_booking_since(
        &self,
        phone: &str,
        since: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        Ok(self
            .data
            .read()
            .bookings
            .iter()
            .any(|(p, at)| p == phone && *at >= since))
    }

    async fn has_conversation_since(
        &self,
        phone: &str,
        since: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        Ok(self
            .data
            .read()
            .conversations
            .iter()
            .any(|(p, at)| p == phone && *at >= since))
    }
}

/// In-memory token-to-subject map for tests.
#[derive(Default)]
pub struct MemorySubjects {
    tokens: RwLock<HashMap<String, String>>,
}

impl MemorySubjects {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_token(&self, token: &str, user_id: &str) {
        self.tokens
            .write()
            .insert(token.to_string(), user_id.to_string());
    }
}

#[async_trait]
impl SubjectResolver for MemorySubjects {
    async fn subject_for_token(&self, token: &str) -> Result<Option<String>, StoreError> {
        Ok(self.tokens.read().get(token).cloned())
    }
}

//! Persistence seams for the gate: the decision log, the collaborator
//! rosters behind trust classification, and the auth-subject lookup.
//!
//! All quota state lives behind [`ActivityStore`]; the gate itself holds no
//! counters, so any number of workers can share one store.

mod entries;
pub mod memory;
pub mod retention;
pub mod sqlite;

pub use entries::{IdentifierType, RequestLogEntry, ViolationEntry, ViolationKind};
pub use memory::{MemoryRosters, MemoryStore, MemorySubjects};
pub use retention::RetentionSweeper;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors surfaced by store implementations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Rows removed by a retention purge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeOutcome {
    pub requests_deleted: u64,
    pub violations_deleted: u64,
}

impl PurgeOutcome {
    pub fn total(&self) -> u64 {
        self.requests_deleted + self.violations_deleted
    }
}

/// Append-only decision log plus the window count that drives admission.
#[async_trait]
pub trait ActivityStore: Send + Sync {
    /// Count logged requests for the subject within the trailing window.
    /// Re-queried on every admission check; no caching layer.
    async fn count_requests(
        &self,
        identifier: &str,
        identifier_type: IdentifierType,
        service: &str,
        window_start: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Append one request-log row.
    async fn record_request(&self, entry: RequestLogEntry) -> Result<(), StoreError>;

    /// Append one violation row.
    async fn record_violation(&self, entry: ViolationEntry) -> Result<(), StoreError>;

    /// Delete all rows created before the cutoff. Idempotent.
    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<PurgeOutcome, StoreError>;
}

/// Roster lookups consumed by trust classification. Each is a point lookup
/// returning presence or absence.
#[async_trait]
pub trait RosterDirectory: Send + Sync {
    async fn is_allow_listed(&self, phone: &str) -> Result<bool, StoreError>;

    async fn is_known_client(&self, phone: &str) -> Result<bool, StoreError>;

    async fn has_booking_since(&self, phone: &str, since: DateTime<Utc>)
        -> Result<bool, StoreError>;

    async fn has_conversation_since(
        &self,
        phone: &str,
        since: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
}

/// Resolves a bearer credential to an authenticated subject id.
#[async_trait]
pub trait SubjectResolver: Send + Sync {
    /// `Ok(None)` means the credential is unknown or expired.
    async fn subject_for_token(&self, token: &str) -> Result<Option<String>, StoreError>;
}

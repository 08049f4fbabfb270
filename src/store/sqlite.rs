//! SQLite-backed persistence: the durable decision log plus the collaborator
//! tables consumed by trust classification and subject resolution.
//!
//! Timestamps are stored as unix epoch milliseconds so window comparisons are
//! plain integer comparisons.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{
    ActivityStore, IdentifierType, PurgeOutcome, RequestLogEntry, RosterDirectory, StoreError,
    SubjectResolver, ViolationEntry,
};

/// Full schema. Roster tables are owned by the surrounding application;
/// they are created here so a standalone gate runs against a fresh file.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS request_log (
    id TEXT PRIMARY KEY,
    identifier TEXT NOT NULL,
    identifier_type TEXT NOT NULL,
    service_name TEXT NOT NULL,
    endpoint TEXT NOT NULL,
    method TEXT NOT NULL,
    status_code INTEGER NOT NULL,
    response_time_ms INTEGER NOT NULL,
    user_agent TEXT,
    ip_address TEXT,
    country_code TEXT,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_request_log_window
    ON request_log (identifier, identifier_type, service_name, created_at);
CREATE INDEX IF NOT EXISTS idx_request_log_created
    ON request_log (created_at);

CREATE TABLE IF NOT EXISTS violations (
    id TEXT PRIMARY KEY,
    identifier TEXT NOT NULL,
    identifier_type TEXT NOT NULL,
    service_name TEXT NOT NULL,
    endpoint TEXT NOT NULL,
    violation_type TEXT NOT NULL,
    request_count INTEGER NOT NULL,
    window_start INTEGER NOT NULL,
    window_end INTEGER NOT NULL,
    user_agent TEXT,
    ip_address TEXT,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_violations_created
    ON violations (created_at);

CREATE TABLE IF NOT EXISTS allow_list (
    phone TEXT PRIMARY KEY,
    active INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS clients (
    phone TEXT PRIMARY KEY,
    name TEXT
);

CREATE TABLE IF NOT EXISTS bookings (
    id TEXT PRIMARY KEY,
    phone TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_bookings_phone
    ON bookings (phone, created_at);

CREATE TABLE IF NOT EXISTS conversations (
    id TEXT PRIMARY KEY,
    phone TEXT NOT NULL,
    last_message_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_conversations_phone
    ON conversations (phone, last_message_at);

CREATE TABLE IF NOT EXISTS sessions (
    token TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    expires_at INTEGER
);
";

/// Durable store for the gate. Thread-safe; queries are short point lookups
/// and appends, serialized through a single connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at the given path and apply the schema.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::initialize(conn)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize(conn)
    }

    fn initialize(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA busy_timeout=5000;
             PRAGMA foreign_keys=ON;",
        )?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Roster writes are owned by the surrounding application; these helpers
    /// exist for seeding standalone deployments and tests.
    pub fn add_allow_listed(&self, phone: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO allow_list (phone, active) VALUES (?1, 1)",
            params![phone],
        )?;
        Ok(())
    }

    pub fn add_client(&self, phone: &str, name: Option<&str>) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO clients (phone, name) VALUES (?1, ?2)",
            params![phone, name],
        )?;
        Ok(())
    }

    pub fn add_booking(&self, phone: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO bookings (id, phone, created_at) VALUES (?1, ?2, ?3)",
            params![Uuid::new_v4().to_string(), phone, at.timestamp_millis()],
        )?;
        Ok(())
    }

    pub fn add_conversation(&self, phone: &str, last_message_at: DateTime<Utc>) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO conversations (id, phone, last_message_at) VALUES (?1, ?2, ?3)",
            params![
                Uuid::new_v4().to_string(),
                phone,
                last_message_at.timestamp_millis()
            ],
        )?;
        Ok(())
    }

    pub fn add_session(
        &self,
        token: &str,
        user_id: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO sessions (token, user_id, expires_at) VALUES (?1, ?2, ?3)",
            params![token, user_id, expires_at.map(|t| t.timestamp_millis())],
        )?;
        Ok(())
    }
}

#[async_trait]
impl ActivityStore for SqliteStore {
    async fn count_requests(
        &self,
        identifier: &str,
        identifier_type: IdentifierType,
        service: &str,
        window_start: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM request_log
             WHERE identifier = ?1 AND identifier_type = ?2
               AND service_name = ?3 AND created_at >= ?4",
            params![
                identifier,
                identifier_type.as_str(),
                service,
                window_start.timestamp_millis()
            ],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    async fn record_request(&self, entry: RequestLogEntry) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO request_log
                (id, identifier, identifier_type, service_name, endpoint, method,
                 status_code, response_time_ms, user_agent, ip_address, country_code, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                entry.id.to_string(),
                entry.identifier,
                entry.identifier_type.as_str(),
                entry.service_name,
                entry.endpoint,
                entry.method,
                entry.status_code,
                entry.response_time_ms as i64,
                entry.user_agent,
                entry.ip_address,
                entry.country_code,
                entry.created_at.timestamp_millis()
            ],
        )?;
        Ok(())
    }

    async fn record_violation(&self, entry: ViolationEntry) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO violations
                (id, identifier, identifier_type, service_name, endpoint, violation_type,
                 request_count, window_start, window_end, user_agent, ip_address, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                entry.id.to_string(),
                entry.identifier,
                entry.identifier_type.as_str(),
                entry.service_name,
                entry.endpoint,
                entry.kind.as_str(),
                entry.request_count as i64,
                entry.window_start.timestamp_millis(),
                entry.window_end.timestamp_millis(),
                entry.user_agent,
                entry.ip_address,
                entry.created_at.timestamp_millis()
            ],
        )?;
        Ok(())
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<PurgeOutcome, StoreError> {
        let conn = self.conn.lock();
        let cutoff_ms = cutoff.timestamp_millis();
        let requests_deleted = conn.execute(
            "DELETE FROM request_log WHERE created_at < ?1",
            params![cutoff_ms],
        )? as u64;
        let violations_deleted = conn.execute(
            "DELETE FROM violations WHERE created_at < ?1",
            params![cutoff_ms],
        )? as u64;
        Ok(PurgeOutcome {
            requests_deleted,
            violations_deleted,
        })
    }
}

#[async_trait]
impl RosterDirectory for SqliteStore {
    async fn is_allow_listed(&self, phone: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT 1 FROM allow_list WHERE phone = ?1 AND active = 1",
                params![phone],
                |_| Ok(()),
            )
            .optional()?;
        Ok(row.is_some())
    }

    async fn is_known_client(&self, phone: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT 1 FROM clients WHERE phone = ?1",
                params![phone],
                |_| Ok(()),
            )
            .optional()?;
        Ok(row.is_some())
    }

    async fn has_booking_since(
        &self,
        phone: &str,
        since: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT 1 FROM bookings WHERE phone = ?1 AND created_at >= ?2 LIMIT 1",
                params![phone, since.timestamp_millis()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(row.is_some())
    }

    async fn has_conversation_since(
        &self,
        phone: &str,
        since: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT 1 FROM conversations WHERE phone = ?1 AND last_message_at >= ?2 LIMIT 1",
                params![phone, since.timestamp_millis()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl SubjectResolver for SqliteStore {
    async fn subject_for_token(&self, token: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT user_id FROM sessions
                 WHERE token = ?1 AND (expires_at IS NULL OR expires_at >= ?2)",
                params![token, Utc::now().timestamp_millis()],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(row)
    }
}

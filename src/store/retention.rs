//! Background retention sweeping for the decision log.
//!
//! Runs off the request path on a fixed interval. Deleting rows past the
//! horizon can never affect a live window count as long as the horizon is
//! much larger than the largest configured window.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use super::{ActivityStore, PurgeOutcome, StoreError};

/// Timer-driven purge of log and violation rows older than the horizon.
pub struct RetentionSweeper {
    store: Arc<dyn ActivityStore>,
    horizon: chrono::Duration,
    interval: Duration,
}

impl RetentionSweeper {
    pub fn new(store: Arc<dyn ActivityStore>, horizon: chrono::Duration, interval: Duration) -> Self {
        Self {
            store,
            horizon,
            interval,
        }
    }

    /// One purge pass. Idempotent; safe to run concurrently with live traffic.
    pub async fn sweep_once(&self) -> Result<PurgeOutcome, StoreError> {
        let cutoff = Utc::now() - self.horizon;
        let outcome = self.store.purge_older_than(cutoff).await?;
        if outcome.total() > 0 {
            info!(
                requests = outcome.requests_deleted,
                violations = outcome.violations_deleted,
                "Retention sweep removed expired rows"
            );
        } else {
            debug!("Retention sweep found nothing to remove");
        }
        Ok(outcome)
    }

    /// Sweep on a fixed interval until the owning task is aborted.
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.sweep_once().await {
                error!(error = %e, "Retention sweep failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{IdentifierType, MemoryStore, RequestLogEntry};
    use chrono::{DateTime, Utc};
    use uuid::Uuid;

    fn entry_at(created_at: DateTime<Utc>) -> RequestLogEntry {
        RequestLogEntry {
            id: Uuid::new_v4(),
            identifier: "203.0.113.9".to_string(),
            identifier_type: IdentifierType::Ip,
            service_name: "api".to_string(),
            endpoint: "/api/things".to_string(),
            method: "GET".to_string(),
            status_code: 200,
            response_time_ms: 4,
            user_agent: None,
            ip_address: None,
            country_code: None,
            created_at,
        }
    }

    #[tokio::test]
    async fn sweep_removes_rows_past_horizon_only() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        store
            .record_request(entry_at(now - chrono::Duration::days(31)))
            .await
            .unwrap();
        store.record_request(entry_at(now)).await.unwrap();

        let sweeper = RetentionSweeper::new(
            store.clone(),
            chrono::Duration::days(30),
            Duration::from_secs(3600),
        );

        let outcome = sweeper.sweep_once().await.unwrap();
        assert_eq!(outcome.requests_deleted, 1);
        assert_eq!(store.request_entries().len(), 1);

        // Re-running immediately is a no-op
        let outcome = sweeper.sweep_once().await.unwrap();
        assert_eq!(outcome.total(), 0);
    }
}

//! Trust classification for messaging-channel identifiers.
//!
//! A phone number's tier decides which quota applies to it. Classification
//! is a read-only pass over the collaborator rosters; it never fails the
//! request. A roster error yields the most restrictive tier, which is the
//! opposite of the fail-open stance the gate takes toward its own store.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::store::{RosterDirectory, StoreError};

/// Trust tier assigned to a messaging-channel phone number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustTier {
    Trusted,
    Existing,
    New,
    Unknown,
}

impl TrustTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrustTier::Trusted => "trusted",
            TrustTier::Existing => "existing",
            TrustTier::New => "new",
            TrustTier::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for TrustTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Priority-ordered roster classification.
pub struct TrustClassifier {
    rosters: Arc<dyn RosterDirectory>,
    booking_horizon: chrono::Duration,
    conversation_horizon: chrono::Duration,
}

impl TrustClassifier {
    pub fn new(
        rosters: Arc<dyn RosterDirectory>,
        booking_horizon_days: i64,
        conversation_horizon_days: i64,
    ) -> Self {
        Self {
            rosters,
            booking_horizon: chrono::Duration::days(booking_horizon_days),
            conversation_horizon: chrono::Duration::days(conversation_horizon_days),
        }
    }

    /// Classify a phone number. Roster errors classify as `Unknown` rather
    /// than failing the request.
    pub async fn classify(&self, phone: &str) -> TrustTier {
        match self.lookup(phone, Utc::now()).await {
            Ok(tier) => tier,
            Err(e) => {
                warn!(error = %e, "Roster lookup failed, classifying as unknown");
                TrustTier::Unknown
            }
        }
    }

    async fn lookup(&self, phone: &str, now: DateTime<Utc>) -> Result<TrustTier, StoreError> {
        if self.rosters.is_allow_listed(phone).await? {
            return Ok(TrustTier::Trusted);
        }
        if self.rosters.is_known_client(phone).await? {
            return Ok(TrustTier::Existing);
        }
        if self
            .rosters
            .has_booking_since(phone, now - self.booking_horizon)
            .await?
        {
            return Ok(TrustTier::Existing);
        }
        if self
            .rosters
            .has_conversation_since(phone, now - self.conversation_horizon)
            .await?
        {
            return Ok(TrustTier::New);
        }
        Ok(TrustTier::Unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryRosters;
    use async_trait::async_trait;

    fn classifier(rosters: Arc<MemoryRosters>) -> TrustClassifier {
        TrustClassifier::new(rosters, 30, 7)
    }

    #[tokio::test]
    async fn allow_list_classifies_trusted() {
        let rosters = Arc::new(MemoryRosters::new());
        rosters.add_allow_listed("+15550100");
        assert_eq!(
            classifier(rosters).classify("+15550100").await,
            TrustTier::Trusted
        );
    }

    #[tokio::test]
    async fn allow_list_wins_over_client_roster() {
        let rosters = Arc::new(MemoryRosters::new());
        rosters.add_allow_listed("+15550100");
        rosters.add_client("+15550100");
        assert_eq!(
            classifier(rosters).classify("+15550100").await,
            TrustTier::Trusted
        );
    }

    #[tokio::test]
    async fn known_client_classifies_existing() {
        let rosters = Arc::new(MemoryRosters::new());
        rosters.add_client("+15550101");
        assert_eq!(
            classifier(rosters).classify("+15550101").await,
            TrustTier::Existing
        );
    }

    #[tokio::test]
    async fn recent_booking_classifies_existing() {
        let rosters = Arc::new(MemoryRosters::new());
        rosters.add_booking("+15550102", Utc::now() - chrono::Duration::days(10));
        assert_eq!(
            classifier(rosters).classify("+15550102").await,
            TrustTier::Existing
        );
    }

    #[tokio::test]
    async fn stale_booking_does_not_count() {
        let rosters = Arc::new(MemoryRosters::new());
        rosters.add_booking("+15550102", Utc::now() - chrono::Duration::days(45));
        assert_eq!(
            classifier(rosters).classify("+15550102").await,
            TrustTier::Unknown
        );
    }

    #[tokio::test]
    async fn recent_conversation_classifies_new() {
        let rosters = Arc::new(MemoryRosters::new());
        rosters.add_conversation("+15550103", Utc::now() - chrono::Duration::days(2));
        assert_eq!(
            classifier(rosters).classify("+15550103").await,
            TrustTier::New
        );
    }

    #[tokio::test]
    async fn no_history_classifies_unknown() {
        let rosters = Arc::new(MemoryRosters::new());
        assert_eq!(
            classifier(rosters).classify("+15550199").await,
            TrustTier::Unknown
        );
    }

    struct FailingRosters;

    #[async_trait]
    impl RosterDirectory for FailingRosters {
        async fn is_allow_listed(&self, _phone: &str) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("roster store down".into()))
        }
        async fn is_known_client(&self, _phone: &str) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("roster store down".into()))
        }
        async fn has_booking_since(
            &self,
            _phone: &str,
            _since: DateTime<Utc>,
        ) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("roster store down".into()))
        }
        async fn has_conversation_since(
            &self,
            _phone: &str,
            _since: DateTime<Utc>,
        ) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("roster store down".into()))
        }
    }

    #[tokio::test]
    async fn lookup_error_classifies_unknown() {
        let classifier = TrustClassifier::new(Arc::new(FailingRosters), 30, 7);
        assert_eq!(classifier.classify("+15550100").await, TrustTier::Unknown);
    }
}

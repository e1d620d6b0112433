//! Per-device suspicion scoring and one-way blacklisting.
//!
//! Each reported activity adds a fixed weight to the device's score.
//! Once the score reaches the threshold the device is blacklisted for
//! good. Scores never decay.
//!
//! Records live behind [`SuspicionStore`] so a multi-instance deployment
//! can back them with a shared store; [`MemorySuspicionStore`] covers a
//! single process.

use crate::clock::Clock;
use crate::CoinlockError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Kind of abuse signal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    /// Client clock far from server time or rolled back.
    TimeManipulation,
    /// Repeated reward claims inside the cooldown.
    QuickRewards,
    /// Unlock proof failed verification.
    InvalidSignature,
    /// Device info reports root, emulator or id tampering.
    SuspiciousDeviceInfo,
    /// Client self-reported a security violation.
    SecurityViolation,
    /// Any other signal.
    Other(String),
}

impl ActivityType {
    /// Score weight of this signal.
    pub fn weight(&self) -> u32 {
        match self {
            Self::TimeManipulation => 10,
            Self::QuickRewards => 5,
            Self::InvalidSignature => 15,
            Self::SuspiciousDeviceInfo => 8,
            Self::SecurityViolation => 30,
            Self::Other(_) => 1,
        }
    }

    /// Wire name.
    pub fn as_str(&self) -> &str {
        match self {
            Self::TimeManipulation => "time_manipulation",
            Self::QuickRewards => "quick_rewards",
            Self::InvalidSignature => "invalid_signature",
            Self::SuspiciousDeviceInfo => "suspicious_device_info",
            Self::SecurityViolation => "security_violation",
            Self::Other(name) => name,
        }
    }

    /// Parse a wire name; unknown names become `Other`.
    pub fn parse(name: &str) -> Self {
        match name {
            "time_manipulation" => Self::TimeManipulation,
            "quick_rewards" => Self::QuickRewards,
            "invalid_signature" => Self::InvalidSignature,
            "suspicious_device_info" => Self::SuspiciousDeviceInfo,
            "security_violation" => Self::SecurityViolation,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One flagged activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuspicionActivity {
    /// When it was reported.
    pub timestamp: DateTime<Utc>,
    /// Signal kind.
    pub activity_type: ActivityType,
    /// Free-text detail.
    pub detail: String,
}

/// Accumulated suspicion for one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuspicionRecord {
    /// First flagged activity.
    pub first_detected: DateTime<Utc>,
    /// Every flagged activity, oldest first.
    pub activities: Vec<SuspicionActivity>,
    /// Sum of weights.
    pub score: u32,
    /// One-way blacklist flag.
    pub blacklisted: bool,
    /// When the threshold was crossed.
    pub blacklisted_at: Option<DateTime<Utc>>,
}

/// Result of recording one activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuspicionOutcome {
    /// Score after the activity.
    pub score: u32,
    /// Whether the device is blacklisted now.
    pub blacklisted: bool,
    /// Whether this activity crossed the threshold.
    pub newly_blacklisted: bool,
}

/// Storage for suspicion records.
///
/// `record_activity` must be atomic per device: the score read, the
/// increment and the threshold check happen as one step.
pub trait SuspicionStore: Send + Sync {
    /// Append an activity, add its weight and apply the threshold.
    fn record_activity(
        &self,
        device_id: &str,
        activity: SuspicionActivity,
        weight: u32,
        threshold: u32,
    ) -> Result<SuspicionOutcome, CoinlockError>;

    /// Current record, if the device was ever flagged.
    fn get(&self, device_id: &str) -> Result<Option<SuspicionRecord>, CoinlockError>;
}

/// Process-local suspicion store.
#[derive(Debug, Default)]
pub struct MemorySuspicionStore {
    records: Mutex<HashMap<String, SuspicionRecord>>,
}

impl MemorySuspicionStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SuspicionStore for MemorySuspicionStore {
    fn record_activity(
        &self,
        device_id: &str,
        activity: SuspicionActivity,
        weight: u32,
        threshold: u32,
    ) -> Result<SuspicionOutcome, CoinlockError> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| CoinlockError::ServerError("suspicion store lock poisoned".to_string()))?;

        let now = activity.timestamp;
        let record = records
            .entry(device_id.to_string())
            .or_insert_with(|| SuspicionRecord {
                first_detected: now,
                activities: Vec::new(),
                score: 0,
                blacklisted: false,
                blacklisted_at: None,
            });

        record.activities.push(activity);
        record.score = record.score.saturating_add(weight);

        let newly_blacklisted = !record.blacklisted && record.score >= threshold;
        if newly_blacklisted {
            record.blacklisted = true;
            record.blacklisted_at = Some(now);
        }

        Ok(SuspicionOutcome {
            score: record.score,
            blacklisted: record.blacklisted,
            newly_blacklisted,
        })
    }

    fn get(&self, device_id: &str) -> Result<Option<SuspicionRecord>, CoinlockError> {
        let records = self
            .records
            .lock()
            .map_err(|_| CoinlockError::ServerError("suspicion store lock poisoned".to_string()))?;
        Ok(records.get(device_id).cloned())
    }
}

/// Weighted abuse-signal accumulator.
pub struct SuspicionEngine {
    store: Arc<dyn SuspicionStore>,
    threshold: u32,
    clock: Arc<dyn Clock>,
}

impl SuspicionEngine {
    /// Create an engine over the given store.
    pub fn new(store: Arc<dyn SuspicionStore>, threshold: u32, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            threshold,
            clock,
        }
    }

    /// Create an engine with a fresh in-memory store.
    pub fn in_memory(threshold: u32, clock: Arc<dyn Clock>) -> Self {
        Self::new(Arc::new(MemorySuspicionStore::new()), threshold, clock)
    }

    /// Record an activity and return the updated outcome.
    pub fn report(
        &self,
        device_id: &str,
        activity_type: ActivityType,
        detail: impl Into<String>,
    ) -> Result<SuspicionOutcome, CoinlockError> {
        let weight = activity_type.weight();
        let activity = SuspicionActivity {
            timestamp: self.clock.now_utc(),
            activity_type: activity_type.clone(),
            detail: detail.into(),
        };

        let outcome = self
            .store
            .record_activity(device_id, activity, weight, self.threshold)?;

        if outcome.newly_blacklisted {
            warn!(
                device_id,
                activity = %activity_type,
                score = outcome.score,
                "device blacklisted"
            );
        } else {
            debug!(
                device_id,
                activity = %activity_type,
                weight,
                score = outcome.score,
                "suspicious activity recorded"
            );
        }

        Ok(outcome)
    }

    /// Current score, zero for devices never flagged.
    pub fn score(&self, device_id: &str) -> Result<u32, CoinlockError> {
        Ok(self.store.get(device_id)?.map(|r| r.score).unwrap_or(0))
    }

    /// Whether the device is blacklisted.
    pub fn is_blacklisted(&self, device_id: &str) -> Result<bool, CoinlockError> {
        Ok(self
            .store
            .get(device_id)?
            .map(|r| r.blacklisted)
            .unwrap_or(false))
    }

    /// Fail with `Blacklisted` for blacklisted devices.
    pub fn ensure_allowed(&self, device_id: &str) -> Result<(), CoinlockError> {
        if self.is_blacklisted(device_id)? {
            debug!(device_id, "rejecting blacklisted device");
            return Err(CoinlockError::Blacklisted);
        }
        Ok(())
    }

    /// Full record for inspection.
    pub fn record(&self, device_id: &str) -> Result<Option<SuspicionRecord>, CoinlockError> {
        self.store.get(device_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;

    const DEVICE: &str = "device-0001";

    fn engine() -> SuspicionEngine {
        SuspicionEngine::in_memory(
            50,
            Arc::new(MockClock::from_rfc3339("2025-01-15T12:00:00Z")),
        )
    }

    #[test]
    fn test_weights() {
        assert_eq!(ActivityType::TimeManipulation.weight(), 10);
        assert_eq!(ActivityType::QuickRewards.weight(), 5);
        assert_eq!(ActivityType::InvalidSignature.weight(), 15);
        assert_eq!(ActivityType::SuspiciousDeviceInfo.weight(), 8);
        assert_eq!(ActivityType::SecurityViolation.weight(), 30);
        assert_eq!(ActivityType::Other("proxy".into()).weight(), 1);
    }

    #[test]
    fn test_parse_roundtrips_known_names() {
        for activity in [
            ActivityType::TimeManipulation,
            ActivityType::QuickRewards,
            ActivityType::InvalidSignature,
            ActivityType::SuspiciousDeviceInfo,
            ActivityType::SecurityViolation,
        ] {
            assert_eq!(ActivityType::parse(activity.as_str()), activity);
        }
        assert_eq!(
            ActivityType::parse("vpn_usage"),
            ActivityType::Other("vpn_usage".into())
        );
    }

    #[test]
    fn test_unflagged_device_is_clean() {
        let engine = engine();
        assert_eq!(engine.score(DEVICE).unwrap(), 0);
        assert!(!engine.is_blacklisted(DEVICE).unwrap());
        assert!(engine.record(DEVICE).unwrap().is_none());
        assert!(engine.ensure_allowed(DEVICE).is_ok());
    }

    #[test]
    fn test_score_is_sum_of_weights() {
        let engine = engine();
        engine.report(DEVICE, ActivityType::QuickRewards, "a").unwrap();
        engine.report(DEVICE, ActivityType::TimeManipulation, "b").unwrap();
        let outcome = engine
            .report(DEVICE, ActivityType::Other("x".into()), "c")
            .unwrap();
        assert_eq!(outcome.score, 16);
        assert!(!outcome.blacklisted);

        let record = engine.record(DEVICE).unwrap().unwrap();
        assert_eq!(record.activities.len(), 3);
        assert_eq!(record.activities[0].activity_type, ActivityType::QuickRewards);
    }

    #[test]
    fn test_blacklist_at_threshold() {
        let engine = engine();
        engine.report(DEVICE, ActivityType::SecurityViolation, "").unwrap();
        engine.report(DEVICE, ActivityType::InvalidSignature, "").unwrap();
        let outcome = engine.report(DEVICE, ActivityType::QuickRewards, "").unwrap();

        assert_eq!(outcome.score, 50);
        assert!(outcome.blacklisted);
        assert!(outcome.newly_blacklisted);
        assert!(matches!(
            engine.ensure_allowed(DEVICE),
            Err(CoinlockError::Blacklisted)
        ));
    }

    #[test]
    fn test_blacklist_is_permanent_and_reported_once() {
        let engine = engine();
        engine.report(DEVICE, ActivityType::SecurityViolation, "").unwrap();
        let crossing = engine.report(DEVICE, ActivityType::SecurityViolation, "").unwrap();
        assert!(crossing.newly_blacklisted);

        let after = engine.report(DEVICE, ActivityType::Other("x".into()), "").unwrap();
        assert!(after.blacklisted);
        assert!(!after.newly_blacklisted);
        assert_eq!(after.score, 61);
    }

    #[test]
    fn test_devices_are_independent() {
        let engine = engine();
        engine.report(DEVICE, ActivityType::SecurityViolation, "").unwrap();
        engine.report(DEVICE, ActivityType::SecurityViolation, "").unwrap();
        assert!(engine.is_blacklisted(DEVICE).unwrap());
        assert!(!engine.is_blacklisted("device-0002").unwrap());
    }

    #[test]
    fn test_first_detected_is_kept() {
        let clock = Arc::new(MockClock::from_rfc3339("2025-01-15T12:00:00Z"));
        let engine = SuspicionEngine::in_memory(50, clock.clone());
        engine.report(DEVICE, ActivityType::QuickRewards, "").unwrap();
        clock.advance(chrono::Duration::hours(2));
        engine.report(DEVICE, ActivityType::QuickRewards, "").unwrap();

        let record = engine.record(DEVICE).unwrap().unwrap();
        assert_eq!(record.first_detected.to_rfc3339(), "2025-01-15T12:00:00+00:00");
        assert_eq!(
            record.activities[1].timestamp.to_rfc3339(),
            "2025-01-15T14:00:00+00:00"
        );
    }
}

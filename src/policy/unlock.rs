//! Unlock purchase, proof validation and violation handling.
//!
//! The server is the only source of proofs. Client-held proofs are checked
//! against a recomputed value and never stored or echoed back.

use crate::clock::Clock;
use crate::crypto::proof::SignatureService;
use crate::integrity::clock_skew::ClockIntegrityMonitor;
use crate::integrity::suspicion::ActivityType;
use crate::ledger::{DeviceLedger, Idempotency};
use crate::protocol::device_id::validate_device_id;
use crate::protocol::models::{
    unlock_expiry_at, DeviceAccount, DeviceInfo, ProofValidation, SecurityViolationRecord,
    UnlockReceipt, ViolationAction,
};
use crate::sources::{Plan, PlanSource};
use crate::CoinlockError;
use chrono::{DateTime, Duration};
use std::sync::Arc;
use tracing::{info, warn};

/// Gate for spending coins and managing unlock proofs.
pub struct UnlockGate {
    ledger: Arc<DeviceLedger>,
    signer: Arc<SignatureService>,
    plans: Arc<dyn PlanSource>,
    monitor: Arc<ClockIntegrityMonitor>,
    clock: Arc<dyn Clock>,
    max_duration_days: u32,
    idempotency_window: Duration,
}

impl UnlockGate {
    /// Create an unlock gate.
    pub fn new(
        ledger: Arc<DeviceLedger>,
        signer: Arc<SignatureService>,
        plans: Arc<dyn PlanSource>,
        monitor: Arc<ClockIntegrityMonitor>,
        clock: Arc<dyn Clock>,
        max_duration_days: u32,
        idempotency_window: Duration,
    ) -> Self {
        Self {
            ledger,
            signer,
            plans,
            monitor,
            clock,
            max_duration_days,
            idempotency_window,
        }
    }

    /// Spend the plan cost and unlock the feature.
    ///
    /// # Arguments
    /// * `requested_days` - Unlock length; `None` or `0` uses the plan default
    /// * `idempotency_key` - Key identifying one logical purchase across retries
    ///
    /// # Errors
    /// * `InvalidDuration` - Requested length above the configured maximum
    /// * `InsufficientFunds` - Balance below the plan cost
    pub fn purchase_unlock(
        &self,
        device_id: &str,
        requested_days: Option<u32>,
        idempotency_key: Option<&str>,
    ) -> Result<UnlockReceipt, CoinlockError> {
        let plan = self.plans.plan();
        let duration_days = self.resolve_duration(requested_days, &plan)?;
        let idempotency = idempotency_key.map(|key| Idempotency {
            key,
            window: self.idempotency_window,
        });

        self.ledger
            .purchase_unlock(device_id, plan.required_coins, duration_days, idempotency)
    }

    /// Check a client-held proof.
    ///
    /// A mismatch is reported as `invalid_signature` and returned as
    /// `valid = false`. Validation never changes the account.
    pub fn validate_proof(
        &self,
        device_id: &str,
        timestamp_ms: i64,
        duration_days: u32,
        proof: &str,
    ) -> Result<ProofValidation, CoinlockError> {
        validate_device_id(device_id)?;
        self.ledger.suspicion().ensure_allowed(device_id)?;

        if !self.signer.verify(device_id, timestamp_ms, duration_days, proof) {
            warn!(device_id, timestamp_ms, duration_days, "unlock proof mismatch");
            self.ledger.escalate(
                device_id,
                ActivityType::InvalidSignature,
                "proof verification failed",
            )?;
            return Ok(ProofValidation {
                valid: false,
                expired: false,
                unlock_expiry: None,
                remaining_time_ms: 0,
            });
        }

        let granted = DateTime::from_timestamp_millis(timestamp_ms)
            .ok_or(CoinlockError::InvalidTimestamp { timestamp_ms })?;
        let expiry =
            unlock_expiry_at(granted, duration_days).ok_or(CoinlockError::InvalidDuration {
                days: duration_days,
                max_days: self.max_duration_days,
            })?;
        let now = self.clock.now_utc();
        let expired = now > expiry;

        Ok(ProofValidation {
            valid: true,
            expired,
            unlock_expiry: Some(expiry),
            remaining_time_ms: (expiry - now).num_milliseconds().max(0),
        })
    }

    /// Record an unlock the client says it already holds and re-issue a
    /// server proof for it.
    ///
    /// # Arguments
    /// * `timestamp_ms` - When the client says the unlock was granted
    /// * `duration_days` - Claimed unlock length
    /// * `device_info` - Client snapshot
    /// * `claimed_proof` - The client's own copy, checked but never reused
    ///
    /// # Errors
    /// * `InvalidTimestamp` - Grant time lies in the future
    /// * `InvalidSignature` - The client's copy does not verify
    /// * `UnlockRevoked` - The unlock was revoked after it was granted
    pub fn report_client_unlock(
        &self,
        device_id: &str,
        timestamp_ms: i64,
        duration_days: u32,
        device_info: &DeviceInfo,
        claimed_proof: Option<&str>,
    ) -> Result<UnlockReceipt, CoinlockError> {
        validate_device_id(device_id)?;
        self.ledger.suspicion().ensure_allowed(device_id)?;

        let duration_days = self.resolve_duration(Some(duration_days), &self.plans.plan())?;

        if self.monitor.is_future_dated(timestamp_ms) {
            self.ledger.escalate(
                device_id,
                ActivityType::TimeManipulation,
                format!("client unlock dated in the future ({})", timestamp_ms),
            )?;
            return Err(CoinlockError::InvalidTimestamp { timestamp_ms });
        }

        if let Some(proof) = claimed_proof {
            if !self.signer.verify(device_id, timestamp_ms, duration_days, proof) {
                warn!(device_id, timestamp_ms, "client unlock carried a forged proof");
                self.ledger.escalate(
                    device_id,
                    ActivityType::InvalidSignature,
                    "client unlock proof verification failed",
                )?;
                return Err(CoinlockError::InvalidSignature);
            }
        }

        if device_info.is_rooted() || device_info.is_emulator() {
            self.ledger.escalate(
                device_id,
                ActivityType::SuspiciousDeviceInfo,
                "client unlock reported from untrusted device",
            )?;
        }

        let (account, proof) = self
            .ledger
            .restore_unlock(device_id, timestamp_ms, duration_days)?;

        Ok(UnlockReceipt {
            account,
            proof,
            unlock_timestamp_ms: timestamp_ms,
            duration_days,
            coins_spent: 0,
            replayed: false,
        })
    }

    /// Handle a client self-reported security violation.
    ///
    /// Always revokes the unlock, then escalates suspicion with the
    /// `security_violation` weight. The returned account includes the
    /// blacklist record when this report crossed the threshold.
    pub fn report_security_violation(
        &self,
        device_id: &str,
        device_info: DeviceInfo,
        details: &str,
    ) -> Result<DeviceAccount, CoinlockError> {
        validate_device_id(device_id)?;
        self.ledger.suspicion().ensure_allowed(device_id)?;

        let kind = device_info.violation_kind();
        let record = SecurityViolationRecord {
            timestamp: self.clock.now_utc(),
            kind,
            details: details.to_string(),
            device_info,
            action: ViolationAction::Revoke,
        };

        let account = self.ledger.record_violation(device_id, record)?;
        warn!(device_id, kind = ?kind, "security violation reported, unlock revoked");

        let outcome = self.ledger.escalate(
            device_id,
            ActivityType::SecurityViolation,
            details.to_string(),
        )?;
        info!(device_id, score = outcome.score, "violation escalated");

        if outcome.newly_blacklisted {
            return Ok(self.ledger.find(device_id)?.unwrap_or(account));
        }
        Ok(account)
    }

    fn resolve_duration(&self, requested: Option<u32>, plan: &Plan) -> Result<u32, CoinlockError> {
        let days = match requested {
            None | Some(0) => plan.default_unlock_duration_days,
            Some(days) => days,
        };

        if days == 0 || days > self.max_duration_days {
            return Err(CoinlockError::InvalidDuration {
                days,
                max_days: self.max_duration_days,
            });
        }
        Ok(days)
    }
}

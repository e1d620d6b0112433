//! Device ledger: the only writer of [`DeviceAccount`] records.
//!
//! Every mutation is a closure applied to a fresh copy of the stored account
//! and committed with compare-and-swap. A closure that fails leaves storage
//! untouched, and a lost race re-runs the closure against the newer record,
//! so concurrent credits and debits for one device never interleave.
//!
//! Unlock expiry is applied lazily on every access rather than by a sweep.

use crate::clock::Clock;
use crate::config::MAX_UNLOCK_DURATION_DAYS;
use crate::crypto::proof::{SignatureService, UnlockProof};
use crate::integrity::clock_skew::ClockObservation;
use crate::integrity::suspicion::{ActivityType, SuspicionEngine, SuspicionOutcome};
use crate::protocol::device_id::validate_device_id;
use crate::protocol::models::{
    unlock_expiry_at, DeviceAccount, DeviceInfo, PurchaseRecord, RewardEvent,
    SecurityViolationRecord, UnlockReceipt, ViolationAction, ViolationKind,
};
use crate::store::{AccountStore, Versioned};
use crate::CoinlockError;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Optional idempotency key for a purchase, with its dedup window.
#[derive(Debug, Clone, Copy)]
pub struct Idempotency<'a> {
    /// Client-chosen key for one logical purchase.
    pub key: &'a str,
    /// How long the key is remembered.
    pub window: Duration,
}

/// Owner of all per-device balance and unlock state.
pub struct DeviceLedger {
    store: Arc<dyn AccountStore>,
    signer: Arc<SignatureService>,
    suspicion: Arc<SuspicionEngine>,
    clock: Arc<dyn Clock>,
    max_retries: u32,
}

impl DeviceLedger {
    /// Create a ledger over the given store.
    pub fn new(
        store: Arc<dyn AccountStore>,
        signer: Arc<SignatureService>,
        suspicion: Arc<SuspicionEngine>,
        clock: Arc<dyn Clock>,
        max_retries: u32,
    ) -> Self {
        Self {
            store,
            signer,
            suspicion,
            clock,
            max_retries: max_retries.max(1),
        }
    }

    /// Return the account, creating a zero-balance locked one if needed.
    ///
    /// This is the read path: an expired unlock is flipped to locked and
    /// persisted before the account is returned.
    pub fn get_or_create(&self, device_id: &str) -> Result<DeviceAccount, CoinlockError> {
        let (account, ()) = self.update(device_id, true, |_, _| Ok(()))?;
        Ok(account)
    }

    /// Load an account without creating it or applying expiry.
    pub fn find(&self, device_id: &str) -> Result<Option<DeviceAccount>, CoinlockError> {
        validate_device_id(device_id)?;
        Ok(self.store.load(device_id)?.map(|stored| stored.value))
    }

    /// Credit coins and append a reward event.
    ///
    /// # Errors
    /// * `InvalidAmount` - `amount` is zero
    /// * `Blacklisted` - Device is blacklisted
    pub fn credit(
        &self,
        device_id: &str,
        amount: u64,
        ad_unit_id: &str,
        ad_name: &str,
        device_info: DeviceInfo,
    ) -> Result<DeviceAccount, CoinlockError> {
        self.credit_inner(device_id, amount, ad_unit_id, ad_name, device_info, None)
    }

    /// Credit coins unless the previous reward is younger than `cooldown`.
    ///
    /// The cooldown is checked inside the same atomic update as the credit.
    ///
    /// # Errors
    /// * `CooldownActive` - Previous reward is too recent
    pub fn credit_after_cooldown(
        &self,
        device_id: &str,
        amount: u64,
        ad_unit_id: &str,
        ad_name: &str,
        device_info: DeviceInfo,
        cooldown: Duration,
    ) -> Result<DeviceAccount, CoinlockError> {
        self.credit_inner(
            device_id,
            amount,
            ad_unit_id,
            ad_name,
            device_info,
            Some(cooldown),
        )
    }

    fn credit_inner(
        &self,
        device_id: &str,
        amount: u64,
        ad_unit_id: &str,
        ad_name: &str,
        device_info: DeviceInfo,
        cooldown: Option<Duration>,
    ) -> Result<DeviceAccount, CoinlockError> {
        if amount == 0 {
            return Err(CoinlockError::InvalidAmount { amount });
        }

        let (account, ()) = self.update(device_id, true, |account, now| {
            if let Some(cooldown) = cooldown {
                if let Some(retry_after_seconds) = account.cooldown_remaining_seconds(now, cooldown)
                {
                    return Err(CoinlockError::CooldownActive {
                        retry_after_seconds,
                    });
                }
            }

            account.coin_balance = account
                .coin_balance
                .checked_add(amount)
                .ok_or(CoinlockError::InvalidAmount { amount })?;
            account.reward_history.push(RewardEvent {
                timestamp: now,
                ad_unit_id: ad_unit_id.to_string(),
                ad_name: ad_name.to_string(),
                coins_earned: amount,
                device_info: device_info.clone(),
            });
            account.last_reward_timestamp = Some(now);
            Ok(())
        })?;

        info!(
            device_id,
            amount,
            balance = account.coin_balance,
            "coins credited"
        );
        Ok(account)
    }

    /// Spend `cost` coins and unlock for `duration_days` from server now.
    ///
    /// # Errors
    /// * `InsufficientFunds` - Balance below `cost`
    pub fn debit_for_unlock(
        &self,
        device_id: &str,
        cost: u64,
        duration_days: u32,
    ) -> Result<(DeviceAccount, UnlockProof), CoinlockError> {
        let receipt = self.purchase_unlock(device_id, cost, duration_days, None)?;
        Ok((receipt.account, receipt.proof))
    }

    /// Debit and unlock, returning the original receipt for a repeated
    /// idempotency key instead of charging twice.
    ///
    /// # Errors
    /// * `InvalidDuration` - `duration_days` is zero or above the hard cap
    /// * `InsufficientFunds` - Balance below `cost`
    pub fn purchase_unlock(
        &self,
        device_id: &str,
        cost: u64,
        duration_days: u32,
        idempotency: Option<Idempotency<'_>>,
    ) -> Result<UnlockReceipt, CoinlockError> {
        check_duration(duration_days)?;
        let (account, outcome) = self.update(device_id, true, |account, now| {
            if let Some(idem) = idempotency {
                account
                    .recent_purchases
                    .retain(|p| now - p.purchased_at <= idem.window);

                if let Some(previous) = account
                    .recent_purchases
                    .iter()
                    .find(|p| p.idempotency_key == idem.key)
                {
                    return Ok(PurchaseOutcome::Replayed(previous.clone()));
                }
            }

            if account.coin_balance < cost {
                return Err(CoinlockError::InsufficientFunds {
                    required: cost,
                    current: account.coin_balance,
                    shortfall: cost - account.coin_balance,
                });
            }

            let granted = now.trunc_subsecs(3);
            let timestamp_ms = granted.timestamp_millis();
            let proof = self.signer.issue(device_id, timestamp_ms, duration_days);

            account.coin_balance -= cost;
            account.is_unlocked = true;
            account.unlock_timestamp = Some(granted);
            account.unlock_duration_days = duration_days;
            account.unlock_signature = Some(proof.clone());

            if let Some(idem) = idempotency {
                account.recent_purchases.push(PurchaseRecord {
                    idempotency_key: idem.key.to_string(),
                    purchased_at: now,
                    cost,
                    unlock_timestamp_ms: timestamp_ms,
                    duration_days,
                    proof: proof.clone(),
                });
            }

            Ok(PurchaseOutcome::Charged {
                proof,
                timestamp_ms,
            })
        })?;

        let receipt = match outcome {
            PurchaseOutcome::Charged {
                proof,
                timestamp_ms,
            } => {
                info!(
                    device_id,
                    cost,
                    duration_days,
                    balance = account.coin_balance,
                    "feature unlocked"
                );
                UnlockReceipt {
                    account,
                    proof,
                    unlock_timestamp_ms: timestamp_ms,
                    duration_days,
                    coins_spent: cost,
                    replayed: false,
                }
            }
            PurchaseOutcome::Replayed(previous) => {
                debug!(device_id, key = %previous.idempotency_key, "purchase replayed");
                UnlockReceipt {
                    account,
                    proof: previous.proof,
                    unlock_timestamp_ms: previous.unlock_timestamp_ms,
                    duration_days: previous.duration_days,
                    coins_spent: 0,
                    replayed: true,
                }
            }
        };

        Ok(receipt)
    }

    /// Record a client-asserted unlock and issue a fresh server proof for it.
    ///
    /// An asserted unlock that has already run out is recorded as locked.
    ///
    /// # Errors
    /// * `InvalidTimestamp` - `timestamp_ms` is out of range
    /// * `InvalidDuration` - `duration_days` is zero, above the hard cap, or
    ///   puts the expiry out of range
    /// * `UnlockRevoked` - A revocation is recorded at or after the grant
    pub fn restore_unlock(
        &self,
        device_id: &str,
        timestamp_ms: i64,
        duration_days: u32,
    ) -> Result<(DeviceAccount, UnlockProof), CoinlockError> {
        check_duration(duration_days)?;
        let granted = DateTime::from_timestamp_millis(timestamp_ms)
            .ok_or(CoinlockError::InvalidTimestamp { timestamp_ms })?;
        if unlock_expiry_at(granted, duration_days).is_none() {
            return Err(CoinlockError::InvalidDuration {
                days: duration_days,
                max_days: MAX_UNLOCK_DURATION_DAYS,
            });
        }
        let proof = self.signer.issue(device_id, timestamp_ms, duration_days);

        let (account, ()) = self.update(device_id, true, |account, now| {
            let revoked = account.security_violations.iter().any(|v| {
                matches!(v.action, ViolationAction::Revoke | ViolationAction::Blacklist)
                    && v.timestamp >= granted
            });
            if revoked {
                return Err(CoinlockError::UnlockRevoked);
            }

            account.is_unlocked = true;
            account.unlock_timestamp = Some(granted);
            account.unlock_duration_days = duration_days;
            account.unlock_signature = Some(proof.clone());
            expire_if_due(account, now);
            Ok(())
        })?;

        info!(device_id, timestamp_ms, duration_days, "client unlock restored");
        Ok((account, proof))
    }

    /// Append a violation and revoke any unlock.
    pub fn record_violation(
        &self,
        device_id: &str,
        record: SecurityViolationRecord,
    ) -> Result<DeviceAccount, CoinlockError> {
        self.append_violation(device_id, record, true)
    }

    /// Append the record that marks a device as blacklisted.
    ///
    /// This is the one write allowed for a blacklisted device.
    pub(crate) fn record_blacklisting(
        &self,
        device_id: &str,
        record: SecurityViolationRecord,
    ) -> Result<DeviceAccount, CoinlockError> {
        self.append_violation(device_id, record, false)
    }

    fn append_violation(
        &self,
        device_id: &str,
        record: SecurityViolationRecord,
        guarded: bool,
    ) -> Result<DeviceAccount, CoinlockError> {
        let (account, ()) = self.update(device_id, guarded, |account, _| {
            account.security_violations.push(record.clone());
            account.clear_unlock();
            Ok(())
        })?;
        Ok(account)
    }

    /// Report an abuse signal for the device.
    ///
    /// When the report pushes the device over the blacklist threshold a
    /// `blacklist` violation is appended and any unlock is revoked.
    pub fn escalate(
        &self,
        device_id: &str,
        activity: ActivityType,
        detail: impl Into<String>,
    ) -> Result<SuspicionOutcome, CoinlockError> {
        let detail = detail.into();
        let kind = match activity {
            ActivityType::TimeManipulation => ViolationKind::TimeManipulation,
            _ => ViolationKind::Other,
        };

        let outcome = self.suspicion.report(device_id, activity, detail.clone())?;

        if outcome.newly_blacklisted {
            warn!(device_id, score = outcome.score, "revoking unlock of blacklisted device");
            self.record_blacklisting(
                device_id,
                SecurityViolationRecord {
                    timestamp: self.clock.now_utc(),
                    kind,
                    details: detail,
                    device_info: DeviceInfo::new(),
                    action: ViolationAction::Blacklist,
                },
            )?;
        }

        Ok(outcome)
    }

    /// Suspicion engine consulted before every mutation.
    pub fn suspicion(&self) -> &SuspicionEngine {
        &self.suspicion
    }

    /// Persist a significant client clock offset to the diagnostics.
    pub fn record_clock_offset(
        &self,
        device_id: &str,
        observation: &ClockObservation,
    ) -> Result<DeviceAccount, CoinlockError> {
        let (account, ()) = self.update(device_id, true, |account, _| {
            if observation.significant {
                account.last_sync_timestamp = Some(observation.observed_at);
                account.time_offset_ms = observation.offset_ms;
            }
            Ok(())
        })?;
        Ok(account)
    }

    /// `now > unlock_timestamp + unlock_duration_days` for an unlocked account.
    pub fn is_unlock_expired(&self, account: &DeviceAccount) -> bool {
        account.is_unlock_expired(self.clock.now_utc())
    }

    /// Apply `mutate` atomically to the device's account.
    ///
    /// Nothing is written when `mutate` fails or changes nothing.
    fn update<T, F>(
        &self,
        device_id: &str,
        guarded: bool,
        mut mutate: F,
    ) -> Result<(DeviceAccount, T), CoinlockError>
    where
        F: FnMut(&mut DeviceAccount, DateTime<Utc>) -> Result<T, CoinlockError>,
    {
        validate_device_id(device_id)?;
        if guarded {
            self.suspicion.ensure_allowed(device_id)?;
        }

        for attempt in 1..=self.max_retries {
            let current = self.load_or_insert(device_id)?;
            let now = self.clock.now_utc();

            let mut next = current.value.clone();
            expire_if_due(&mut next, now);
            let output = mutate(&mut next, now)?;

            if next == current.value {
                return Ok((next, output));
            }

            next.updated_at = now;
            if self.store.compare_and_swap(&next, current.version)? {
                return Ok((next, output));
            }

            debug!(device_id, attempt, "concurrent account update, retrying");
        }

        Err(CoinlockError::StoreConflict {
            device_id: device_id.to_string(),
            attempts: self.max_retries,
        })
    }

    fn load_or_insert(&self, device_id: &str) -> Result<Versioned<DeviceAccount>, CoinlockError> {
        if let Some(existing) = self.store.load(device_id)? {
            return Ok(existing);
        }

        let fresh = DeviceAccount::new(device_id, self.clock.now_utc());
        if self.store.insert(&fresh)? {
            debug!(device_id, "account created");
            return Ok(Versioned {
                version: 1,
                value: fresh,
            });
        }

        // Lost the creation race; the winner's record is there now.
        self.store.load(device_id)?.ok_or_else(|| {
            CoinlockError::ServerError(format!("account for {} vanished after insert", device_id))
        })
    }
}

enum PurchaseOutcome {
    Charged { proof: UnlockProof, timestamp_ms: i64 },
    Replayed(PurchaseRecord),
}

fn check_duration(duration_days: u32) -> Result<(), CoinlockError> {
    if duration_days == 0 || duration_days > MAX_UNLOCK_DURATION_DAYS {
        return Err(CoinlockError::InvalidDuration {
            days: duration_days,
            max_days: MAX_UNLOCK_DURATION_DAYS,
        });
    }
    Ok(())
}

fn expire_if_due(account: &mut DeviceAccount, now: DateTime<Utc>) {
    if account.is_unlock_expired(now) {
        debug!(device_id = %account.device_id, "unlock expired");
        account.clear_unlock();
    }
}

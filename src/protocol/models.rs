//! Ledger records and the request/response shapes built from them.

use crate::crypto::proof::UnlockProof;
use crate::sources::Plan;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Opaque device-info snapshot sent by the client.
///
/// The ledger stores it verbatim. Only a few well-known flags are read:
/// `isRooted`, `isEmulator` and `deviceIdValid`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceInfo(BTreeMap<String, serde_json::Value>);

impl DeviceInfo {
    /// Empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Read a raw value.
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    /// Read a boolean flag, if present and boolean.
    pub fn flag(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(serde_json::Value::as_bool)
    }

    /// Client reports a rooted device.
    pub fn is_rooted(&self) -> bool {
        self.flag("isRooted").unwrap_or(false)
    }

    /// Client reports running in an emulator.
    pub fn is_emulator(&self) -> bool {
        self.flag("isEmulator").unwrap_or(false)
    }

    /// Client's own id check failed.
    pub fn id_tampered(&self) -> bool {
        self.flag("deviceIdValid") == Some(false)
    }

    /// Violation kind implied by the flags, most specific first.
    pub fn violation_kind(&self) -> ViolationKind {
        if self.is_rooted() {
            ViolationKind::Root
        } else if self.is_emulator() {
            ViolationKind::Emulator
        } else if self.id_tampered() {
            ViolationKind::IdTampering
        } else {
            ViolationKind::Other
        }
    }
}

/// One successful reward credit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardEvent {
    /// When the credit happened (server time).
    pub timestamp: DateTime<Utc>,

    /// Ad unit that produced the reward.
    pub ad_unit_id: String,

    /// Display name of the ad unit.
    pub ad_name: String,

    /// Coins credited.
    pub coins_earned: u64,

    /// Client snapshot at claim time.
    #[serde(default)]
    pub device_info: DeviceInfo,
}

/// Category of a security violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// Rooted/jailbroken device.
    Root,
    /// Emulator.
    Emulator,
    /// Device id was tampered with.
    IdTampering,
    /// Clock manipulation.
    TimeManipulation,
    /// Anything else.
    Other,
}

/// What the server did about a violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationAction {
    /// Logged only.
    Warning,
    /// Unlock revoked.
    Revoke,
    /// Device blacklisted.
    Blacklist,
    /// No action.
    None,
}

/// Immutable record of a security violation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityViolationRecord {
    /// When it was recorded (server time).
    pub timestamp: DateTime<Utc>,

    /// Violation category.
    #[serde(rename = "type")]
    pub kind: ViolationKind,

    /// Free-text detail.
    pub details: String,

    /// Client snapshot, if any.
    #[serde(default)]
    pub device_info: DeviceInfo,

    /// Action taken.
    pub action: ViolationAction,
}

/// A completed unlock purchase, kept for idempotent retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRecord {
    /// Client-supplied idempotency key.
    pub idempotency_key: String,

    /// Server time of the purchase.
    pub purchased_at: DateTime<Utc>,

    /// Coins debited.
    pub cost: u64,

    /// Unlock timestamp signed into the proof (epoch ms).
    pub unlock_timestamp_ms: i64,

    /// Unlock duration signed into the proof.
    pub duration_days: u32,

    /// Proof issued for the purchase.
    pub proof: UnlockProof,
}

/// Per-device ledger record.
///
/// `unlock_expiry` is derived, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceAccount {
    /// Unique device identifier.
    pub device_id: String,

    /// Spendable coins. Never negative.
    pub coin_balance: u64,

    /// Whether the premium feature is unlocked.
    pub is_unlocked: bool,

    /// When the unlock was granted.
    pub unlock_timestamp: Option<DateTime<Utc>>,

    /// Unlock length in days.
    pub unlock_duration_days: u32,

    /// Last proof issued for the unlock.
    pub unlock_signature: Option<UnlockProof>,

    /// Last successful reward credit.
    pub last_reward_timestamp: Option<DateTime<Utc>>,

    /// Append-only, chronological.
    #[serde(default)]
    pub reward_history: Vec<RewardEvent>,

    /// Append-only, chronological.
    #[serde(default)]
    pub security_violations: Vec<SecurityViolationRecord>,

    /// Recent purchases within the idempotency window.
    #[serde(default)]
    pub recent_purchases: Vec<PurchaseRecord>,

    /// Last time a client clock was observed.
    pub last_sync_timestamp: Option<DateTime<Utc>>,

    /// Server minus client time at the last significant observation.
    #[serde(default)]
    pub time_offset_ms: i64,

    /// Record creation time.
    pub created_at: DateTime<Utc>,

    /// Last write time.
    pub updated_at: DateTime<Utc>,
}

/// `granted + duration_days`, or `None` when the sum is out of range.
pub fn unlock_expiry_at(granted: DateTime<Utc>, duration_days: u32) -> Option<DateTime<Utc>> {
    granted.checked_add_signed(Duration::days(i64::from(duration_days)))
}

impl DeviceAccount {
    /// Zero-balance, locked account.
    pub fn new(device_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            device_id: device_id.into(),
            coin_balance: 0,
            is_unlocked: false,
            unlock_timestamp: None,
            unlock_duration_days: 0,
            unlock_signature: None,
            last_reward_timestamp: None,
            reward_history: Vec::new(),
            security_violations: Vec::new(),
            recent_purchases: Vec::new(),
            last_sync_timestamp: None,
            time_offset_ms: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// `unlock_timestamp + unlock_duration_days` while unlocked.
    pub fn unlock_expiry(&self) -> Option<DateTime<Utc>> {
        if !self.is_unlocked {
            return None;
        }
        self.unlock_timestamp
            .and_then(|granted| unlock_expiry_at(granted, self.unlock_duration_days))
    }

    /// Unlocked in storage but past its derived expiry.
    ///
    /// An unlocked record without a timestamp, or whose expiry cannot be
    /// represented, is treated as expired.
    pub fn is_unlock_expired(&self, now: DateTime<Utc>) -> bool {
        if !self.is_unlocked {
            return false;
        }
        match self.unlock_expiry() {
            Some(expiry) => now > expiry,
            None => true,
        }
    }

    /// Unlocked and not yet expired.
    pub fn has_active_unlock(&self, now: DateTime<Utc>) -> bool {
        self.is_unlocked && !self.is_unlock_expired(now)
    }

    /// Milliseconds of unlock left, zero when locked or expired.
    pub fn remaining_time_ms(&self, now: DateTime<Utc>) -> i64 {
        self.unlock_expiry()
            .map(|expiry| (expiry - now).num_milliseconds().max(0))
            .unwrap_or(0)
    }

    /// Seconds until the next reward may be claimed, rounded up.
    ///
    /// `None` when no cooldown applies.
    pub fn cooldown_remaining_seconds(&self, now: DateTime<Utc>, cooldown: Duration) -> Option<u64> {
        let last = self.last_reward_timestamp?;
        let elapsed = now - last;
        if elapsed >= cooldown {
            return None;
        }
        let remaining_ms = (cooldown - elapsed).num_milliseconds().max(0) as u64;
        Some(((remaining_ms + 999) / 1000).max(1))
    }

    /// Reset every unlock field to the locked state.
    pub fn clear_unlock(&mut self) {
        self.is_unlocked = false;
        self.unlock_timestamp = None;
        self.unlock_duration_days = 0;
        self.unlock_signature = None;
    }
}

/// Outcome of a successful unlock purchase or re-issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlockReceipt {
    /// Account state after the operation.
    pub account: DeviceAccount,

    /// Proof the client keeps for offline checks.
    pub proof: UnlockProof,

    /// Timestamp signed into the proof (epoch ms).
    pub unlock_timestamp_ms: i64,

    /// Duration signed into the proof.
    pub duration_days: u32,

    /// Coins debited (zero for a replayed or re-issued receipt).
    pub coins_spent: u64,

    /// True when an earlier receipt was returned for a retried key.
    pub replayed: bool,
}

/// Result of checking a client-held proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofValidation {
    /// Signature matched.
    pub valid: bool,

    /// Signature matched but the unlock period is over.
    pub expired: bool,

    /// Derived expiry, only for valid proofs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unlock_expiry: Option<DateTime<Utc>>,

    /// Milliseconds left, zero when invalid or expired.
    pub remaining_time_ms: i64,
}

/// Account view returned to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountStatus {
    /// Device identifier.
    pub device_id: String,

    /// Current balance.
    pub coins: u64,

    /// Unlock status after the lazy expiry check.
    pub is_unlocked: bool,

    /// Derived expiry.
    pub unlock_expiry: Option<DateTime<Utc>>,

    /// Milliseconds of unlock left.
    pub remaining_time_ms: i64,

    /// Last successful reward.
    pub last_reward: Option<DateTime<Utc>>,

    /// Whether a reward can be claimed right now.
    pub can_claim_reward: bool,

    /// Seconds until the next claim, zero when allowed.
    pub cooldown_remaining_seconds: u64,

    /// Plan in force.
    pub plan: Plan,
}

impl AccountStatus {
    /// Build the client view of an account.
    pub fn from_account(account: &DeviceAccount, plan: Plan, now: DateTime<Utc>) -> Self {
        let cooldown = account.cooldown_remaining_seconds(now, plan.reward_cooldown());
        let active = account.has_active_unlock(now);
        Self {
            device_id: account.device_id.clone(),
            coins: account.coin_balance,
            is_unlocked: active,
            unlock_expiry: account.unlock_expiry().filter(|_| active),
            remaining_time_ms: account.remaining_time_ms(now),
            last_reward: account.last_reward_timestamp,
            can_claim_reward: cooldown.is_none(),
            cooldown_remaining_seconds: cooldown.unwrap_or(0),
            plan,
        }
    }
}

/// Server clock reading for client time sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerTime {
    /// Epoch milliseconds.
    pub timestamp_ms: i64,

    /// RFC 3339 rendering.
    pub iso: String,
}

/// One page of reward history, newest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardHistoryPage {
    /// Events on this page.
    pub events: Vec<RewardEvent>,

    /// Total events on the account.
    pub total: usize,

    /// Offset used.
    pub offset: usize,

    /// Limit used after clamping.
    pub limit: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap()
    }

    fn unlocked(days: u32) -> DeviceAccount {
        let mut account = DeviceAccount::new("device-0001", t0());
        account.is_unlocked = true;
        account.unlock_timestamp = Some(t0());
        account.unlock_duration_days = days;
        account
    }

    #[test]
    fn test_new_account_is_locked_and_empty() {
        let account = DeviceAccount::new("device-0001", t0());
        assert_eq!(account.coin_balance, 0);
        assert!(!account.is_unlocked);
        assert_eq!(account.unlock_expiry(), None);
        assert_eq!(account.remaining_time_ms(t0()), 0);
        assert!(!account.is_unlock_expired(t0()));
    }

    #[test]
    fn test_unlock_expiry_is_derived() {
        let account = unlocked(30);
        assert_eq!(account.unlock_expiry(), Some(t0() + Duration::days(30)));
        assert!(!account.is_unlock_expired(t0() + Duration::days(30)));
        assert!(account.is_unlock_expired(t0() + Duration::days(30) + Duration::milliseconds(1)));
    }

    #[test]
    fn test_remaining_time_clamps_to_zero() {
        let account = unlocked(1);
        assert_eq!(account.remaining_time_ms(t0()), 86_400_000);
        assert_eq!(account.remaining_time_ms(t0() + Duration::days(2)), 0);
    }

    #[test]
    fn test_unrepresentable_expiry_does_not_panic() {
        let account = unlocked(u32::MAX);
        assert_eq!(account.unlock_expiry(), None);
        assert!(account.is_unlock_expired(t0()));
        assert_eq!(account.remaining_time_ms(t0()), 0);
        assert_eq!(unlock_expiry_at(t0(), u32::MAX), None);
    }

    #[test]
    fn test_unlocked_without_timestamp_counts_as_expired() {
        let mut account = unlocked(30);
        account.unlock_timestamp = None;
        assert!(account.is_unlock_expired(t0()));
        assert!(!account.has_active_unlock(t0()));
    }

    #[test]
    fn test_cooldown_rounds_up() {
        let mut account = DeviceAccount::new("device-0001", t0());
        let cooldown = Duration::seconds(30);
        assert_eq!(account.cooldown_remaining_seconds(t0(), cooldown), None);

        account.last_reward_timestamp = Some(t0());
        assert_eq!(account.cooldown_remaining_seconds(t0(), cooldown), Some(30));
        assert_eq!(
            account.cooldown_remaining_seconds(t0() + Duration::milliseconds(29_500), cooldown),
            Some(1)
        );
        assert_eq!(
            account.cooldown_remaining_seconds(t0() + Duration::seconds(30), cooldown),
            None
        );
    }

    #[test]
    fn test_clear_unlock() {
        let mut account = unlocked(30);
        account.unlock_signature = Some(UnlockProof::from_client("abc"));
        account.clear_unlock();
        assert!(!account.is_unlocked);
        assert_eq!(account.unlock_timestamp, None);
        assert_eq!(account.unlock_signature, None);
        assert_eq!(account.unlock_duration_days, 0);
    }

    #[test]
    fn test_device_info_classification() {
        assert_eq!(
            DeviceInfo::new().with("isRooted", true).violation_kind(),
            ViolationKind::Root
        );
        assert_eq!(
            DeviceInfo::new().with("isEmulator", true).violation_kind(),
            ViolationKind::Emulator
        );
        assert_eq!(
            DeviceInfo::new().with("deviceIdValid", false).violation_kind(),
            ViolationKind::IdTampering
        );
        assert_eq!(
            DeviceInfo::new().with("osVersion", "14").violation_kind(),
            ViolationKind::Other
        );
        assert!(!DeviceInfo::new().with("isRooted", "yes").is_rooted());
    }

    #[test]
    fn test_violation_record_json_uses_type_field() {
        let record = SecurityViolationRecord {
            timestamp: t0(),
            kind: ViolationKind::TimeManipulation,
            details: "clock".to_string(),
            device_info: DeviceInfo::new(),
            action: ViolationAction::Blacklist,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["type"], "time_manipulation");
        assert_eq!(json["action"], "blacklist");
    }

    #[test]
    fn test_status_reflects_cooldown_and_expiry() {
        let mut account = unlocked(1);
        account.coin_balance = 40;
        account.last_reward_timestamp = Some(t0());

        let status = AccountStatus::from_account(&account, Plan::default(), t0() + Duration::seconds(10));
        assert!(status.is_unlocked);
        assert!(!status.can_claim_reward);
        assert_eq!(status.cooldown_remaining_seconds, 20);

        let later = AccountStatus::from_account(&account, Plan::default(), t0() + Duration::days(2));
        assert!(!later.is_unlocked);
        assert_eq!(later.unlock_expiry, None);
        assert!(later.can_claim_reward);
        assert_eq!(later.remaining_time_ms, 0);
    }
}

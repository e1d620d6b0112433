//! Coinlock error types and their user-facing rejection form.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while operating the ledger.
#[derive(Debug, Error)]
pub enum CoinlockError {
    /// Device identifier has the wrong length or characters.
    #[error("Invalid device id: {reason}")]
    InvalidDeviceId {
        /// Why the identifier was rejected.
        reason: String,
    },

    /// Device has crossed the suspicion threshold.
    #[error("Device is blacklisted")]
    Blacklisted,

    /// Referenced ad unit does not exist.
    #[error("Ad unit not found: {ad_unit_id}")]
    AdUnitNotFound {
        /// The ad unit that was looked up.
        ad_unit_id: String,
    },

    /// Ad unit exists but is not a rewarded ad.
    #[error("Only rewarded ads can give coins (got {ad_type})")]
    WrongAdType {
        /// The declared type of the ad unit.
        ad_type: String,
    },

    /// Credit amount must be positive.
    #[error("Invalid amount: {amount}")]
    InvalidAmount {
        /// The rejected amount.
        amount: u64,
    },

    /// Unlock duration is outside the allowed range.
    #[error("Invalid unlock duration: {days} days (max {max_days})")]
    InvalidDuration {
        /// Requested duration.
        days: u32,
        /// Largest allowed duration.
        max_days: u32,
    },

    /// Client timestamp is implausible.
    #[error("Invalid timestamp: {timestamp_ms}")]
    InvalidTimestamp {
        /// The rejected epoch-millisecond timestamp.
        timestamp_ms: i64,
    },

    /// Reward claimed before the cooldown elapsed.
    #[error("Reward cooldown active, retry in {retry_after_seconds}s")]
    CooldownActive {
        /// Seconds until the next claim is allowed.
        retry_after_seconds: u64,
    },

    /// Balance too low for the requested unlock.
    #[error("Insufficient coins: required {required}, have {current}")]
    InsufficientFunds {
        /// Plan cost.
        required: u64,
        /// Balance at the time of the attempt.
        current: u64,
        /// How many more coins are needed.
        shortfall: u64,
    },

    /// Unlock proof did not verify.
    #[error("Unlock proof signature invalid")]
    InvalidSignature,

    /// Claimed unlock was revoked after it was granted.
    #[error("Unlock was revoked")]
    UnlockRevoked,

    /// Configuration is invalid.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Account store I/O error.
    #[error("Store I/O error: {0}")]
    StoreIO(String),

    /// Optimistic update kept losing to concurrent writers.
    #[error("Store conflict on device {device_id} after {attempts} attempts")]
    StoreConflict {
        /// Device whose record was contended.
        device_id: String,
        /// Number of attempts made.
        attempts: u32,
    },

    /// Unexpected internal failure.
    #[error("Server error: {0}")]
    ServerError(String),
}

/// Generic message for every server-side failure.
const GENERIC_SERVER_MESSAGE: &str = "Internal error, please retry later";

impl CoinlockError {
    /// Stable reason code reported to clients.
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::InvalidDeviceId { .. } => "invalid_device_id",
            Self::Blacklisted => "blacklisted",
            Self::AdUnitNotFound { .. } => "ad_unit_not_found",
            Self::WrongAdType { .. } => "wrong_ad_type",
            Self::InvalidAmount { .. } => "invalid_amount",
            Self::InvalidDuration { .. } => "invalid_duration",
            Self::InvalidTimestamp { .. } => "invalid_timestamp",
            Self::CooldownActive { .. } => "cooldown_active",
            Self::InsufficientFunds { .. } => "insufficient_funds",
            Self::InvalidSignature => "invalid_signature",
            Self::UnlockRevoked => "unlock_revoked",
            Self::ConfigError(_)
            | Self::StoreIO(_)
            | Self::StoreConflict { .. }
            | Self::ServerError(_) => "server_error",
        }
    }

    /// Whether this is an unexpected failure rather than a business rejection.
    pub fn is_server_error(&self) -> bool {
        self.reason_code() == "server_error"
    }

    /// Convert into the user-facing rejection.
    ///
    /// Blacklist and signature rejections deliberately carry no detail.
    pub fn to_rejection(&self) -> Rejection {
        let message = match self {
            Self::Blacklisted => "Request rejected".to_string(),
            Self::InvalidSignature => "Invalid signature".to_string(),
            e if e.is_server_error() => GENERIC_SERVER_MESSAGE.to_string(),
            e => e.to_string(),
        };

        let retry_after_seconds = match self {
            Self::CooldownActive {
                retry_after_seconds,
            } => Some(*retry_after_seconds),
            _ => None,
        };

        let shortfall = match self {
            Self::InsufficientFunds { shortfall, .. } => Some(*shortfall),
            _ => None,
        };

        Rejection {
            code: self.reason_code().to_string(),
            message,
            retry_after_seconds,
            shortfall,
        }
    }
}

/// Structured rejection returned to callers in place of a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rejection {
    /// Stable reason code.
    pub code: String,

    /// Human-readable message.
    pub message: String,

    /// Seconds to wait before retrying (cooldown only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,

    /// Missing coins (insufficient funds only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shortfall: Option<u64>,
}

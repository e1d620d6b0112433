//! Client clock skew and rollback detection.

use crate::clock::Clock;
use crate::config::CoinlockConfig;
use crate::protocol::models::DeviceAccount;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

/// Why an observation was classified suspicious.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkewReason {
    /// Client clock too far from server time.
    Offset,
    /// Client clock moved backwards since the last sync.
    Rollback,
}

/// Result of comparing a client timestamp with server time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockObservation {
    /// `server_now - client_timestamp` in milliseconds.
    pub offset_ms: i64,

    /// Offset large enough to persist on the account.
    pub significant: bool,

    /// Whether this should be reported as time manipulation.
    pub suspicious: bool,

    /// Backwards jump relative to the last sync, when one was measured.
    pub rollback_ms: Option<i64>,

    /// Server time of the observation.
    pub observed_at: DateTime<Utc>,

    /// Set when `suspicious` is true.
    pub reason: Option<SkewReason>,
}

impl ClockObservation {
    /// Human-readable detail for suspicion reports.
    pub fn detail(&self) -> String {
        match (self.reason, self.rollback_ms) {
            (Some(SkewReason::Rollback), Some(rollback)) => {
                format!("client clock rolled back {}ms since last sync", rollback)
            }
            _ => format!("client clock offset {}ms", self.offset_ms),
        }
    }
}

/// Compares client-declared timestamps against server time.
pub struct ClockIntegrityMonitor {
    clock: Arc<dyn Clock>,
    tolerance_ms: i64,
    significant_ms: i64,
    max_rollback_ms: i64,
}

impl ClockIntegrityMonitor {
    /// Create a monitor using the configured thresholds.
    pub fn new(config: &CoinlockConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            tolerance_ms: duration_ms(config.clock_skew_tolerance),
            significant_ms: duration_ms(config.significant_offset),
            max_rollback_ms: duration_ms(config.max_clock_rollback),
        }
    }

    /// Classify a client timestamp on its own.
    ///
    /// `suspicious` is `|offset| > tolerance`; `significant` is
    /// `|offset| > significant_offset`.
    pub fn observe(&self, device_id: &str, client_timestamp_ms: i64) -> ClockObservation {
        self.observe_with_history(device_id, client_timestamp_ms, None)
    }

    /// Classify a client timestamp, also checking for a rollback against the
    /// client time implied by the account's last sync.
    pub fn observe_with_history(
        &self,
        device_id: &str,
        client_timestamp_ms: i64,
        previous: Option<&DeviceAccount>,
    ) -> ClockObservation {
        let observed_at = self.clock.now_utc();
        let offset_ms = observed_at
            .timestamp_millis()
            .saturating_sub(client_timestamp_ms);
        let magnitude = offset_ms.saturating_abs();

        let rollback_ms = previous
            .and_then(previous_client_time_ms)
            .map(|prev| prev.saturating_sub(client_timestamp_ms))
            .filter(|delta| *delta > 0);

        let reason = if magnitude > self.tolerance_ms {
            Some(SkewReason::Offset)
        } else if rollback_ms.is_some_and(|r| r > self.max_rollback_ms) {
            Some(SkewReason::Rollback)
        } else {
            None
        };

        let observation = ClockObservation {
            offset_ms,
            significant: magnitude > self.significant_ms,
            suspicious: reason.is_some(),
            rollback_ms,
            observed_at,
            reason,
        };

        if observation.suspicious {
            warn!(
                device_id,
                offset_ms,
                rollback_ms = rollback_ms.unwrap_or(0),
                "suspicious client clock"
            );
        } else if observation.significant {
            debug!(device_id, offset_ms, "client clock offset");
        }

        observation
    }

    /// Whether a client-asserted instant lies too far in the future.
    pub fn is_future_dated(&self, client_timestamp_ms: i64) -> bool {
        client_timestamp_ms.saturating_sub(self.clock.now_millis()) > self.tolerance_ms
    }
}

/// Client time at the last recorded sync, if any.
fn previous_client_time_ms(account: &DeviceAccount) -> Option<i64> {
    account
        .last_sync_timestamp
        .map(|sync| sync.timestamp_millis().saturating_sub(account.time_offset_ms))
}

fn duration_ms(duration: std::time::Duration) -> i64 {
    Duration::from_std(duration)
        .map(|d| d.num_milliseconds())
        .unwrap_or(i64::MAX)
}

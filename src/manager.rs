//! Ledger Manager - the main public API for Coinlock.
//!
//! The `LedgerManager` wires the ledger, gates and integrity checks together
//! and gives every request the same treatment:
//! 1. Validate the device id
//! 2. Reject blacklisted devices
//! 3. Observe the client clock when the request carries one
//! 4. Hand over to the reward or unlock gate

use crate::clock::{Clock, SystemClock};
use crate::config::CoinlockConfig;
use crate::crypto::proof::SignatureService;
use crate::errors::Rejection;
use crate::integrity::clock_skew::ClockIntegrityMonitor;
use crate::integrity::suspicion::{
    ActivityType, MemorySuspicionStore, SuspicionEngine, SuspicionStore,
};
use crate::ledger::DeviceLedger;
use crate::policy::{RewardGate, UnlockGate};
use crate::protocol::device_id::validate_device_id;
use crate::protocol::models::{
    AccountStatus, DeviceAccount, DeviceInfo, ProofValidation, RewardHistoryPage, ServerTime,
    UnlockReceipt,
};
use crate::sources::{AdUnitDirectory, Plan, PlanSource};
use crate::store::{AccountStore, FileStore, MemoryStore};
use crate::CoinlockError;
use chrono::SecondsFormat;
use std::sync::Arc;
use tracing::{debug, error};

/// Largest reward-history page.
pub const MAX_HISTORY_PAGE: usize = 100;

/// Identity and clock claim carried by every client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRequest {
    /// Client-supplied device identifier.
    pub device_id: String,

    /// Client wall clock at send time (epoch ms), if supplied.
    pub client_time_ms: Option<i64>,
}

impl ClientRequest {
    /// Request without a clock claim.
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            client_time_ms: None,
        }
    }

    /// Attach the client's clock reading.
    pub fn at(mut self, client_time_ms: i64) -> Self {
        self.client_time_ms = Some(client_time_ms);
        self
    }
}

/// A client's claim that it already holds an unlock.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientUnlockReport {
    /// When the client says the unlock was granted (epoch ms).
    pub timestamp_ms: i64,

    /// Claimed unlock length.
    pub duration_days: u32,

    /// Client snapshot.
    pub device_info: DeviceInfo,

    /// The client's own proof copy, if it sent one.
    pub proof: Option<String>,
}

/// External collaborators and storage backends.
pub struct Collaborators {
    /// Ad-unit lookup.
    pub ads: Arc<dyn AdUnitDirectory>,

    /// Plan configuration.
    pub plans: Arc<dyn PlanSource>,

    /// Account storage.
    pub accounts: Arc<dyn AccountStore>,

    /// Suspicion storage.
    pub suspicion: Arc<dyn SuspicionStore>,
}

impl Collaborators {
    /// Everything in process memory.
    pub fn in_memory(ads: Arc<dyn AdUnitDirectory>, plans: Arc<dyn PlanSource>) -> Self {
        Self {
            ads,
            plans,
            accounts: Arc::new(MemoryStore::new()),
            suspicion: Arc::new(MemorySuspicionStore::new()),
        }
    }

    /// Accounts persisted under the platform data directory.
    ///
    /// # Errors
    /// Returns an error if the data directory cannot be found or created.
    pub fn file_backed(
        namespace: &str,
        ads: Arc<dyn AdUnitDirectory>,
        plans: Arc<dyn PlanSource>,
    ) -> Result<Self, CoinlockError> {
        Ok(Self {
            ads,
            plans,
            accounts: Arc::new(FileStore::new(namespace)?),
            suspicion: Arc::new(MemorySuspicionStore::new()),
        })
    }
}

/// Main ledger manager for Coinlock.
///
/// This is the primary public API. Create one instance per process and
/// share it across request handlers.
pub struct LedgerManager {
    config: CoinlockConfig,
    clock: Arc<dyn Clock>,
    plans: Arc<dyn PlanSource>,
    ledger: Arc<DeviceLedger>,
    monitor: Arc<ClockIntegrityMonitor>,
    rewards: RewardGate,
    unlocks: UnlockGate,
}

impl LedgerManager {
    /// Create a new ledger manager with the given configuration.
    ///
    /// Uses the system clock for time operations.
    ///
    /// # Errors
    /// Returns an error if configuration validation fails.
    pub fn new(config: CoinlockConfig, parts: Collaborators) -> Result<Self, CoinlockError> {
        config.validate()?;
        Self::with_clock(config, parts, Arc::new(SystemClock))
    }

    /// Create a ledger manager with a custom clock (for testing).
    #[cfg(any(test, feature = "test-seams"))]
    pub fn new_with_clock(
        config: CoinlockConfig,
        parts: Collaborators,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, CoinlockError> {
        config.validate()?;
        Self::with_clock(config, parts, clock)
    }

    fn with_clock(
        config: CoinlockConfig,
        parts: Collaborators,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, CoinlockError> {
        let signer = Arc::new(SignatureService::new(&config.server_secret)?);
        let suspicion = Arc::new(SuspicionEngine::new(
            parts.suspicion,
            config.suspicion_threshold,
            clock.clone(),
        ));
        let ledger = Arc::new(DeviceLedger::new(
            parts.accounts,
            signer.clone(),
            suspicion,
            clock.clone(),
            config.max_update_retries,
        ));
        let monitor = Arc::new(ClockIntegrityMonitor::new(&config, clock.clone()));

        let rewards = RewardGate::new(
            ledger.clone(),
            parts.ads,
            parts.plans.clone(),
            clock.clone(),
        );
        let unlocks = UnlockGate::new(
            ledger.clone(),
            signer,
            parts.plans.clone(),
            monitor.clone(),
            clock.clone(),
            config.max_unlock_duration_days,
            config.idempotency_window_delta()?,
        );

        Ok(Self {
            config,
            clock,
            plans: parts.plans,
            ledger,
            monitor,
            rewards,
            unlocks,
        })
    }

    /// Current account view, after the lazy expiry check.
    pub fn status(&self, request: &ClientRequest) -> Result<AccountStatus, CoinlockError> {
        self.admit(request)?;
        let account = self.ledger.get_or_create(&request.device_id)?;
        Ok(AccountStatus::from_account(
            &account,
            self.plans.plan(),
            self.clock.now_utc(),
        ))
    }

    /// Credit a watched rewarded ad.
    ///
    /// # Errors
    /// - `Blacklisted` - Device is blacklisted
    /// - `AdUnitNotFound` / `WrongAdType` - Not a rewarded ad unit
    /// - `CooldownActive` - Previous reward is too recent
    pub fn claim_reward(
        &self,
        request: &ClientRequest,
        ad_unit_id: &str,
        ad_name: &str,
        device_info: DeviceInfo,
    ) -> Result<DeviceAccount, CoinlockError> {
        self.admit(request)?;
        self.rewards
            .claim_reward(&request.device_id, ad_unit_id, ad_name, device_info)
    }

    /// Spend coins on an unlock.
    ///
    /// # Errors
    /// - `InsufficientFunds` - Balance below the plan cost
    /// - `InvalidDuration` - Requested length above the maximum
    pub fn purchase_unlock(
        &self,
        request: &ClientRequest,
        duration_days: Option<u32>,
        idempotency_key: Option<&str>,
    ) -> Result<UnlockReceipt, CoinlockError> {
        self.admit(request)?;
        self.unlocks
            .purchase_unlock(&request.device_id, duration_days, idempotency_key)
    }

    /// Check a client-held unlock proof.
    pub fn validate_proof(
        &self,
        request: &ClientRequest,
        timestamp_ms: i64,
        duration_days: u32,
        proof: &str,
    ) -> Result<ProofValidation, CoinlockError> {
        self.admit(request)?;
        self.unlocks
            .validate_proof(&request.device_id, timestamp_ms, duration_days, proof)
    }

    /// Re-issue a server proof for an unlock the client already holds.
    pub fn report_client_unlock(
        &self,
        request: &ClientRequest,
        report: &ClientUnlockReport,
    ) -> Result<UnlockReceipt, CoinlockError> {
        self.admit(request)?;
        self.unlocks.report_client_unlock(
            &request.device_id,
            report.timestamp_ms,
            report.duration_days,
            &report.device_info,
            report.proof.as_deref(),
        )
    }

    /// Revoke the unlock after a client-detected violation.
    pub fn report_security_violation(
        &self,
        request: &ClientRequest,
        device_info: DeviceInfo,
        details: &str,
    ) -> Result<DeviceAccount, CoinlockError> {
        self.admit(request)?;
        self.unlocks
            .report_security_violation(&request.device_id, device_info, details)
    }

    /// Reward history, newest first.
    ///
    /// `limit` is clamped to `1..=MAX_HISTORY_PAGE`.
    pub fn reward_history(
        &self,
        request: &ClientRequest,
        offset: usize,
        limit: usize,
    ) -> Result<RewardHistoryPage, CoinlockError> {
        self.admit(request)?;
        let account = self.ledger.get_or_create(&request.device_id)?;
        let limit = limit.clamp(1, MAX_HISTORY_PAGE);

        let events = account
            .reward_history
            .iter()
            .rev()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect();

        Ok(RewardHistoryPage {
            events,
            total: account.reward_history.len(),
            offset,
            limit,
        })
    }

    /// Server clock reading for client time sync.
    pub fn server_time(&self) -> ServerTime {
        let now = self.clock.now_utc();
        ServerTime {
            timestamp_ms: now.timestamp_millis(),
            iso: now.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }

    /// Plan in force.
    pub fn plan(&self) -> Plan {
        self.plans.plan()
    }

    /// Suspicion state, for operators.
    pub fn suspicion(&self) -> &SuspicionEngine {
        self.ledger.suspicion()
    }

    /// The underlying ledger.
    pub fn ledger(&self) -> &DeviceLedger {
        &self.ledger
    }

    /// Get the current configuration.
    pub fn config(&self) -> &CoinlockConfig {
        &self.config
    }

    /// Convert an operation result into the form returned to clients.
    ///
    /// Server errors are logged here in full and replaced by a generic
    /// rejection.
    pub fn respond<T>(&self, result: Result<T, CoinlockError>) -> Result<T, Rejection> {
        result.map_err(|e| {
            if e.is_server_error() {
                error!(error = %e, "request failed");
            } else {
                debug!(code = e.reason_code(), "request rejected");
            }
            e.to_rejection()
        })
    }

    /// Common entry checks for every device request.
    fn admit(&self, request: &ClientRequest) -> Result<(), CoinlockError> {
        let device_id = request.device_id.as_str();
        validate_device_id(device_id)?;
        self.ledger.suspicion().ensure_allowed(device_id)?;

        if let Some(client_time_ms) = request.client_time_ms {
            let previous = self.ledger.find(device_id)?;
            let observation =
                self.monitor
                    .observe_with_history(device_id, client_time_ms, previous.as_ref());

            if observation.significant {
                self.ledger.record_clock_offset(device_id, &observation)?;
            }
            if observation.suspicious {
                self.ledger.escalate(
                    device_id,
                    ActivityType::TimeManipulation,
                    observation.detail(),
                )?;
            }
        }

        Ok(())
    }
}

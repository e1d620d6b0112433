//! # Coinlock
//!
//! **Device-bound coin ledger with offline-verifiable feature unlocks.**
//!
//! Coinlock lets a device earn coins by watching rewarded ads, spend them on
//! a time-limited premium unlock, and carry an HMAC-signed proof of that
//! unlock for offline checks. Abuse signals feed a per-device suspicion
//! score that eventually blacklists the device.
//!
//! ## Features
//!
//! - **Atomic per-device ledger** - every balance change is a compare-and-swap
//! - **Stateless unlock proofs** - `HMAC-SHA256(secret, "deviceId:timestamp:days")`
//! - **Constant-time verification** - proofs are checked without timing leaks
//! - **Lazy expiry** - unlocks expire on read, no background sweep
//! - **Clock tamper detection** - skew and rollback checks on client timestamps
//! - **One-way blacklist** - weighted suspicion score with a fixed threshold
//!
//! ## Quickstart
//!
//! ```no_run
//! use coinlock::{
//!     AdType, ClientRequest, CoinlockConfig, Collaborators, DeviceInfo, LedgerManager, Plan,
//!     StaticAdDirectory,
//! };
//! use std::sync::Arc;
//!
//! fn main() -> Result<(), coinlock::CoinlockError> {
//!     let config = CoinlockConfig::from_env()?;
//!     let ads = StaticAdDirectory::new().with_unit(
//!         "ca-app-pub-1/rewarded",
//!         "Bonus Coins",
//!         AdType::Rewarded,
//!     );
//!     let parts = Collaborators::in_memory(Arc::new(ads), Arc::new(Plan::default()));
//!     let manager = LedgerManager::new(config, parts)?;
//!
//!     let request = ClientRequest::new("device-0001");
//!     let account =
//!         manager.claim_reward(&request, "ca-app-pub-1/rewarded", "", DeviceInfo::new())?;
//!     println!("balance: {}", account.coin_balance);
//!     Ok(())
//! }
//! ```
//!
//! ## Threat Model
//!
//! Coinlock protects against:
//! - **Forged unlocks** - proofs are keyed with a server-only secret
//! - **Double spending** - concurrent purchases for one device serialize
//! - **Reward farming** - cooldown plus `quick_rewards` escalation
//! - **Clock tampering** - large offsets and rollbacks raise suspicion
//!
//! Device identifiers are client-supplied and not independently verified.
//!
//! ## Configuration
//!
//! - `server_secret` - HMAC key, at least 32 bytes
//! - `suspicion_threshold` - Score at which a device is blacklisted
//! - `clock_skew_tolerance` - Offset beyond which a client clock is suspicious
//!
//! See [`CoinlockConfig`] for full documentation.

#![warn(missing_docs)]

// Core modules
pub mod clock;
pub mod config;
pub mod errors;

// Crypto layer
pub mod crypto;

// Protocol layer
pub mod protocol;

// Collaborators
pub mod sources;

// Storage layer
pub mod store;

// Integrity layer
pub mod integrity;

// Ledger
pub mod ledger;

// Policy layer
pub mod policy;

// Manager (main public API)
pub mod manager;

// Re-exports for public API
pub use clock::{Clock, SystemClock};
pub use config::CoinlockConfig;
pub use crypto::proof::{SignatureService, UnlockProof};
pub use errors::{CoinlockError, Rejection};
pub use integrity::{ActivityType, ClockIntegrityMonitor, SuspicionEngine, SuspicionRecord};
pub use ledger::DeviceLedger;
pub use manager::{ClientRequest, ClientUnlockReport, Collaborators, LedgerManager};
pub use policy::{RewardGate, UnlockGate};
pub use protocol::models::{
    AccountStatus, DeviceAccount, DeviceInfo, ProofValidation, RewardEvent, RewardHistoryPage,
    SecurityViolationRecord, ServerTime, UnlockReceipt, ViolationAction, ViolationKind,
};
pub use sources::{AdType, AdUnit, AdUnitDirectory, Plan, PlanSource, StaticAdDirectory};
pub use store::{AccountStore, FileStore, MemoryStore};

#[cfg(any(test, feature = "test-seams"))]
pub use clock::MockClock;

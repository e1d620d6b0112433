//! Durable account storage with an atomic conditional-update primitive.
//!
//! Every balance or unlock mutation goes through
//! [`AccountStore::compare_and_swap`]: a write only lands if the stored
//! version still matches the one the caller read. Callers retry on conflict.

pub mod file;
pub mod memory;

use crate::protocol::models::DeviceAccount;
use crate::CoinlockError;
use serde::{Deserialize, Serialize};

pub use file::FileStore;
pub use memory::MemoryStore;

/// A value paired with its version token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Versioned<T> {
    /// Monotonic version, starting at 1 on insert.
    pub version: u64,
    /// The stored value.
    pub value: T,
}

/// Account persistence keyed by device id.
pub trait AccountStore: Send + Sync {
    /// Load an account and its version.
    fn load(&self, device_id: &str) -> Result<Option<Versioned<DeviceAccount>>, CoinlockError>;

    /// Insert at version 1 if no account exists.
    ///
    /// Returns `false` if another writer created it first.
    fn insert(&self, account: &DeviceAccount) -> Result<bool, CoinlockError>;

    /// Replace the account if its stored version equals `expected_version`.
    ///
    /// Returns `false` on a version conflict; nothing is written then.
    fn compare_and_swap(
        &self,
        account: &DeviceAccount,
        expected_version: u64,
    ) -> Result<bool, CoinlockError>;
}

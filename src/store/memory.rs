//! In-process account store.

use crate::protocol::models::DeviceAccount;
use crate::store::{AccountStore, Versioned};
use crate::CoinlockError;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Mutex-protected map of accounts.
#[derive(Debug, Default)]
pub struct MemoryStore {
    accounts: Mutex<HashMap<String, Versioned<DeviceAccount>>>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored accounts.
    pub fn len(&self) -> usize {
        self.lock().map(|guard| guard.len()).unwrap_or(0)
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Versioned<DeviceAccount>>>, CoinlockError> {
        self.accounts
            .lock()
            .map_err(|_| CoinlockError::ServerError("account store lock poisoned".to_string()))
    }
}

impl AccountStore for MemoryStore {
    fn load(&self, device_id: &str) -> Result<Option<Versioned<DeviceAccount>>, CoinlockError> {
        Ok(self.lock()?.get(device_id).cloned())
    }

    fn insert(&self, account: &DeviceAccount) -> Result<bool, CoinlockError> {
        let mut accounts = self.lock()?;
        if accounts.contains_key(&account.device_id) {
            return Ok(false);
        }
        accounts.insert(
            account.device_id.clone(),
            Versioned {
                version: 1,
                value: account.clone(),
            },
        );
        Ok(true)
    }

    fn compare_and_swap(
        &self,
        account: &DeviceAccount,
        expected_version: u64,
    ) -> Result<bool, CoinlockError> {
        let mut accounts = self.lock()?;
        match accounts.get_mut(&account.device_id) {
            Some(stored) if stored.version == expected_version => {
                stored.version += 1;
                stored.value = account.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

//! File-based account store with atomic writes.
//!
//! Stores one JSON document per device under
//! `dirs::data_dir()/<namespace>/accounts/`. File names come from the
//! SHA-256 of the device id. Writes use temp file + rename, and the
//! version check plus write is serialized within the process.

use crate::crypto::digest::storage_key;
use crate::protocol::models::DeviceAccount;
use crate::store::{AccountStore, Versioned};
use crate::CoinlockError;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// File-based account store.
#[derive(Debug)]
pub struct FileStore {
    /// Directory holding account files.
    accounts_dir: PathBuf,
    /// Serializes read-compare-write sequences.
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Create a file store with the given namespace under the data directory.
    pub fn new(namespace: &str) -> Result<Self, CoinlockError> {
        let base_dir = dirs::data_dir()
            .ok_or_else(|| CoinlockError::StoreIO("Could not find data directory".to_string()))?;

        Self::with_path(base_dir.join(namespace).join("accounts"))
    }

    /// Create a file store rooted at a specific directory.
    pub fn with_path(accounts_dir: PathBuf) -> Result<Self, CoinlockError> {
        fs::create_dir_all(&accounts_dir)
            .map_err(|e| CoinlockError::StoreIO(format!("Failed to create store dir: {}", e)))?;

        Ok(Self {
            accounts_dir,
            write_lock: Mutex::new(()),
        })
    }

    /// Directory holding account files.
    pub fn path(&self) -> &Path {
        &self.accounts_dir
    }

    fn account_path(&self, device_id: &str) -> PathBuf {
        self.accounts_dir
            .join(format!("{}.json", storage_key(device_id)))
    }

    fn read(&self, device_id: &str) -> Result<Option<Versioned<DeviceAccount>>, CoinlockError> {
        let path = self.account_path(device_id);

        if !path.exists() {
            return Ok(None);
        }

        let json = fs::read_to_string(&path)
            .map_err(|e| CoinlockError::StoreIO(format!("Failed to read account: {}", e)))?;

        let stored: Versioned<DeviceAccount> = serde_json::from_str(&json)
            .map_err(|e| CoinlockError::StoreIO(format!("Failed to parse account: {}", e)))?;

        // Hash prefixes could in principle collide.
        if stored.value.device_id != device_id {
            return Err(CoinlockError::StoreIO(format!(
                "Account file {} belongs to a different device",
                path.display()
            )));
        }

        Ok(Some(stored))
    }

    fn write(&self, record: &Versioned<DeviceAccount>) -> Result<(), CoinlockError> {
        let key = storage_key(&record.value.device_id);
        let target_path = self.accounts_dir.join(format!("{}.json", key));
        let temp_path = self.accounts_dir.join(format!("{}.tmp", key));

        let json = serde_json::to_string_pretty(record)
            .map_err(|e| CoinlockError::StoreIO(format!("Failed to serialize account: {}", e)))?;

        fs::write(&temp_path, &json)
            .map_err(|e| CoinlockError::StoreIO(format!("Failed to write temp file: {}", e)))?;

        fs::rename(&temp_path, &target_path)
            .map_err(|e| CoinlockError::StoreIO(format!("Failed to rename account file: {}", e)))?;

        Ok(())
    }
}

impl AccountStore for FileStore {
    fn load(&self, device_id: &str) -> Result<Option<Versioned<DeviceAccount>>, CoinlockError> {
        self.read(device_id)
    }

    fn insert(&self, account: &DeviceAccount) -> Result<bool, CoinlockError> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| CoinlockError::ServerError("file store lock poisoned".to_string()))?;

        if self.read(&account.device_id)?.is_some() {
            return Ok(false);
        }

        self.write(&Versioned {
            version: 1,
            value: account.clone(),
        })?;
        Ok(true)
    }

    fn compare_and_swap(
        &self,
        account: &DeviceAccount,
        expected_version: u64,
    ) -> Result<bool, CoinlockError> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| CoinlockError::ServerError("file store lock poisoned".to_string()))?;

        match self.read(&account.device_id)? {
            Some(stored) if stored.version == expected_version => {
                self.write(&Versioned {
                    version: expected_version + 1,
                    value: account.clone(),
                })?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

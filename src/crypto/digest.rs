//! SHA-256 hashing of device identifiers for storage keys.

use sha2::{Digest, Sha256};

/// Compute a hex SHA-256 of a device id.
///
/// Used as the on-disk key so raw identifiers never appear in file names.
pub fn hash_device_id(device_id: &str) -> String {
    hex::encode(Sha256::digest(device_id.as_bytes()))
}

/// Short storage key derived from the device id hash (first 32 hex chars).
pub fn storage_key(device_id: &str) -> String {
    let mut hash = hash_device_id(device_id);
    hash.truncate(32);
    hash
}

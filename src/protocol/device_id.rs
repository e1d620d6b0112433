//! Device identifier validation.

use crate::CoinlockError;

/// Shortest accepted device id.
pub const MIN_DEVICE_ID_LEN: usize = 10;

/// Longest accepted device id.
pub const MAX_DEVICE_ID_LEN: usize = 100;

/// Check a client-supplied device id.
///
/// Accepts 10–100 characters drawn from ASCII alphanumerics, `-`, `_`
/// and `.`. The proof delimiter `:` is never allowed.
///
/// # Errors
/// * `InvalidDeviceId` - Wrong length or a disallowed character
pub fn validate_device_id(device_id: &str) -> Result<(), CoinlockError> {
    let len = device_id.len();
    if !(MIN_DEVICE_ID_LEN..=MAX_DEVICE_ID_LEN).contains(&len) {
        return Err(CoinlockError::InvalidDeviceId {
            reason: format!(
                "length must be {}-{} characters, got {}",
                MIN_DEVICE_ID_LEN, MAX_DEVICE_ID_LEN, len
            ),
        });
    }

    if let Some(bad) = device_id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(CoinlockError::InvalidDeviceId {
            reason: format!("disallowed character {:?}", bad),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_typical_ids() {
        assert!(validate_device_id("device-0001").is_ok());
        assert!(validate_device_id("a1b2c3d4e5f6a7b8").is_ok());
        assert!(validate_device_id("android_id.9f8e7d6c").is_ok());
    }

    #[test]
    fn test_rejects_short_and_long() {
        assert!(matches!(
            validate_device_id("dev-A"),
            Err(CoinlockError::InvalidDeviceId { .. })
        ));
        assert!(validate_device_id(&"x".repeat(101)).is_err());
        assert!(validate_device_id(&"x".repeat(100)).is_ok());
        assert!(validate_device_id(&"x".repeat(10)).is_ok());
    }

    #[test]
    fn test_rejects_delimiter_and_whitespace() {
        assert!(validate_device_id("device:0001").is_err());
        assert!(validate_device_id("device 0001").is_err());
        assert!(validate_device_id("device/0001").is_err());
    }

    #[test]
    fn test_rejects_non_ascii() {
        assert!(validate_device_id("appareil-é001").is_err());
    }
}

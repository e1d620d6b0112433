//! Canonical message construction for unlock proofs.
//!
//! The signed message is the three proof inputs joined by `:`:
//! ```text
//! <device_id>:<unlock timestamp, epoch ms>:<duration in days>
//! ```
//! Device ids may not contain `:`, so the encoding is unambiguous.

/// Field delimiter inside the signed message.
pub const PROOF_DELIMITER: char = ':';

/// Build the message an unlock proof is computed over.
///
/// # Arguments
/// * `device_id` - Validated device identifier
/// * `timestamp_ms` - Unlock grant time in epoch milliseconds
/// * `duration_days` - Unlock duration in days
pub fn build_proof_message(device_id: &str, timestamp_ms: i64, duration_days: u32) -> String {
    format!(
        "{}{}{}{}{}",
        device_id, PROOF_DELIMITER, timestamp_ms, PROOF_DELIMITER, duration_days
    )
}

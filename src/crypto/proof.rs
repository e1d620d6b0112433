//! HMAC-SHA256 unlock proofs.
//!
//! A proof is `hex(HMAC-SHA256(secret, "<device>:<timestamp_ms>:<days>"))`.
//! It is a pure function of its inputs, so a client can carry it offline
//! and the server can verify it without storage.

use crate::crypto::signing::build_proof_message;
use crate::CoinlockError;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

/// Hex-encoded unlock proof.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnlockProof(String);

impl UnlockProof {
    /// Wrap a proof string received from a client.
    pub fn from_client(proof: impl Into<String>) -> Self {
        Self(proof.into())
    }

    /// The hex proof.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Take ownership of the hex proof.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for UnlockProof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Issues and verifies unlock proofs with the server secret.
#[derive(Clone)]
pub struct SignatureService {
    keyed: HmacSha256,
}

impl SignatureService {
    /// Create a signature service keyed with the server secret.
    ///
    /// # Errors
    /// * `ConfigError` - The secret is empty
    pub fn new(secret: &str) -> Result<Self, CoinlockError> {
        if secret.is_empty() {
            return Err(CoinlockError::ConfigError(
                "server secret cannot be empty".to_string(),
            ));
        }

        let keyed = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| CoinlockError::ConfigError(format!("Invalid HMAC key: {}", e)))?;

        Ok(Self { keyed })
    }

    /// Compute the proof for an unlock.
    pub fn issue(&self, device_id: &str, timestamp_ms: i64, duration_days: u32) -> UnlockProof {
        let mut mac = self.keyed.clone();
        mac.update(build_proof_message(device_id, timestamp_ms, duration_days).as_bytes());
        UnlockProof(hex::encode(mac.finalize().into_bytes()))
    }

    /// Check a proof against its claimed inputs.
    ///
    /// The comparison runs in constant time over the decoded MAC bytes.
    /// Malformed hex or a wrong length simply fails verification.
    pub fn verify(&self, device_id: &str, timestamp_ms: i64, duration_days: u32, proof: &str) -> bool {
        let Ok(provided) = hex::decode(proof.trim()) else {
            return false;
        };

        let mut mac = self.keyed.clone();
        mac.update(build_proof_message(device_id, timestamp_ms, duration_days).as_bytes());
        mac.verify_slice(&provided).is_ok()
    }
}

impl fmt::Debug for SignatureService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignatureService")
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";
    const TS: i64 = 1_736_942_400_000;

    fn service() -> SignatureService {
        SignatureService::new(SECRET).unwrap()
    }

    #[test]
    fn test_issue_known_vector() {
        let proof = service().issue("device-0001", TS, 30);
        assert_eq!(
            proof.as_str(),
            "f51a2dbc55fcc35644186f6789efeaab48a67fa5e04e3e264abeb5c0e841ee12"
        );
    }

    #[test]
    fn test_issued_proof_verifies() {
        let svc = service();
        let proof = svc.issue("device-0001", TS, 30);
        assert!(svc.verify("device-0001", TS, 30, proof.as_str()));
    }

    #[test]
    fn test_any_changed_field_fails() {
        let svc = service();
        let proof = svc.issue("device-0001", TS, 30);
        assert!(!svc.verify("device-0002", TS, 30, proof.as_str()));
        assert!(!svc.verify("device-0001", TS + 1, 30, proof.as_str()));
        assert!(!svc.verify("device-0001", TS, 31, proof.as_str()));
    }

    #[test]
    fn test_tampered_proof_fails() {
        let svc = service();
        let mut tampered = svc.issue("device-0001", TS, 30).into_string();
        let last = if tampered.ends_with('0') { "1" } else { "0" };
        tampered.replace_range(tampered.len() - 1.., last);
        assert!(!svc.verify("device-0001", TS, 30, &tampered));
    }

    #[test]
    fn test_garbage_proof_fails() {
        let svc = service();
        assert!(!svc.verify("device-0001", TS, 30, "tampered"));
        assert!(!svc.verify("device-0001", TS, 30, ""));
        assert!(!svc.verify("device-0001", TS, 30, "abcd"));
    }

    #[test]
    fn test_different_secret_fails() {
        let proof = service().issue("device-0001", TS, 30);
        let other = SignatureService::new("ffffffffffffffffffffffffffffffff").unwrap();
        assert!(!other.verify("device-0001", TS, 30, proof.as_str()));
    }

    #[test]
    fn test_empty_secret_rejected() {
        assert!(matches!(
            SignatureService::new(""),
            Err(CoinlockError::ConfigError(_))
        ));
    }

    #[test]
    fn test_debug_redacts_secret() {
        assert!(!format!("{:?}", service()).contains(SECRET));
    }
}

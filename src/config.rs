//! Coinlock configuration.

use std::fmt;
use std::time::Duration;

/// Environment variable holding the HMAC secret.
pub const SECRET_ENV: &str = "COINLOCK_SERVER_SECRET";

/// Environment variable overriding the store namespace.
pub const NAMESPACE_ENV: &str = "COINLOCK_STORE_NAMESPACE";

/// Minimum accepted secret length in bytes.
pub const MIN_SECRET_LEN: usize = 32;

/// Hard cap on any unlock duration, configured or stored.
pub const MAX_UNLOCK_DURATION_DAYS: u32 = 3650;

/// Configuration for the ledger and its integrity checks.
///
/// Plan values (cost, reward size, cooldown) are not here; they come from
/// a [`PlanSource`](crate::sources::PlanSource).
#[derive(Clone)]
pub struct CoinlockConfig {
    /// Server-held HMAC key for unlock proofs.
    /// SECURITY: load from a secret store, never commit it.
    pub server_secret: String,

    /// Cumulative suspicion score at which a device is blacklisted.
    pub suspicion_threshold: u32,

    /// Client clock offsets beyond this are suspicious.
    pub clock_skew_tolerance: Duration,

    /// Offsets beyond this are persisted to the account diagnostics.
    pub significant_offset: Duration,

    /// Backwards jumps of the client clock beyond this are suspicious.
    pub max_clock_rollback: Duration,

    /// How long a purchase idempotency key is remembered.
    pub idempotency_window: Duration,

    /// Upper bound for any unlock duration, at most [`MAX_UNLOCK_DURATION_DAYS`].
    pub max_unlock_duration_days: u32,

    /// Optimistic-update attempts before giving up with `StoreConflict`.
    pub max_update_retries: u32,

    /// Namespace for the file store under the platform data directory.
    pub store_namespace: String,
}

impl CoinlockConfig {
    /// Build a config with default thresholds around the given secret.
    pub fn new(server_secret: impl Into<String>) -> Self {
        Self {
            server_secret: server_secret.into(),
            suspicion_threshold: 50,
            clock_skew_tolerance: Duration::from_secs(5 * 60),
            significant_offset: Duration::from_secs(1),
            max_clock_rollback: Duration::from_secs(60 * 60),
            idempotency_window: Duration::from_secs(10 * 60),
            max_unlock_duration_days: 365,
            max_update_retries: 16,
            store_namespace: "coinlock".to_string(),
        }
    }

    /// Build a config from `COINLOCK_SERVER_SECRET` and `COINLOCK_STORE_NAMESPACE`.
    pub fn from_env() -> Result<Self, crate::CoinlockError> {
        let secret = std::env::var(SECRET_ENV).map_err(|_| {
            crate::CoinlockError::ConfigError(format!("{} is not set", SECRET_ENV))
        })?;

        let mut config = Self::new(secret);
        if let Ok(namespace) = std::env::var(NAMESPACE_ENV) {
            config.store_namespace = namespace;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration for obvious errors.
    pub fn validate(&self) -> Result<(), crate::CoinlockError> {
        if self.server_secret.len() < MIN_SECRET_LEN {
            return Err(crate::CoinlockError::ConfigError(format!(
                "server_secret must be at least {} bytes, got {}",
                MIN_SECRET_LEN,
                self.server_secret.len()
            )));
        }
        if self.suspicion_threshold == 0 {
            return Err(crate::CoinlockError::ConfigError(
                "suspicion_threshold cannot be zero".to_string(),
            ));
        }
        if self.max_update_retries == 0 {
            return Err(crate::CoinlockError::ConfigError(
                "max_update_retries cannot be zero".to_string(),
            ));
        }
        if self.store_namespace.is_empty() {
            return Err(crate::CoinlockError::ConfigError(
                "store_namespace cannot be empty".to_string(),
            ));
        }
        if self.max_unlock_duration_days == 0
            || self.max_unlock_duration_days > MAX_UNLOCK_DURATION_DAYS
        {
            return Err(crate::CoinlockError::ConfigError(format!(
                "max_unlock_duration_days must be between 1 and {}, got {}",
                MAX_UNLOCK_DURATION_DAYS, self.max_unlock_duration_days
            )));
        }
        self.idempotency_window_delta()?;
        Ok(())
    }

    /// `idempotency_window` as a signed duration.
    ///
    /// # Errors
    /// * `ConfigError` - Window is zero or too large to represent
    pub fn idempotency_window_delta(&self) -> Result<chrono::Duration, crate::CoinlockError> {
        match chrono::Duration::from_std(self.idempotency_window) {
            Ok(window) if window > chrono::Duration::zero() => Ok(window),
            _ => Err(crate::CoinlockError::ConfigError(format!(
                "idempotency_window must be positive and representable, got {:?}",
                self.idempotency_window
            ))),
        }
    }
}

impl fmt::Debug for CoinlockConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoinlockConfig")
            .field("server_secret", &"<redacted>")
            .field("suspicion_threshold", &self.suspicion_threshold)
            .field("clock_skew_tolerance", &self.clock_skew_tolerance)
            .field("significant_offset", &self.significant_offset)
            .field("max_clock_rollback", &self.max_clock_rollback)
            .field("idempotency_window", &self.idempotency_window)
            .field("max_unlock_duration_days", &self.max_unlock_duration_days)
            .field("max_update_retries", &self.max_update_retries)
            .field("store_namespace", &self.store_namespace)
            .finish()
    }
}

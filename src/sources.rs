//! Read-only collaborators the ledger consumes: ad-unit lookup and plan.

use crate::CoinlockError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Declared type of an ad unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdType {
    /// Rewarded video; the only type that earns coins.
    Rewarded,
    /// Banner.
    Banner,
    /// Full-screen interstitial.
    Interstitial,
    /// Native ad.
    Native,
    /// App-open ad.
    AppOpen,
    /// Anything the directory reports that is not known here.
    Other(String),
}

impl fmt::Display for AdType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rewarded => f.write_str("Rewarded"),
            Self::Banner => f.write_str("Banner"),
            Self::Interstitial => f.write_str("Interstitial"),
            Self::Native => f.write_str("Native"),
            Self::AppOpen => f.write_str("AppOpen"),
            Self::Other(name) => f.write_str(name),
        }
    }
}

/// An ad unit as reported by the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdUnit {
    /// Ad unit code.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Declared type.
    pub ad_type: AdType,
}

/// Ad-unit lookup.
pub trait AdUnitDirectory: Send + Sync {
    /// Find an ad unit by its code.
    fn find_ad_unit(&self, ad_unit_id: &str) -> Result<Option<AdUnit>, CoinlockError>;
}

/// In-memory ad directory.
#[derive(Debug, Clone, Default)]
pub struct StaticAdDirectory {
    units: HashMap<String, AdUnit>,
}

impl StaticAdDirectory {
    /// Empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style registration.
    pub fn with_unit(mut self, id: &str, name: &str, ad_type: AdType) -> Self {
        self.units.insert(
            id.to_string(),
            AdUnit {
                id: id.to_string(),
                name: name.to_string(),
                ad_type,
            },
        );
        self
    }
}

impl AdUnitDirectory for StaticAdDirectory {
    fn find_ad_unit(&self, ad_unit_id: &str) -> Result<Option<AdUnit>, CoinlockError> {
        Ok(self.units.get(ad_unit_id).cloned())
    }
}

/// Plan configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    /// Cost of one unlock.
    pub required_coins: u64,
    /// Coins credited per rewarded ad.
    pub coins_per_reward: u64,
    /// Unlock duration when the client does not ask for one.
    pub default_unlock_duration_days: u32,
    /// Minimum spacing between reward claims.
    pub reward_cooldown_seconds: u64,
}

impl Default for Plan {
    fn default() -> Self {
        Self {
            required_coins: 100,
            coins_per_reward: 10,
            default_unlock_duration_days: 30,
            reward_cooldown_seconds: 30,
        }
    }
}

impl Plan {
    /// Cooldown as a chrono duration.
    pub fn reward_cooldown(&self) -> chrono::Duration {
        let secs = i64::try_from(self.reward_cooldown_seconds).unwrap_or(i64::MAX);
        chrono::Duration::seconds(secs.min(i64::MAX / 1000))
    }
}

/// Plan lookup.
pub trait PlanSource: Send + Sync {
    /// Current plan.
    fn plan(&self) -> Plan;
}

impl PlanSource for Plan {
    fn plan(&self) -> Plan {
        *self
    }
}

//! Reward eligibility enforcement.
//!
//! A claim is credited only when:
//! - The ad unit exists and is a rewarded ad
//! - The plan cooldown has elapsed since the last credited reward
//!
//! A single cooldown rejection is normal client behaviour. A second one
//! inside the same cooldown window is reported as `quick_rewards`. A credited
//! claim from a rooted or emulated device is reported as
//! `suspicious_device_info`.

use crate::clock::Clock;
use crate::integrity::suspicion::ActivityType;
use crate::ledger::DeviceLedger;
use crate::protocol::device_id::validate_device_id;
use crate::protocol::models::{DeviceAccount, DeviceInfo};
use crate::sources::{AdType, AdUnitDirectory, PlanSource};
use crate::CoinlockError;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Gate for earning coins from rewarded ads.
pub struct RewardGate {
    ledger: Arc<DeviceLedger>,
    ads: Arc<dyn AdUnitDirectory>,
    plans: Arc<dyn PlanSource>,
    clock: Arc<dyn Clock>,
    /// Last cooldown rejection per device.
    near_misses: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl RewardGate {
    /// Create a reward gate.
    pub fn new(
        ledger: Arc<DeviceLedger>,
        ads: Arc<dyn AdUnitDirectory>,
        plans: Arc<dyn PlanSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger,
            ads,
            plans,
            clock,
            near_misses: Mutex::new(HashMap::new()),
        }
    }

    /// Credit the plan's per-reward coins for a watched rewarded ad.
    ///
    /// # Arguments
    /// * `device_id` - Claiming device
    /// * `ad_unit_id` - Ad unit the client watched
    /// * `ad_name` - Display name for history; empty uses the directory's name
    /// * `device_info` - Client snapshot, stored with the reward
    ///
    /// # Errors
    /// * `Blacklisted` - Device is blacklisted
    /// * `AdUnitNotFound` - Unknown ad unit
    /// * `WrongAdType` - Ad unit is not a rewarded ad
    /// * `CooldownActive` - Previous reward is too recent
    pub fn claim_reward(
        &self,
        device_id: &str,
        ad_unit_id: &str,
        ad_name: &str,
        device_info: DeviceInfo,
    ) -> Result<DeviceAccount, CoinlockError> {
        validate_device_id(device_id)?;
        self.ledger.suspicion().ensure_allowed(device_id)?;

        let unit = self
            .ads
            .find_ad_unit(ad_unit_id)?
            .ok_or_else(|| CoinlockError::AdUnitNotFound {
                ad_unit_id: ad_unit_id.to_string(),
            })?;

        if unit.ad_type != AdType::Rewarded {
            return Err(CoinlockError::WrongAdType {
                ad_type: unit.ad_type.to_string(),
            });
        }

        let untrusted = if device_info.is_rooted() {
            Some("rooted")
        } else if device_info.is_emulator() {
            Some("emulated")
        } else {
            None
        };

        let plan = self.plans.plan();
        let cooldown = plan.reward_cooldown();
        let ad_name = if ad_name.is_empty() {
            unit.name.as_str()
        } else {
            ad_name
        };

        match self.ledger.credit_after_cooldown(
            device_id,
            plan.coins_per_reward,
            &unit.id,
            ad_name,
            device_info,
            cooldown,
        ) {
            Ok(account) => {
                self.forget_near_miss(device_id)?;
                let Some(label) = untrusted else {
                    return Ok(account);
                };

                // Flagged only once credited; cooldown rejections add nothing.
                let outcome = self.ledger.escalate(
                    device_id,
                    ActivityType::SuspiciousDeviceInfo,
                    format!("reward claimed from {} device", label),
                )?;
                if outcome.newly_blacklisted {
                    return Ok(self.ledger.find(device_id)?.unwrap_or(account));
                }
                Ok(account)
            }
            Err(CoinlockError::CooldownActive {
                retry_after_seconds,
            }) => {
                debug!(device_id, retry_after_seconds, "reward cooldown active");
                if self.note_near_miss(device_id, cooldown)? {
                    self.ledger.escalate(
                        device_id,
                        ActivityType::QuickRewards,
                        format!("repeated claim {}s before cooldown end", retry_after_seconds),
                    )?;
                }
                Err(CoinlockError::CooldownActive {
                    retry_after_seconds,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Remember a cooldown rejection. Returns whether it repeats one from
    /// the same window.
    fn note_near_miss(&self, device_id: &str, cooldown: Duration) -> Result<bool, CoinlockError> {
        let now = self.clock.now_utc();
        let mut near_misses = self.lock_near_misses()?;

        near_misses.retain(|_, at| now - *at < cooldown);
        let repeated = near_misses.insert(device_id.to_string(), now).is_some();
        Ok(repeated)
    }

    fn forget_near_miss(&self, device_id: &str) -> Result<(), CoinlockError> {
        self.lock_near_misses()?.remove(device_id);
        Ok(())
    }

    fn lock_near_misses(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, DateTime<Utc>>>, CoinlockError> {
        self.near_misses
            .lock()
            .map_err(|_| CoinlockError::ServerError("near-miss table lock poisoned".to_string()))
    }
}

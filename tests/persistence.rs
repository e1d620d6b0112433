//! Accounts survive a restart when backed by the file store.

use chrono::Duration;
use coinlock::{
    AdType, ClientRequest, CoinlockConfig, Collaborators, DeviceInfo, FileStore, LedgerManager,
    MockClock, Plan, StaticAdDirectory,
};
use std::path::Path;
use std::sync::Arc;

const SECRET: &str = "0123456789abcdef0123456789abcdef";
const REWARDED: &str = "ca-app-pub-1/rewarded";

fn open(dir: &Path, clock: Arc<MockClock>) -> LedgerManager {
    let ads = StaticAdDirectory::new().with_unit(REWARDED, "Bonus", AdType::Rewarded);
    let mut parts = Collaborators::in_memory(Arc::new(ads), Arc::new(Plan::default()));
    parts.accounts = Arc::new(FileStore::with_path(dir.to_path_buf()).unwrap());
    LedgerManager::new_with_clock(CoinlockConfig::new(SECRET), parts, clock).unwrap()
}

#[test]
fn test_unlock_survives_restart() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let clock = Arc::new(MockClock::from_rfc3339("2025-01-15T12:00:00Z"));
    let request = ClientRequest::new("device-disk-0001");

    let receipt = {
        let manager = open(temp_dir.path(), clock.clone());
        for _ in 0..12 {
            manager
                .claim_reward(&request, REWARDED, "", DeviceInfo::new().with("osVersion", "14"))
                .unwrap();
            clock.advance(Duration::seconds(30));
        }
        manager
            .purchase_unlock(&request, Some(10), Some("purchase-0001"))
            .unwrap()
    };

    clock.advance(Duration::minutes(1));
    let manager = open(temp_dir.path(), clock.clone());

    let status = manager.status(&request).unwrap();
    assert_eq!(status.coins, 20);
    assert!(status.is_unlocked);

    // The idempotency record was persisted with the debit.
    let retry = manager
        .purchase_unlock(&request, Some(10), Some("purchase-0001"))
        .unwrap();
    assert!(retry.replayed);
    assert_eq!(retry.proof, receipt.proof);
    assert_eq!(manager.status(&request).unwrap().coins, 20);

    let history = manager.reward_history(&request, 0, 5).unwrap();
    assert_eq!(history.total, 12);
    assert_eq!(
        history.events[0].device_info.get("osVersion"),
        Some(&serde_json::json!("14"))
    );
}

#[test]
fn test_expiry_flip_is_persisted() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let clock = Arc::new(MockClock::from_rfc3339("2025-01-15T12:00:00Z"));
    let request = ClientRequest::new("device-disk-0002");

    {
        let manager = open(temp_dir.path(), clock.clone());
        for _ in 0..10 {
            manager
                .claim_reward(&request, REWARDED, "", DeviceInfo::new())
                .unwrap();
            clock.advance(Duration::seconds(30));
        }
        manager.purchase_unlock(&request, Some(1), None).unwrap();
    }

    clock.advance(Duration::days(2));
    {
        let manager = open(temp_dir.path(), clock.clone());
        assert!(!manager.status(&request).unwrap().is_unlocked);
    }

    let store = FileStore::with_path(temp_dir.path().to_path_buf()).unwrap();
    let stored = coinlock::AccountStore::load(&store, "device-disk-0002")
        .unwrap()
        .unwrap();
    assert!(!stored.value.is_unlocked);
    assert_eq!(stored.value.unlock_signature, None);
}

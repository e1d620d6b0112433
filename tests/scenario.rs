//! End-to-end walkthrough of a device's life: earn, unlock, validate,
//! get caught, get blacklisted.

use chrono::Duration;
use coinlock::{
    ActivityType, AdType, Clock, ClientRequest, ClientUnlockReport, CoinlockConfig, CoinlockError,
    Collaborators, DeviceInfo, LedgerManager, MockClock, Plan, StaticAdDirectory,
    ViolationAction,
};
use std::sync::Arc;

const SECRET: &str = "0123456789abcdef0123456789abcdef";
const REWARDED: &str = "ca-app-pub-3940256099942544/5224354917";
const INTERSTITIAL: &str = "ca-app-pub-3940256099942544/1033173712";

fn setup() -> (LedgerManager, Arc<MockClock>) {
    let clock = Arc::new(MockClock::from_rfc3339("2025-01-15T12:00:00Z"));
    (setup_at(clock.clone()), clock)
}

fn setup_at(clock: Arc<MockClock>) -> LedgerManager {
    let ads = StaticAdDirectory::new()
        .with_unit(REWARDED, "Daily Bonus", AdType::Rewarded)
        .with_unit(INTERSTITIAL, "Level Break", AdType::Interstitial);
    let parts = Collaborators::in_memory(Arc::new(ads), Arc::new(Plan::default()));
    LedgerManager::new_with_clock(CoinlockConfig::new(SECRET), parts, clock).unwrap()
}

#[test]
fn test_earn_unlock_validate_blacklist() {
    let (manager, clock) = setup();
    let device = ClientRequest::new("device-A-0001");

    // First reward.
    let account = manager
        .claim_reward(&device, REWARDED, "", DeviceInfo::new())
        .unwrap();
    assert_eq!(account.coin_balance, 10);
    assert!(account.last_reward_timestamp.is_some());

    // Immediate retry hits the cooldown and changes nothing.
    let err = manager
        .claim_reward(&device, REWARDED, "", DeviceInfo::new())
        .unwrap_err();
    assert!(matches!(err, CoinlockError::CooldownActive { .. }));
    assert_eq!(manager.status(&device).unwrap().coins, 10);

    // Non-rewarded ads never pay.
    let err = manager
        .claim_reward(&device, INTERSTITIAL, "", DeviceInfo::new())
        .unwrap_err();
    assert!(matches!(err, CoinlockError::WrongAdType { .. }));

    // Earn up to the plan cost.
    for _ in 0..9 {
        clock.advance(Duration::seconds(30));
        manager
            .claim_reward(&device, REWARDED, "", DeviceInfo::new())
            .unwrap();
    }
    assert_eq!(manager.status(&device).unwrap().coins, 100);

    let receipt = manager.purchase_unlock(&device, Some(30), None).unwrap();
    assert_eq!(receipt.account.coin_balance, 0);
    assert!(receipt.account.is_unlocked);
    let t = receipt.unlock_timestamp_ms;
    let proof = receipt.proof.clone();

    // One day later the proof is still good.
    clock.advance(Duration::days(1));
    let check = manager
        .validate_proof(&device, t, 30, proof.as_str())
        .unwrap();
    assert!(check.valid);
    assert!(!check.expired);

    // A tampered proof is worth 15 points.
    let check = manager.validate_proof(&device, t, 30, "tampered").unwrap();
    assert!(!check.valid);
    assert_eq!(manager.suspicion().score("device-A-0001").unwrap(), 15);

    // Two more independent signals take the score to 50.
    manager
        .suspicion()
        .report("device-A-0001", ActivityType::SecurityViolation, "hooking")
        .unwrap();
    let outcome = manager
        .suspicion()
        .report("device-A-0001", ActivityType::QuickRewards, "burst")
        .unwrap();
    assert_eq!(outcome.score, 50);
    assert!(outcome.blacklisted);

    // Everything is rejected now, even with a valid proof.
    assert!(matches!(
        manager.status(&device),
        Err(CoinlockError::Blacklisted)
    ));
    assert!(matches!(
        manager.claim_reward(&device, REWARDED, "", DeviceInfo::new()),
        Err(CoinlockError::Blacklisted)
    ));
    assert!(matches!(
        manager.purchase_unlock(&device, None, None),
        Err(CoinlockError::Blacklisted)
    ));
    assert!(matches!(
        manager.validate_proof(&device, t, 30, proof.as_str()),
        Err(CoinlockError::Blacklisted)
    ));

    // The stored account itself was not touched by the engine's reports.
    let stored = manager.ledger().find("device-A-0001").unwrap().unwrap();
    assert_eq!(stored.coin_balance, 0);
    assert!(stored.is_unlocked);
}

#[test]
fn test_server_detected_blacklist_revokes_unlock() {
    let (manager, clock) = setup();
    let device = ClientRequest::new("device-B-0002");

    for _ in 0..10 {
        manager
            .claim_reward(&device, REWARDED, "", DeviceInfo::new())
            .unwrap();
        clock.advance(Duration::seconds(31));
    }
    let receipt = manager.purchase_unlock(&device, None, None).unwrap();
    assert!(receipt.account.is_unlocked);

    // Four forged proofs: 15 + 15 + 15 + 15 crosses 50 on the last one.
    for _ in 0..4 {
        let check = manager
            .validate_proof(&device, receipt.unlock_timestamp_ms, 30, "00ff")
            .unwrap();
        assert!(!check.valid);
    }

    assert!(manager.suspicion().is_blacklisted("device-B-0002").unwrap());
    let stored = manager.ledger().find("device-B-0002").unwrap().unwrap();
    assert!(!stored.is_unlocked);
    assert_eq!(stored.security_violations.len(), 1);
    assert_eq!(
        stored.security_violations[0].action,
        ViolationAction::Blacklist
    );
}

#[test]
fn test_unlock_expires_on_read() {
    let (manager, clock) = setup();
    let device = ClientRequest::new("device-C-0003");

    for _ in 0..10 {
        manager
            .claim_reward(&device, REWARDED, "", DeviceInfo::new())
            .unwrap();
        clock.advance(Duration::seconds(30));
    }
    manager.purchase_unlock(&device, Some(7), None).unwrap();

    clock.advance(Duration::days(6));
    let status = manager.status(&device).unwrap();
    assert!(status.is_unlocked);
    assert!(status.remaining_time_ms > 0);

    clock.advance(Duration::days(2));
    let status = manager.status(&device).unwrap();
    assert!(!status.is_unlocked);
    assert_eq!(status.unlock_expiry, None);
    assert_eq!(status.remaining_time_ms, 0);
    assert!(!manager.ledger().find("device-C-0003").unwrap().unwrap().is_unlocked);
}

#[test]
fn test_offline_client_restores_unlock() {
    let (manager, clock) = setup();
    let device = ClientRequest::new("device-D-0004");

    // Unlock obtained before the server lost its records; the client kept the proof.
    for _ in 0..10 {
        manager
            .claim_reward(&device, REWARDED, "", DeviceInfo::new())
            .unwrap();
        clock.advance(Duration::seconds(30));
    }
    let original = manager.purchase_unlock(&device, None, None).unwrap();

    clock.advance(Duration::days(3));
    let fresh_server = setup_at(clock.clone());
    assert!(!fresh_server.status(&device).unwrap().is_unlocked);

    let report = ClientUnlockReport {
        timestamp_ms: original.unlock_timestamp_ms,
        duration_days: original.duration_days,
        device_info: DeviceInfo::new().with("osVersion", "14"),
        proof: Some(original.proof.as_str().to_string()),
    };
    let restored = fresh_server.report_client_unlock(&device, &report).unwrap();
    assert!(restored.account.is_unlocked);
    assert_eq!(restored.proof, original.proof);

    let status = fresh_server.status(&device).unwrap();
    assert!(status.is_unlocked);
    assert_eq!(status.remaining_time_ms, 27 * 24 * 60 * 60 * 1000);
}

#[test]
fn test_revoked_unlock_cannot_be_restored() {
    let (manager, clock) = setup();
    let device = ClientRequest::new("device-F-0006");

    for _ in 0..10 {
        manager
            .claim_reward(&device, REWARDED, "", DeviceInfo::new())
            .unwrap();
        clock.advance(Duration::seconds(30));
    }
    let original = manager.purchase_unlock(&device, None, None).unwrap();
    manager
        .report_security_violation(&device, DeviceInfo::new(), "debugger attached")
        .unwrap();
    assert!(!manager.status(&device).unwrap().is_unlocked);

    clock.advance(Duration::days(3));
    let report = ClientUnlockReport {
        timestamp_ms: original.unlock_timestamp_ms,
        duration_days: original.duration_days,
        device_info: DeviceInfo::new(),
        proof: None,
    };
    let err = manager.report_client_unlock(&device, &report).unwrap_err();
    assert!(matches!(err, CoinlockError::UnlockRevoked));
    assert_eq!(
        manager.respond::<()>(Err(err)).unwrap_err().code,
        "unlock_revoked"
    );

    let status = manager.status(&device).unwrap();
    assert!(!status.is_unlocked);
    assert_eq!(status.coins, 0);
}

#[test]
fn test_clock_tampering_escalates() {
    let (manager, clock) = setup();
    let server_ms = clock.now_utc().timestamp_millis();

    // Client one hour behind: 10 points per request.
    let device = ClientRequest::new("device-E-0005").at(server_ms - 60 * 60 * 1000);
    for _ in 0..4 {
        manager.status(&device).unwrap();
    }
    assert_eq!(manager.suspicion().score("device-E-0005").unwrap(), 40);

    let account = manager.ledger().find("device-E-0005").unwrap().unwrap();
    assert_eq!(account.time_offset_ms, 60 * 60 * 1000);

    // Fifth strike blacklists mid-request.
    assert!(matches!(
        manager.status(&device),
        Err(CoinlockError::Blacklisted)
    ));
    let account = manager.ledger().find("device-E-0005").unwrap().unwrap();
    assert_eq!(
        account.security_violations.last().map(|v| v.action),
        Some(ViolationAction::Blacklist)
    );
}

//! Ledger walkthrough example.
//!
//! Earns coins on a rewarded ad unit, buys an unlock and checks the proof
//! the way a client would after coming back online.
//!
//! # Running
//!
//! ```bash
//! export COINLOCK_SERVER_SECRET="a-server-secret-of-at-least-32-bytes"
//! cargo run --example ledger_walkthrough
//! ```
//!
//! # Note
//!
//! The secret must never ship inside the client. Anyone holding it can mint
//! unlock proofs.

use coinlock::{
    AdType, ClientRequest, CoinlockConfig, CoinlockError, Collaborators, DeviceInfo,
    LedgerManager, Plan, StaticAdDirectory,
};
use std::sync::Arc;

const REWARDED_UNIT: &str = "ca-app-pub-3940256099942544/5224354917";

fn main() {
    let config = match CoinlockConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // A cheap plan so the walkthrough needs a single ad.
    let plan = Plan {
        required_coins: 10,
        ..Plan::default()
    };
    let ads = StaticAdDirectory::new().with_unit(REWARDED_UNIT, "Daily Bonus", AdType::Rewarded);
    let parts = Collaborators::in_memory(Arc::new(ads), Arc::new(plan));

    let manager = match LedgerManager::new(config, parts) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let now_ms = manager.server_time().timestamp_ms;
    let request = ClientRequest::new("demo-device-0001").at(now_ms);

    match manager.claim_reward(&request, REWARDED_UNIT, "", DeviceInfo::new()) {
        Ok(account) => println!("Earned coins, balance {}", account.coin_balance),
        Err(e) => report(&manager, e),
    }

    // Claiming again straight away is refused with a retry hint.
    if let Err(e) = manager.claim_reward(&request, REWARDED_UNIT, "", DeviceInfo::new()) {
        let rejection = e.to_rejection();
        println!(
            "Second claim refused: {} (retry in {:?}s)",
            rejection.code, rejection.retry_after_seconds
        );
    }

    let receipt = match manager.purchase_unlock(&request, None, Some("demo-purchase-1")) {
        Ok(r) => r,
        Err(e) => {
            report(&manager, e);
            return;
        }
    };
    println!("Unlocked for {} days", receipt.duration_days);
    println!("  Proof: {}", receipt.proof);

    match manager.validate_proof(
        &request,
        receipt.unlock_timestamp_ms,
        receipt.duration_days,
        receipt.proof.as_str(),
    ) {
        Ok(check) => println!(
            "Proof valid: {}, expired: {}, remaining {}ms",
            check.valid, check.expired, check.remaining_time_ms
        ),
        Err(e) => report(&manager, e),
    }
}

fn report(manager: &LedgerManager, error: CoinlockError) {
    if let Err(rejection) = manager.respond::<()>(Err(error)) {
        eprintln!("Rejected: {} ({})", rejection.code, rejection.message);
    }
}

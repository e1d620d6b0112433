//! Business-rule gates in front of the ledger.

pub mod reward;
pub mod unlock;

pub use reward::RewardGate;
pub use unlock::UnlockGate;

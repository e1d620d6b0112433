//! Ledger data model and device identifier rules.

pub mod device_id;
pub mod models;

//! Cryptographic primitives for unlock proofs and storage keys.

pub mod digest;
pub mod proof;
pub mod signing;

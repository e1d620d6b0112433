//! Tamper signals: client clock checks and suspicion scoring.

pub mod clock_skew;
pub mod suspicion;

pub use clock_skew::{ClockIntegrityMonitor, ClockObservation, SkewReason};
pub use suspicion::{
    ActivityType, MemorySuspicionStore, SuspicionEngine, SuspicionOutcome, SuspicionRecord,
    SuspicionStore,
};

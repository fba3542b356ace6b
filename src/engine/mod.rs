//! Core engine — the round decision-and-execution loop.

pub mod claims;
pub mod controller;
pub mod executor;
pub mod scheduler;

pub use controller::{ClaimOutcome, CycleReport, CycleState, RoundController, WagerOutcome};

//! Decision strategies — stake sizing and side selection.
//!
//! Both are pure functions of ledger data and configuration; the round
//! controller owns all state they are consulted with.

pub mod side;
pub mod sizing;

pub use side::{choose_side, SideMode};
pub use sizing::{BetSizer, SizingConfig, StakeDecision, StakeReason};

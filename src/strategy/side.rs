//! Side selection over the current pool imbalance.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::ConfigError;
use crate::types::{RoundPools, Side};

/// Side returned whenever both pools are equal.
pub const TIE_SIDE: Side = Side::Bull;

/// How to pick a side from the pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SideMode {
    /// Back the smaller pool for the better payout ratio.
    Contrarian,
    /// Back the larger pool.
    Majority,
    AlwaysBull,
    AlwaysBear,
}

impl SideMode {
    pub const ALL: &'static [SideMode] = &[
        SideMode::Contrarian,
        SideMode::Majority,
        SideMode::AlwaysBull,
        SideMode::AlwaysBear,
    ];
}

impl Default for SideMode {
    fn default() -> Self {
        SideMode::Contrarian
    }
}

impl fmt::Display for SideMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SideMode::Contrarian => write!(f, "contrarian"),
            SideMode::Majority => write!(f, "majority"),
            SideMode::AlwaysBull => write!(f, "bull"),
            SideMode::AlwaysBear => write!(f, "bear"),
        }
    }
}

/// Case-insensitive parse; unknown names are a configuration error.
impl std::str::FromStr for SideMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "contrarian" | "against" => Ok(SideMode::Contrarian),
            "majority" | "with" => Ok(SideMode::Majority),
            "bull" | "always-bull" => Ok(SideMode::AlwaysBull),
            "bear" | "always-bear" => Ok(SideMode::AlwaysBear),
            other => Err(ConfigError::UnknownStrategy(other.to_string())),
        }
    }
}

/// Pick a side for `pools` under `mode`.
pub fn choose_side(bull_pool: Decimal, bear_pool: Decimal, mode: SideMode) -> Side {
    match mode {
        SideMode::AlwaysBull => Side::Bull,
        SideMode::AlwaysBear => Side::Bear,
        SideMode::Contrarian => {
            if bull_pool == bear_pool {
                TIE_SIDE
            } else if bull_pool < bear_pool {
                Side::Bull
            } else {
                Side::Bear
            }
        }
        SideMode::Majority => {
            if bull_pool == bear_pool {
                TIE_SIDE
            } else if bull_pool > bear_pool {
                Side::Bull
            } else {
                Side::Bear
            }
        }
    }
}

pub fn choose_side_for(pools: &RoundPools, mode: SideMode) -> Side {
    choose_side(pools.bull, pools.bear, mode)
}

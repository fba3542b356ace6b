//! Pre-bet wait scheduling.
//!
//! The wager is submitted a fixed delay after round start. When a wager
//! fails, the round most likely locked before the transaction landed, so
//! the delay is cut by two blocks for every later round.

use std::time::Duration;
use tracing::{info, warn};

/// Blocks removed from the wait per failed submission.
const BLOCKS_PER_FAILURE: u32 = 2;

#[derive(Debug, Clone)]
pub struct WaitScheduler {
    wait: Duration,
    block_interval: Duration,
    floor: Duration,
}

impl WaitScheduler {
    /// A zero floor is raised to one block interval.
    pub fn new(base_wait: Duration, block_interval: Duration, floor: Duration) -> Self {
        let floor = if floor.is_zero() { block_interval } else { floor };
        Self {
            wait: base_wait.max(floor),
            block_interval,
            floor,
        }
    }

    pub fn current_wait(&self) -> Duration {
        self.wait
    }

    pub fn floor(&self) -> Duration {
        self.floor
    }

    /// Shrink the wait by two block intervals, never below the floor.
    pub fn on_submission_failure(&mut self) -> Duration {
        let step = self.block_interval * BLOCKS_PER_FAILURE;
        let next = self.wait.saturating_sub(step).max(self.floor);
        if next == self.wait {
            warn!(wait_ms = self.wait.as_millis() as u64, "Wait already at floor");
        } else {
            info!(
                from_ms = self.wait.as_millis() as u64,
                to_ms = next.as_millis() as u64,
                "Shortening pre-bet wait after failed wager"
            );
        }
        self.wait = next;
        self.wait
    }

    /// Successful submissions leave the wait unchanged.
    pub fn on_submission_success(&mut self) -> Duration {
        self.wait
    }
}

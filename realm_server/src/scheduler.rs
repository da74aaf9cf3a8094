//! Fixed-step tick scheduler.
//!
//! Determinism notes:
//! - The tick counter starts at 0, so every periodic phase fires on tick 0.
//! - Phases run in a fixed order; the scheduler only says which are due.
//! - The wall clock only decides *when* a tick runs, never what it does.

use std::time::Duration;

use realm_shared::config::WorldConfig;

/// Periodic phases due on the current tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DuePhases {
    pub aggro: bool,
    pub regen: bool,
    pub housekeeping: bool,
}

#[derive(Debug, Clone)]
pub struct TickScheduler {
    period: Duration,
    ticks: u64,
    aggro_interval: u64,
    regen_interval: u64,
    housekeeping_interval: u64,
}

impl TickScheduler {
    pub fn new(cfg: &WorldConfig) -> Self {
        Self {
            period: Duration::from_millis(cfg.tick_ms.max(1)),
            ticks: 0,
            aggro_interval: cfg.aggro_interval,
            regen_interval: cfg.regen_interval,
            housekeeping_interval: cfg.housekeeping_interval,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Number of the tick about to run (or running).
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// True every `interval` ticks. An interval of 0 never fires.
    pub fn is_tick_interval(&self, interval: u64) -> bool {
        interval != 0 && self.ticks % interval == 0
    }

    pub fn due(&self) -> DuePhases {
        DuePhases {
            aggro: self.is_tick_interval(self.aggro_interval),
            regen: self.is_tick_interval(self.regen_interval),
            housekeeping: self.is_tick_interval(self.housekeeping_interval),
        }
    }

    pub fn advance(&mut self) {
        self.ticks += 1;
    }
}

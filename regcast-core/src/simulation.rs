//! Fixed-tick register simulation.
//!
//! Every tick each register's accumulator moves by its drift rate. The
//! published value is the floor of the accumulator; leaving `1..=100`
//! resets hard to the opposite bound, so a register traces a sawtooth
//! rather than wrapping modulo 100.

use std::time::Duration;

use crate::store::{Device, MAX_VALUE, MIN_VALUE, Register};

/// Tick period the drift rates are expressed against.
pub const CANONICAL_TICK: Duration = Duration::from_millis(100);

/// Advances devices by one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Simulation {
    dt_factor: f64,
}

impl Simulation {
    /// A simulation ticking every `period`. Drift is scaled by
    /// `period / 100ms` so register speed is independent of tick rate.
    pub fn new(period: Duration) -> Self {
        Self {
            dt_factor: period.as_secs_f64() / CANONICAL_TICK.as_secs_f64(),
        }
    }

    pub fn dt_factor(&self) -> f64 {
        self.dt_factor
    }

    /// Advance every register of `device` by one tick. Returns the
    /// number of registers whose published value changed.
    pub fn advance(&self, device: &mut Device) -> usize {
        device
            .registers_mut()
            .iter_mut()
            .map(|r| self.advance_register(r))
            .filter(|changed| *changed)
            .count()
    }

    /// Advance a single register. Returns whether `published` changed.
    pub fn advance_register(&self, r: &mut Register) -> bool {
        r.prev_published = r.published;
        r.internal += r.inc_dec * self.dt_factor;

        let floor = r.internal.floor();
        r.published = if floor > MAX_VALUE as f64 {
            r.internal = MIN_VALUE as f64;
            MIN_VALUE
        } else if floor < MIN_VALUE as f64 {
            r.internal = MAX_VALUE as f64;
            MAX_VALUE
        } else {
            floor as u8
        };

        r.changed()
    }
}

impl Default for Simulation {
    fn default() -> Self {
        Self::new(CANONICAL_TICK)
    }
}

// ── Tests ────────────────────────────────────────────────────────

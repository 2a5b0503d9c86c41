//! Register and device types.

use rand::Rng;

/// Lowest value a register may publish.
pub const MIN_VALUE: u8 = 1;

/// Highest value a register may publish.
pub const MAX_VALUE: u8 = 100;

/// Smallest drift magnitude; anything closer to zero is snapped out to it.
pub const MIN_DRIFT: f64 = 0.1;

/// Largest drift magnitude produced by [`Register::random`].
pub const MAX_DRIFT: f64 = 2.0;

// ── Register ─────────────────────────────────────────────────────

/// A single simulated cell.
///
/// `internal` is the continuous accumulator; `published` is its floor,
/// held in `MIN_VALUE..=MAX_VALUE`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Register {
    pub published: u8,
    pub internal: f64,
    pub inc_dec: f64,
    pub prev_published: u8,
}

impl Register {
    /// Create a register at `published` drifting by `inc_dec` per tick.
    ///
    /// `published` is clamped into range and `inc_dec` snapped away from
    /// zero (see [`snap_drift`]).
    pub fn new(published: u8, inc_dec: f64) -> Self {
        let published = published.clamp(MIN_VALUE, MAX_VALUE);
        Self {
            published,
            internal: published as f64,
            inc_dec: snap_drift(inc_dec),
            prev_published: published,
        }
    }

    /// A register with a uniformly random value and drift in `[-2, 2)`.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let published = rng.random_range(MIN_VALUE..=MAX_VALUE);
        let inc_dec = rng.random::<f64>() * (2.0 * MAX_DRIFT) - MAX_DRIFT;
        Self::new(published, inc_dec)
    }

    /// Whether the last advance changed the published value.
    pub fn changed(&self) -> bool {
        self.published != self.prev_published
    }
}

/// Snap a drift rate in `(-0.1, 0.1)` out to `±0.1` so every register
/// moves. Zero snaps to `+0.1`.
pub fn snap_drift(inc_dec: f64) -> f64 {
    if inc_dec > -MIN_DRIFT && inc_dec < MIN_DRIFT {
        if inc_dec < 0.0 { -MIN_DRIFT } else { MIN_DRIFT }
    } else {
        inc_dec
    }
}

// ── Device ───────────────────────────────────────────────────────

/// A fixed-length array of registers simulated and subscribed to as a
/// unit (channel `device_<id>`).
#[derive(Debug, Clone)]
pub struct Device {
    id: u32,
    registers: Vec<Register>,
}

impl Device {
    /// Build a device from explicit registers.
    pub fn new(id: u32, registers: Vec<Register>) -> Self {
        Self { id, registers }
    }

    /// Build a device of `count` randomly initialised registers.
    pub fn random<R: Rng + ?Sized>(id: u32, count: usize, rng: &mut R) -> Self {
        let registers = (0..count).map(|_| Register::random(&mut *rng)).collect();
        Self { id, registers }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    pub fn registers(&self) -> &[Register] {
        &self.registers
    }

    /// Mutable access to individual registers. The slice length is fixed.
    pub fn registers_mut(&mut self) -> &mut [Register] {
        &mut self.registers
    }

    /// The current published vector, one byte per register.
    pub fn published(&self) -> Vec<u8> {
        self.registers.iter().map(|r| r.published).collect()
    }

    /// Write the published vector into `out`, reusing its allocation.
    pub fn published_into(&self, out: &mut Vec<u8>) {
        out.clear();
        out.extend(self.registers.iter().map(|r| r.published));
    }

    /// Channel name for this device.
    pub fn channel(&self) -> String {
        crate::channel::ChannelName::device_channel(self.id)
    }
}

// ── Tests ────────────────────────────────────────────────────────

//! Decibel conversion and the per-voice gain stack.

use serde::{Deserialize, Serialize};

/// Convert decibels to a linear multiplier
#[inline]
pub fn db_to_linear(db: f32) -> f32 {
    if db <= -144.0 {
        0.0
    } else {
        10.0_f32.powf(db / 20.0)
    }
}

/// Convert a linear multiplier to decibels
#[inline]
pub fn linear_to_db(linear: f32) -> f32 {
    if linear <= 0.0 {
        f32::NEG_INFINITY
    } else {
        20.0 * linear.log10()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DECIBELS
// ═══════════════════════════════════════════════════════════════════════════════

/// Decibel value wrapper
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Decibels(pub f32);

impl Decibels {
    pub const ZERO: Self = Self(0.0);
    pub const SILENCE: Self = Self(f32::NEG_INFINITY);

    #[inline]
    pub fn from_linear(linear: f32) -> Self {
        Self(linear_to_db(linear))
    }

    #[inline]
    pub fn to_linear(self) -> f32 {
        db_to_linear(self.0)
    }
}

impl Default for Decibels {
    fn default() -> Self {
        Self::ZERO
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// GAIN STACK
// ═══════════════════════════════════════════════════════════════════════════════

/// Five independent multiplicative gain factors for one voice.
///
/// Each factor has exactly one writer:
/// - `base` — seeded by the event engine from container + event gain
/// - `bus` — written by the bus graph resolution
/// - `occlusion` — written by the spatial/occlusion pass
/// - `rtpc` — written by blend/RTPC evaluation
/// - `scheduler` — written by ducking, crossfades and stop fades
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GainStack {
    pub base: f32,
    pub bus: f32,
    pub occlusion: f32,
    pub rtpc: f32,
    pub scheduler: f32,
}

impl GainStack {
    /// Unity on every factor
    pub const UNITY: Self = Self {
        base: 1.0,
        bus: 1.0,
        occlusion: 1.0,
        rtpc: 1.0,
        scheduler: 1.0,
    };

    /// Create a stack with the given base factor, unity elsewhere
    pub fn with_base(base: f32) -> Self {
        Self {
            base,
            ..Self::UNITY
        }
    }

    /// Final output gain — the product of all five factors
    #[inline]
    pub fn final_gain(&self) -> f32 {
        self.base * self.bus * self.occlusion * self.rtpc * self.scheduler
    }

    /// Reset all factors to unity
    pub fn reset(&mut self) {
        *self = Self::UNITY;
    }
}

impl Default for GainStack {
    fn default() -> Self {
        Self::UNITY
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

//! Ducking envelopes — attack → hold → release gain reduction.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use soniq_core::{BusId, db_to_linear};

// ═══════════════════════════════════════════════════════════════════════════════
// DUCK SETTINGS
// ═══════════════════════════════════════════════════════════════════════════════

/// Ducking configuration carried by a bus definition.
///
/// When the owning bus is triggered, every bus in `targets` (and its
/// descendants' voices) is attenuated by `amount_db` following an
/// attack → hold → release envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuckSettings {
    /// Buses that get ducked
    pub targets: SmallVec<[BusId; 4]>,
    /// Duck amount in dB (negative reduces volume)
    pub amount_db: f32,
    /// Attack time in seconds (clamped 0–2)
    pub attack_secs: f32,
    /// Hold time after the trigger is released (seconds)
    pub hold_secs: f32,
    /// Release time in seconds (clamped 0–2)
    pub release_secs: f32,
}

impl DuckSettings {
    pub fn new(targets: impl IntoIterator<Item = BusId>, amount_db: f32) -> Self {
        Self {
            targets: targets.into_iter().collect(),
            amount_db,
            attack_secs: 0.05,
            hold_secs: 0.0,
            release_secs: 0.5,
        }
    }

    pub fn with_times(mut self, attack_secs: f32, hold_secs: f32, release_secs: f32) -> Self {
        self.attack_secs = attack_secs.clamp(0.0, 2.0);
        self.hold_secs = hold_secs.max(0.0);
        self.release_secs = release_secs.clamp(0.0, 2.0);
        self
    }

    /// Fully-ducked linear gain
    #[inline]
    pub fn floor_gain(&self) -> f32 {
        db_to_linear(self.amount_db)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DUCK ENVELOPE
// ═══════════════════════════════════════════════════════════════════════════════

/// Envelope phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuckPhase {
    /// Not ducking, gain at unity
    Idle,
    /// Ramping down toward the duck floor
    Attack,
    /// Held at the floor
    Hold,
    /// Ramping back to unity
    Release,
}

/// Runtime state of one active duck, ticked by the scheduler.
#[derive(Debug, Clone)]
pub struct DuckEnvelope {
    settings: DuckSettings,
    phase: DuckPhase,
    /// Seconds elapsed in the current phase
    phase_time: f32,
    /// Gain at the moment the current phase started
    phase_start_gain: f32,
    current_gain: f32,
    /// Outstanding trigger count; release starts when it reaches zero
    trigger_count: u32,
}

impl DuckEnvelope {
    pub fn new(settings: DuckSettings) -> Self {
        Self {
            settings,
            phase: DuckPhase::Idle,
            phase_time: 0.0,
            phase_start_gain: 1.0,
            current_gain: 1.0,
            trigger_count: 0,
        }
    }

    pub fn settings(&self) -> &DuckSettings {
        &self.settings
    }

    pub fn phase(&self) -> DuckPhase {
        self.phase
    }

    /// Current linear duck multiplier (1.0 = no ducking)
    #[inline]
    pub fn gain(&self) -> f32 {
        self.current_gain
    }

    pub fn is_idle(&self) -> bool {
        self.phase == DuckPhase::Idle
    }

    /// Arm the duck. Re-triggering while active re-enters the attack phase.
    pub fn trigger(&mut self) {
        self.trigger_count += 1;
        self.enter(DuckPhase::Attack);
    }

    /// Drop one trigger; the hold phase begins once all triggers are
    /// gone. A release mid-attack lets the attack ramp finish first.
    pub fn release(&mut self) {
        self.trigger_count = self.trigger_count.saturating_sub(1);
        if self.trigger_count == 0
            && self.phase == DuckPhase::Attack
            && self.current_gain <= self.settings.floor_gain() + 1e-6
        {
            self.enter(DuckPhase::Hold);
        }
    }

    fn enter(&mut self, phase: DuckPhase) {
        self.phase = phase;
        self.phase_time = 0.0;
        self.phase_start_gain = self.current_gain;
    }

    /// Advance the envelope, returning the new duck gain.
    pub fn tick(&mut self, dt: f32) -> f32 {
        self.phase_time += dt;
        let floor = self.settings.floor_gain();

        match self.phase {
            DuckPhase::Idle => {}
            DuckPhase::Attack => {
                if self.settings.attack_secs <= 0.0 || self.phase_time >= self.settings.attack_secs
                {
                    self.current_gain = floor;
                    if self.trigger_count == 0 {
                        self.enter(DuckPhase::Hold);
                    }
                } else {
                    let t = self.phase_time / self.settings.attack_secs;
                    self.current_gain = self.phase_start_gain + (floor - self.phase_start_gain) * t;
                }
            }
            DuckPhase::Hold => {
                self.current_gain = floor;
                if self.trigger_count == 0 && self.phase_time >= self.settings.hold_secs {
                    self.enter(DuckPhase::Release);
                }
            }
            DuckPhase::Release => {
                if self.settings.release_secs <= 0.0
                    || self.phase_time >= self.settings.release_secs
                {
                    self.current_gain = 1.0;
                    self.enter(DuckPhase::Idle);
                } else {
                    let t = self.phase_time / self.settings.release_secs;
                    self.current_gain = self.phase_start_gain + (1.0 - self.phase_start_gain) * t;
                }
            }
        }

        self.current_gain
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

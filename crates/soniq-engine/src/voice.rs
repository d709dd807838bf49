//! Voice pool — fixed-capacity playback slots
//!
//! A voice is one concretely playing (or virtualized) sound instance.
//! The pool owns allocation and recycling; every lifecycle transition
//! happens on the scheduler's logical thread. When the pool is full the
//! allocation invokes a stealing decision and fails only when no voice
//! qualifies, in which case the caller drops the request and reports it.

use soniq_containers::RtpcLink;
use soniq_core::{
    BusId, ClipId, ContainerId, EventId, GainStack, PlayingId, Position, Priority, SourceId,
    VoiceId,
};

use crate::backend::ChannelId;
use crate::event::StealPolicy;

// ═══════════════════════════════════════════════════════════════════════════════
// VOICE STATE
// ═══════════════════════════════════════════════════════════════════════════════

/// Lifecycle state of a pool slot.
///
/// `Free → Real ⇄ Virtual → Stopping → Free`; the terminal transition
/// happens on natural end of content, a completed stop fade, or stealing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum VoiceState {
    #[default]
    Free = 0,
    /// Audible, owns an output channel
    Real = 1,
    /// Demoted: no output channel, playback clock still advancing
    Virtual = 2,
    /// Fading out, slot released when the fade completes
    Stopping = 3,
}

impl VoiceState {
    #[inline]
    pub fn is_live(&self) -> bool {
        !matches!(self, VoiceState::Free)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// VOICE
// ═══════════════════════════════════════════════════════════════════════════════

/// Scheduler-driven gain ramp on one voice (fade-in, stop fade, crossfade leg)
#[derive(Debug, Clone)]
pub struct VoiceFade {
    pub from: f32,
    pub to: f32,
    pub elapsed: f32,
    pub duration: f32,
    pub curve: soniq_containers::FadeCurve,
    /// Release the slot when the fade lands
    pub then_free: bool,
}

impl VoiceFade {
    pub fn new(from: f32, to: f32, duration: f32, curve: soniq_containers::FadeCurve) -> Self {
        Self {
            from,
            to,
            elapsed: 0.0,
            duration: duration.max(0.0),
            curve,
            then_free: false,
        }
    }

    pub fn then_free(mut self) -> Self {
        self.then_free = true;
        self
    }

    /// Advance and return the current gain factor
    pub fn tick(&mut self, dt: f32) -> f32 {
        self.elapsed += dt;
        self.gain()
    }

    pub fn gain(&self) -> f32 {
        if self.duration <= 0.0 {
            return self.to;
        }
        let t = (self.elapsed / self.duration).clamp(0.0, 1.0);
        let shaped = if self.to >= self.from {
            self.curve.evaluate(t)
        } else {
            self.curve.evaluate_out(t)
        };
        // evaluate/evaluate_out map t to [0,1] in the ramp direction
        if self.to >= self.from {
            self.from + (self.to - self.from) * shaped
        } else {
            self.to + (self.from - self.to) * shaped
        }
    }

    pub fn finished(&self) -> bool {
        self.duration <= 0.0 || self.elapsed >= self.duration
    }
}

/// One pool slot
#[derive(Debug)]
pub struct Voice {
    pub id: VoiceId,
    pub state: VoiceState,
    pub playing_id: PlayingId,
    pub event: EventId,
    /// Emitter the post was attached to; 0 means unattached
    pub source: SourceId,
    pub container: ContainerId,
    pub clip: ClipId,
    pub bus: BusId,
    pub priority: Priority,
    pub gain: GainStack,
    /// Base gain seeded from the container/event; the handle's volume
    /// control rescales from this, not from the live base factor
    pub base_seed: f32,
    pub looped: bool,
    pub paused: bool,
    pub pitch_semitones: f32,
    pub position: Option<Position>,
    pub max_distance: f32,
    /// Playback clock in seconds, advances while Real or Virtual
    pub playback_secs: f32,
    /// Seconds spent demoted, for promotion resume
    pub virtual_secs: f32,
    /// Engine time at allocation, drives the Oldest steal policy
    pub started_at: f64,
    pub channel: Option<ChannelId>,
    pub fade: Option<VoiceFade>,
    /// Crossfade leg factor, folded into the scheduler gain each tick
    pub crossfade_gain: f32,
    /// Blend-container RTPC drive, re-evaluated each tick
    pub rtpc_link: Option<RtpcLink>,
    pub loops_completed: u32,
}

impl Voice {
    fn empty(id: VoiceId) -> Self {
        Self {
            id,
            state: VoiceState::Free,
            playing_id: 0,
            event: 0,
            source: soniq_core::NO_SOURCE,
            container: 0,
            clip: 0,
            bus: soniq_core::MASTER_BUS,
            priority: soniq_core::PRIORITY_DEFAULT,
            gain: GainStack::UNITY,
            base_seed: 1.0,
            looped: false,
            paused: false,
            pitch_semitones: 0.0,
            position: None,
            max_distance: 0.0,
            playback_secs: 0.0,
            virtual_secs: 0.0,
            started_at: 0.0,
            channel: None,
            fade: None,
            crossfade_gain: 1.0,
            rtpc_link: None,
            loops_completed: 0,
        }
    }

    /// Reset everything except the slot id
    pub fn reset(&mut self) {
        *self = Voice::empty(self.id);
    }

    /// Distance to the listener, if this voice has a spatial context
    #[inline]
    pub fn distance_to(&self, listener: &Position) -> Option<f32> {
        self.position.map(|p| p.distance_to(listener))
    }

    /// Demotion/promotion ranking: closer, louder, higher-priority voices
    /// matter more. Distance-less voices score as if at the listener.
    pub fn importance(&self, listener: &Position) -> f32 {
        let proximity = match (self.distance_to(listener), self.max_distance) {
            (Some(d), max) if max > 0.0 => 1.0 - (d / max).clamp(0.0, 1.0),
            _ => 1.0,
        };
        proximity * self.gain.final_gain() * (self.priority as f32 / 255.0)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// STEAL VICTIM SELECTION
// ═══════════════════════════════════════════════════════════════════════════════

/// Pick the voice to steal from `candidates` under `policy`, or `None`
/// when nothing qualifies. Used both for pool exhaustion and for
/// per-event instance caps.
pub fn select_victim<'a>(
    candidates: impl Iterator<Item = &'a Voice>,
    policy: StealPolicy,
    incoming_priority: Priority,
    listener: &Position,
) -> Option<VoiceId> {
    let live: Vec<&Voice> = candidates.filter(|v| v.state.is_live()).collect();
    if live.is_empty() {
        return None;
    }

    let oldest = |voices: &[&Voice]| -> Option<VoiceId> {
        voices
            .iter()
            .min_by(|a, b| a.started_at.total_cmp(&b.started_at))
            .map(|v| v.id)
    };

    match policy {
        StealPolicy::Oldest => oldest(&live),
        StealPolicy::Quietest => live
            .iter()
            .min_by(|a, b| a.gain.final_gain().total_cmp(&b.gain.final_gain()))
            .map(|v| v.id),
        StealPolicy::Furthest => {
            let spatial: Vec<&Voice> = live
                .iter()
                .copied()
                .filter(|v| v.position.is_some())
                .collect();
            if spatial.is_empty() {
                // Distance-less voices degrade this policy to Oldest
                return oldest(&live);
            }
            spatial
                .iter()
                .max_by(|a, b| {
                    a.distance_to(listener)
                        .unwrap_or(0.0)
                        .total_cmp(&b.distance_to(listener).unwrap_or(0.0))
                })
                .map(|v| v.id)
        }
        StealPolicy::LowestPriority => {
            // Only voices strictly below the incoming priority qualify;
            // ties broken by age.
            live.iter()
                .filter(|v| v.priority < incoming_priority)
                .min_by(|a, b| {
                    a.priority
                        .cmp(&b.priority)
                        .then(a.started_at.total_cmp(&b.started_at))
                })
                .map(|v| v.id)
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// VOICE POOL
// ═══════════════════════════════════════════════════════════════════════════════

/// Outcome of a successful allocation
#[derive(Debug)]
pub struct Allocation {
    pub slot: VoiceId,
    /// Channel of the voice that was stolen to make room, for the
    /// caller to stop and report
    pub stolen: Option<StolenVoice>,
}

/// What was evicted by a steal, so callbacks and the backend channel
/// can be dealt with by the engine
#[derive(Debug, Clone)]
pub struct StolenVoice {
    pub slot: VoiceId,
    pub playing_id: PlayingId,
    pub event: EventId,
    pub channel: Option<ChannelId>,
}

/// Fixed-capacity voice pool (`max_real + max_virtual` slots)
pub struct VoicePool {
    slots: Vec<Voice>,
    max_real: usize,
}

impl VoicePool {
    pub fn new(max_real: usize, max_virtual: usize) -> Self {
        let capacity = max_real + max_virtual;
        Self {
            slots: (0..capacity).map(|i| Voice::empty(i as VoiceId)).collect(),
            max_real,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn max_real(&self) -> usize {
        self.max_real
    }

    /// Allocate a slot, stealing under `policy` when the pool is full.
    /// `None` means the request must be dropped (reported, not fatal).
    pub fn allocate(
        &mut self,
        priority: Priority,
        policy: StealPolicy,
        listener: &Position,
    ) -> Option<Allocation> {
        if let Some(slot) = self.slots.iter().position(|v| v.state == VoiceState::Free) {
            return Some(Allocation {
                slot: slot as VoiceId,
                stolen: None,
            });
        }

        let victim = select_victim(self.slots.iter(), policy, priority, listener)?;
        let voice = &mut self.slots[victim as usize];
        let stolen = StolenVoice {
            slot: victim,
            playing_id: voice.playing_id,
            event: voice.event,
            channel: voice.channel,
        };
        voice.reset();
        Some(Allocation {
            slot: victim,
            stolen: Some(stolen),
        })
    }

    /// Return a slot to the free set
    pub fn release(&mut self, slot: VoiceId) {
        if let Some(voice) = self.slots.get_mut(slot as usize) {
            voice.reset();
        }
    }

    #[inline]
    pub fn get(&self, slot: VoiceId) -> Option<&Voice> {
        self.slots.get(slot as usize)
    }

    #[inline]
    pub fn get_mut(&mut self, slot: VoiceId) -> Option<&mut Voice> {
        self.slots.get_mut(slot as usize)
    }

    /// All non-free voices
    pub fn live(&self) -> impl Iterator<Item = &Voice> {
        self.slots.iter().filter(|v| v.state.is_live())
    }

    pub fn live_mut(&mut self) -> impl Iterator<Item = &mut Voice> {
        self.slots.iter_mut().filter(|v| v.state.is_live())
    }

    pub fn count(&self, state: VoiceState) -> usize {
        self.slots.iter().filter(|v| v.state == state).count()
    }

    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|v| v.state.is_live()).count()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn occupy(pool: &mut VoicePool, slot: VoiceId, priority: Priority, started_at: f64) {
        let v = pool.get_mut(slot).unwrap();
        v.state = VoiceState::Real;
        v.priority = priority;
        v.started_at = started_at;
        v.playing_id = 100 + slot as PlayingId;
    }

    #[test]
    fn test_allocate_prefers_free_slot() {
        let mut pool = VoicePool::new(2, 2);
        let alloc = pool
            .allocate(128, StealPolicy::Oldest, &Position::ORIGIN)
            .unwrap();
        assert!(alloc.stolen.is_none());
        assert_eq!(alloc.slot, 0);
    }

    #[test]
    fn test_lowest_priority_steal() {
        let mut pool = VoicePool::new(2, 0);
        occupy(&mut pool, 0, 64, 0.0); // low
        occupy(&mut pool, 1, 192, 1.0); // high

        let alloc = pool
            .allocate(128, StealPolicy::LowestPriority, &Position::ORIGIN)
            .unwrap();
        let stolen = alloc.stolen.unwrap();
        assert_eq!(stolen.playing_id, 100);
        assert_eq!(alloc.slot, 0);
    }

    #[test]
    fn test_no_qualifying_victim_drops() {
        let mut pool = VoicePool::new(2, 0);
        occupy(&mut pool, 0, soniq_core::PRIORITY_CRITICAL, 0.0);
        occupy(&mut pool, 1, soniq_core::PRIORITY_CRITICAL, 1.0);

        assert!(
            pool.allocate(128, StealPolicy::LowestPriority, &Position::ORIGIN)
                .is_none()
        );
    }

    #[test]
    fn test_oldest_steal() {
        let mut pool = VoicePool::new(2, 0);
        occupy(&mut pool, 0, 128, 5.0);
        occupy(&mut pool, 1, 128, 2.0);

        let alloc = pool
            .allocate(128, StealPolicy::Oldest, &Position::ORIGIN)
            .unwrap();
        assert_eq!(alloc.slot, 1);
    }

    #[test]
    fn test_furthest_degrades_to_oldest_without_positions() {
        let mut pool = VoicePool::new(2, 0);
        occupy(&mut pool, 0, 128, 5.0);
        occupy(&mut pool, 1, 128, 2.0);

        let alloc = pool
            .allocate(128, StealPolicy::Furthest, &Position::ORIGIN)
            .unwrap();
        assert_eq!(alloc.slot, 1);
    }

    #[test]
    fn test_furthest_picks_largest_distance() {
        let mut pool = VoicePool::new(2, 0);
        occupy(&mut pool, 0, 128, 0.0);
        occupy(&mut pool, 1, 128, 1.0);
        pool.get_mut(0).unwrap().position = Some(Position::new(5.0, 0.0, 0.0));
        pool.get_mut(1).unwrap().position = Some(Position::new(50.0, 0.0, 0.0));

        let alloc = pool
            .allocate(128, StealPolicy::Furthest, &Position::ORIGIN)
            .unwrap();
        assert_eq!(alloc.slot, 1);
    }

    #[test]
    fn test_release_recycles() {
        let mut pool = VoicePool::new(1, 0);
        occupy(&mut pool, 0, 128, 0.0);
        assert_eq!(pool.live_count(), 1);
        pool.release(0);
        assert_eq!(pool.live_count(), 0);
        assert!(
            pool.allocate(128, StealPolicy::Oldest, &Position::ORIGIN)
                .unwrap()
                .stolen
                .is_none()
        );
    }

    #[test]
    fn test_importance_scales_with_distance() {
        let mut pool = VoicePool::new(2, 0);
        occupy(&mut pool, 0, 255, 0.0);
        let v = pool.get_mut(0).unwrap();
        v.position = Some(Position::new(50.0, 0.0, 0.0));
        v.max_distance = 100.0;
        let near = Position::ORIGIN;
        let imp = pool.get(0).unwrap().importance(&near);
        assert!((imp - 0.5).abs() < 1e-5);
    }
}

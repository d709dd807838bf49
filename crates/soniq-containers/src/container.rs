//! Container definitions and per-variant selection state.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use soniq_core::{ClipId, ContainerId};
use std::collections::HashMap;

use crate::curve::BlendCurve;

// ═══════════════════════════════════════════════════════════════════════════════
// CLIP ENTRY
// ═══════════════════════════════════════════════════════════════════════════════

/// One playable clip assignment inside a container
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClipEntry {
    pub clip: ClipId,
    /// Per-entry gain multiplier (0.0 – 2.0, 1.0 = unity)
    pub gain: f32,
    pub looped: bool,
}

impl ClipEntry {
    pub fn new(clip: ClipId) -> Self {
        Self {
            clip,
            gain: 1.0,
            looped: false,
        }
    }

    pub fn with_gain(mut self, gain: f32) -> Self {
        self.gain = gain.max(0.0);
        self
    }

    pub fn looping(mut self) -> Self {
        self.looped = true;
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// VARIANT PAYLOADS
// ═══════════════════════════════════════════════════════════════════════════════

/// Routing container — plays every assigned clip at once
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingContainer {
    pub id: ContainerId,
    pub name: String,
    pub clips: Vec<ClipEntry>,
}

impl RoutingContainer {
    pub fn new(id: ContainerId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            clips: Vec::new(),
        }
    }

    pub fn add_clip(&mut self, entry: ClipEntry) {
        self.clips.push(entry);
    }
}

/// Random container child: clip plus selection weight and variation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomClip {
    pub entry: ClipEntry,
    /// Selection weight, 0.0 – 10.0
    pub weight: f32,
    /// Pitch variation range in semitones
    pub pitch_min: f32,
    pub pitch_max: f32,
}

impl RandomClip {
    pub fn new(clip: ClipId) -> Self {
        Self {
            entry: ClipEntry::new(clip),
            weight: 1.0,
            pitch_min: 0.0,
            pitch_max: 0.0,
        }
    }

    pub fn with_weight(mut self, weight: f32) -> Self {
        self.weight = weight.clamp(0.0, 10.0);
        self
    }

    pub fn with_pitch_variation(mut self, min: f32, max: f32) -> Self {
        self.pitch_min = min;
        self.pitch_max = max;
        self
    }
}

/// Random container — weighted sampling avoiding the last *k* picks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomContainer {
    pub id: ContainerId,
    pub name: String,
    pub children: Vec<RandomClip>,
    /// How many recent picks to exclude (0 – 10)
    pub avoid_repeat_last: u8,
}

impl RandomContainer {
    pub fn new(id: ContainerId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            children: Vec::new(),
            avoid_repeat_last: 1,
        }
    }

    pub fn with_avoid_repeat(mut self, k: u8) -> Self {
        self.avoid_repeat_last = k.min(10);
        self
    }

    pub fn add_child(&mut self, child: RandomClip) {
        self.children.push(child);
    }

    pub fn total_weight(&self) -> f32 {
        self.children.iter().map(|c| c.weight).sum()
    }
}

/// Sequence advance policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum SequenceMode {
    /// 0,1,2,…,n-1, wrap to 0
    #[default]
    Forward = 0,
    /// n-1,…,1,0, wrap to n-1
    Reverse = 1,
    /// Bounce at both ends without repeating the boundary index
    PingPong = 2,
    /// Uniform pick, independent of the previous index
    Random = 3,
}

/// Sequence container — ordered entries with an advancing cursor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceContainer {
    pub id: ContainerId,
    pub name: String,
    pub entries: Vec<ClipEntry>,
    pub mode: SequenceMode,
}

impl SequenceContainer {
    pub fn new(id: ContainerId, name: impl Into<String>, mode: SequenceMode) -> Self {
        Self {
            id,
            name: name.into(),
            entries: Vec::new(),
            mode,
        }
    }

    pub fn add_entry(&mut self, entry: ClipEntry) {
        self.entries.push(entry);
    }
}

/// Switch container — exact-match mapping from a switch group value to a
/// child container, with a configured default for unset/unknown values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchContainer {
    pub id: ContainerId,
    pub name: String,
    /// Switch group consulted in the control plane
    pub group: String,
    /// Exact-match table: switch value → child container
    pub entries: HashMap<String, ContainerId>,
    /// Fallback child when the group is unset or unmatched
    pub default_child: Option<ContainerId>,
}

impl SwitchContainer {
    pub fn new(id: ContainerId, name: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            group: group.into(),
            entries: HashMap::new(),
            default_child: None,
        }
    }

    pub fn map(mut self, value: impl Into<String>, child: ContainerId) -> Self {
        self.entries.insert(value.into(), child);
        self
    }

    pub fn with_default(mut self, child: ContainerId) -> Self {
        self.default_child = Some(child);
        self
    }
}

/// Blend child: a container whose gain tracks an RTPC through a curve
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlendChild {
    pub container: ContainerId,
    pub curve: BlendCurve,
}

/// Blend container — all children play; each child's gain is driven by
/// the named RTPC evaluated against its curve on every scheduler tick
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlendContainer {
    pub id: ContainerId,
    pub name: String,
    /// RTPC consulted in the control plane
    pub rtpc: String,
    pub children: Vec<BlendChild>,
}

impl BlendContainer {
    pub fn new(id: ContainerId, name: impl Into<String>, rtpc: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            rtpc: rtpc.into(),
            children: Vec::new(),
        }
    }

    pub fn add_child(&mut self, container: ContainerId, curve: BlendCurve) {
        self.children.push(BlendChild { container, curve });
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONTAINER UNION
// ═══════════════════════════════════════════════════════════════════════════════

/// Tagged union over the five container variants
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Container {
    Routing(RoutingContainer),
    Random(RandomContainer),
    Sequence(SequenceContainer),
    Switch(SwitchContainer),
    Blend(BlendContainer),
}

impl Container {
    pub fn id(&self) -> ContainerId {
        match self {
            Container::Routing(c) => c.id,
            Container::Random(c) => c.id,
            Container::Sequence(c) => c.id,
            Container::Switch(c) => c.id,
            Container::Blend(c) => c.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Container::Routing(c) => &c.name,
            Container::Random(c) => &c.name,
            Container::Sequence(c) => &c.name,
            Container::Switch(c) => &c.name,
            Container::Blend(c) => &c.name,
        }
    }

    /// Fresh selection state for this variant
    pub fn initial_state(&self) -> ContainerState {
        match self {
            Container::Random(c) => {
                ContainerState::Random(RandomState::new(c.avoid_repeat_last as usize))
            }
            Container::Sequence(c) => ContainerState::Sequence(SequenceState::new(c.mode)),
            _ => ContainerState::Stateless,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SELECTION STATE
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-container mutable selection state
#[derive(Debug, Clone)]
pub enum ContainerState {
    Stateless,
    Random(RandomState),
    Sequence(SequenceState),
}

/// History ring of the last *k* random picks (child indices)
#[derive(Debug, Clone)]
pub struct RandomState {
    capacity: usize,
    history: SmallVec<[usize; 10]>,
}

impl RandomState {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.min(10),
            history: SmallVec::new(),
        }
    }

    /// Recent picks, oldest first
    pub fn history(&self) -> &[usize] {
        &self.history
    }

    /// Record a pick, evicting the oldest once the ring is full
    pub fn record(&mut self, index: usize) {
        if self.capacity == 0 {
            return;
        }
        if self.history.len() >= self.capacity {
            self.history.remove(0);
        }
        self.history.push(index);
    }
}

/// Cursor state for a sequence container
#[derive(Debug, Clone)]
pub struct SequenceState {
    mode: SequenceMode,
    index: usize,
    /// Ping-pong travel direction: +1 or -1
    direction: i32,
}

impl SequenceState {
    pub fn new(mode: SequenceMode) -> Self {
        Self {
            mode,
            index: 0,
            direction: 1,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Reset the cursor to entry 0 (forward direction)
    pub fn reset(&mut self) {
        self.index = 0;
        self.direction = 1;
    }

    /// Jump the cursor to a specific entry
    pub fn jump_to(&mut self, index: usize, len: usize) {
        if len > 0 {
            self.index = index.min(len - 1);
        }
    }

    /// Return the index to play now and advance the cursor.
    pub fn select(&mut self, len: usize, rng: &mut impl rand::Rng) -> Option<usize> {
        if len == 0 {
            return None;
        }
        if len == 1 {
            self.index = 0;
            return Some(0);
        }

        let current = self.index.min(len - 1);
        match self.mode {
            SequenceMode::Forward => {
                self.index = (current + 1) % len;
            }
            SequenceMode::Reverse => {
                self.index = if current == 0 { len - 1 } else { current - 1 };
            }
            SequenceMode::PingPong => {
                let next = current as i32 + self.direction;
                if next < 0 || next >= len as i32 {
                    self.direction = -self.direction;
                }
                self.index = (current as i32 + self.direction) as usize;
            }
            SequenceMode::Random => {
                // Independent uniform draw; the cursor is not consulted
                return Some(rng.random_range(0..len));
            }
        }
        Some(current)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn play_n(state: &mut SequenceState, len: usize, n: usize) -> Vec<usize> {
        let mut rng = StdRng::seed_from_u64(7);
        (0..n).map(|_| state.select(len, &mut rng).unwrap()).collect()
    }

    #[test]
    fn test_forward_wraps() {
        let mut state = SequenceState::new(SequenceMode::Forward);
        assert_eq!(play_n(&mut state, 3, 5), vec![0, 1, 2, 0, 1]);
    }

    #[test]
    fn test_reverse_wraps() {
        let mut state = SequenceState::new(SequenceMode::Reverse);
        // Cursor starts at 0; reverse wraps to the tail
        assert_eq!(play_n(&mut state, 3, 5), vec![0, 2, 1, 0, 2]);
    }

    #[test]
    fn test_ping_pong_no_boundary_repeat() {
        let mut state = SequenceState::new(SequenceMode::PingPong);
        assert_eq!(play_n(&mut state, 4, 7), vec![0, 1, 2, 3, 2, 1, 0]);
        // Continuing bounces back up without repeating 0
        assert_eq!(play_n(&mut state, 4, 3), vec![1, 2, 3]);
    }

    #[test]
    fn test_reset_and_jump() {
        let mut state = SequenceState::new(SequenceMode::Forward);
        play_n(&mut state, 4, 3);
        state.reset();
        assert_eq!(state.index(), 0);

        state.jump_to(2, 4);
        assert_eq!(state.index(), 2);
        // Jump clamps to the last entry
        state.jump_to(99, 4);
        assert_eq!(state.index(), 3);
    }

    #[test]
    fn test_random_mode_in_range() {
        let mut state = SequenceState::new(SequenceMode::Random);
        let picks = play_n(&mut state, 4, 50);
        assert!(picks.iter().all(|&i| i < 4));
    }

    #[test]
    fn test_random_history_ring() {
        let mut state = RandomState::new(2);
        state.record(0);
        state.record(1);
        state.record(2);
        assert_eq!(state.history(), &[1, 2]);
    }

    #[test]
    fn test_zero_capacity_history() {
        let mut state = RandomState::new(0);
        state.record(5);
        assert!(state.history().is_empty());
    }

    #[test]
    fn test_single_entry_sequence() {
        let mut state = SequenceState::new(SequenceMode::PingPong);
        assert_eq!(play_n(&mut state, 1, 3), vec![0, 0, 0]);
    }
}

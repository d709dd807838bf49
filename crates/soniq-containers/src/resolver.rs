//! Container resolution — definitions + control snapshot → play intents.

use rand::Rng;
use serde::{Deserialize, Serialize};
use soniq_core::{ClipId, ContainerId};
use std::collections::HashMap;

use crate::container::{Container, ContainerState, RandomContainer, RandomState};
use crate::curve::BlendCurve;

/// Nested switch/blend chains deeper than this are treated as authoring
/// errors and cut off.
const MAX_RESOLVE_DEPTH: usize = 8;

// ═══════════════════════════════════════════════════════════════════════════════
// PLAY INTENT
// ═══════════════════════════════════════════════════════════════════════════════

/// Continuous gain drive attached to a blend-sourced intent: the voice's
/// rtpc gain factor is re-evaluated from this link every scheduler tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RtpcLink {
    pub rtpc: String,
    pub curve: BlendCurve,
}

/// One concrete "play this clip" outcome of resolving a container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayIntent {
    pub clip: ClipId,
    /// Gain multiplier accumulated through the container chain
    pub gain: f32,
    pub looped: bool,
    /// Pitch offset in semitones (random-container variation)
    pub pitch_semitones: f32,
    /// Present when a blend container drives this intent's gain
    pub rtpc_link: Option<RtpcLink>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONTROL VIEW
// ═══════════════════════════════════════════════════════════════════════════════

/// Read-only view of the control plane consumed during resolution.
pub trait ControlView {
    fn switch_value(&self, group: &str) -> Option<&str>;
    fn rtpc_value(&self, name: &str) -> Option<f32>;
}

impl ControlView for (HashMap<String, String>, HashMap<String, f32>) {
    fn switch_value(&self, group: &str) -> Option<&str> {
        self.0.get(group).map(|s| s.as_str())
    }

    fn rtpc_value(&self, name: &str) -> Option<f32> {
        self.1.get(name).copied()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONTAINER STORE
// ═══════════════════════════════════════════════════════════════════════════════

/// Central table of container definitions.
#[derive(Debug, Default)]
pub struct ContainerStore {
    containers: HashMap<ContainerId, Container>,
}

impl ContainerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, container: Container) {
        self.containers.insert(container.id(), container);
    }

    pub fn remove(&mut self, id: ContainerId) -> Option<Container> {
        self.containers.remove(&id)
    }

    pub fn get(&self, id: ContainerId) -> Option<&Container> {
        self.containers.get(&id)
    }

    pub fn contains(&self, id: ContainerId) -> bool {
        self.containers.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.containers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RESOLUTION
// ═══════════════════════════════════════════════════════════════════════════════

/// Resolve a container reference to zero or more play intents.
///
/// Missing containers and empty variants resolve to no intents with a
/// warning; they are never fatal. Selection state is looked up (or
/// created) in `states` keyed by container id.
pub fn resolve(
    store: &ContainerStore,
    container_id: ContainerId,
    states: &mut HashMap<ContainerId, ContainerState>,
    control: &impl ControlView,
    rng: &mut impl Rng,
) -> Vec<PlayIntent> {
    let mut intents = Vec::new();
    resolve_into(store, container_id, states, control, rng, 0, &mut intents);
    intents
}

fn resolve_into(
    store: &ContainerStore,
    container_id: ContainerId,
    states: &mut HashMap<ContainerId, ContainerState>,
    control: &impl ControlView,
    rng: &mut impl Rng,
    depth: usize,
    out: &mut Vec<PlayIntent>,
) {
    if depth > MAX_RESOLVE_DEPTH {
        log::warn!("[Resolver] container {container_id}: nesting deeper than {MAX_RESOLVE_DEPTH}, cutting off");
        return;
    }

    let Some(container) = store.get(container_id) else {
        log::warn!("[Resolver] container {container_id} not found");
        return;
    };

    match container {
        Container::Routing(c) => {
            if c.clips.is_empty() {
                log::warn!("[Resolver] routing container '{}' is empty", c.name);
            }
            for entry in &c.clips {
                out.push(PlayIntent {
                    clip: entry.clip,
                    gain: entry.gain,
                    looped: entry.looped,
                    pitch_semitones: 0.0,
                    rtpc_link: None,
                });
            }
        }

        Container::Random(c) => {
            let state = states
                .entry(container_id)
                .or_insert_with(|| container.initial_state());
            let ContainerState::Random(random_state) = state else {
                *state = container.initial_state();
                return;
            };
            if let Some(index) = select_random(c, random_state, rng) {
                let child = &c.children[index];
                random_state.record(index);
                let pitch = if child.pitch_max > child.pitch_min {
                    rng.random_range(child.pitch_min..child.pitch_max)
                } else {
                    child.pitch_min
                };
                out.push(PlayIntent {
                    clip: child.entry.clip,
                    gain: child.entry.gain,
                    looped: child.entry.looped,
                    pitch_semitones: pitch,
                    rtpc_link: None,
                });
            } else {
                log::warn!("[Resolver] random container '{}' has no candidates", c.name);
            }
        }

        Container::Sequence(c) => {
            let state = states
                .entry(container_id)
                .or_insert_with(|| container.initial_state());
            let ContainerState::Sequence(seq_state) = state else {
                *state = container.initial_state();
                return;
            };
            if let Some(index) = seq_state.select(c.entries.len(), rng) {
                let entry = &c.entries[index];
                out.push(PlayIntent {
                    clip: entry.clip,
                    gain: entry.gain,
                    looped: entry.looped,
                    pitch_semitones: 0.0,
                    rtpc_link: None,
                });
            } else {
                log::warn!("[Resolver] sequence container '{}' is empty", c.name);
            }
        }

        Container::Switch(c) => {
            let child = control
                .switch_value(&c.group)
                .and_then(|value| c.entries.get(value).copied())
                .or(c.default_child);
            match child {
                Some(child_id) => {
                    resolve_into(store, child_id, states, control, rng, depth + 1, out);
                }
                None => {
                    log::warn!(
                        "[Resolver] switch container '{}': group '{}' unmatched and no default",
                        c.name,
                        c.group
                    );
                }
            }
        }

        Container::Blend(c) => {
            let rtpc_value = control.rtpc_value(&c.rtpc).unwrap_or(0.0);
            for child in &c.children {
                let start = out.len();
                resolve_into(store, child.container, states, control, rng, depth + 1, out);
                let gain = child.curve.evaluate(rtpc_value);
                for intent in &mut out[start..] {
                    // The innermost blend drives the voice live through
                    // its link; outer blends fold in as a static factor.
                    if intent.rtpc_link.is_none() {
                        intent.rtpc_link = Some(RtpcLink {
                            rtpc: c.rtpc.clone(),
                            curve: child.curve.clone(),
                        });
                    } else {
                        intent.gain *= gain;
                    }
                }
            }
        }
    }
}

/// Weighted sampling excluding the last *k* picks. When the exclusion
/// would empty the candidate set it is relaxed, dropping the oldest
/// history entries until at least one candidate remains.
fn select_random(
    container: &RandomContainer,
    state: &mut RandomState,
    rng: &mut impl Rng,
) -> Option<usize> {
    let children = &container.children;
    if children.is_empty() {
        return None;
    }

    let history = state.history();
    // Try the full exclusion first, then progressively forget the
    // oldest entries.
    for skip in 0..=history.len() {
        let excluded = &history[skip..];
        // Zero-weight children are unselectable and stay out of the
        // candidate set; a roll of exactly 0.0 must never land on one
        let candidates: Vec<usize> = (0..children.len())
            .filter(|i| children[*i].weight > 0.0 && !excluded.contains(i))
            .collect();
        if candidates.is_empty() {
            continue;
        }

        let total: f32 = candidates.iter().map(|&i| children[i].weight).sum();
        let mut roll = rng.random_range(0.0..total);
        for &i in &candidates {
            roll -= children[i].weight;
            if roll <= 0.0 {
                return Some(i);
            }
        }
        return candidates.last().copied();
    }
    None
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{
        BlendContainer, ClipEntry, RandomClip, RoutingContainer, SequenceContainer, SequenceMode,
        SwitchContainer,
    };
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    type Control = (HashMap<String, String>, HashMap<String, f32>);

    fn empty_control() -> Control {
        (HashMap::new(), HashMap::new())
    }

    fn resolve_one(
        store: &ContainerStore,
        id: ContainerId,
        states: &mut HashMap<ContainerId, ContainerState>,
        control: &Control,
        rng: &mut StdRng,
    ) -> Vec<PlayIntent> {
        resolve(store, id, states, control, rng)
    }

    #[test]
    fn test_routing_plays_all_layers() {
        let mut store = ContainerStore::new();
        store.insert(Container::Routing(RoutingContainer {
            id: 1,
            name: "Layers".into(),
            clips: vec![
                ClipEntry::new(10).with_gain(0.8),
                ClipEntry::new(11).looping(),
                ClipEntry::new(12),
            ],
        }));

        let mut states = HashMap::new();
        let mut rng = StdRng::seed_from_u64(1);
        let intents = resolve_one(&store, 1, &mut states, &empty_control(), &mut rng);

        assert_eq!(intents.len(), 3);
        assert_eq!(intents[0].clip, 10);
        assert!((intents[0].gain - 0.8).abs() < 1e-6);
        assert!(intents[1].looped);
    }

    #[test]
    fn test_random_avoids_last_pick() {
        let mut store = ContainerStore::new();
        let mut random = crate::container::RandomContainer::new(1, "Steps").with_avoid_repeat(1);
        random.add_child(RandomClip::new(10));
        random.add_child(RandomClip::new(11));
        random.add_child(RandomClip::new(12));
        store.insert(Container::Random(random));

        let mut states = HashMap::new();
        let mut rng = StdRng::seed_from_u64(42);
        let mut last: Option<ClipId> = None;
        for _ in 0..100 {
            let intents = resolve_one(&store, 1, &mut states, &empty_control(), &mut rng);
            assert_eq!(intents.len(), 1);
            if let Some(prev) = last {
                assert_ne!(intents[0].clip, prev, "repeated the previous pick");
            }
            last = Some(intents[0].clip);
        }
    }

    #[test]
    fn test_random_relaxes_exclusion_when_starved() {
        let mut store = ContainerStore::new();
        let mut random = crate::container::RandomContainer::new(1, "Tiny").with_avoid_repeat(10);
        random.add_child(RandomClip::new(10));
        store.insert(Container::Random(random));

        // One child, history would exclude it; exclusion must relax.
        let mut states = HashMap::new();
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..5 {
            let intents = resolve_one(&store, 1, &mut states, &empty_control(), &mut rng);
            assert_eq!(intents.len(), 1);
            assert_eq!(intents[0].clip, 10);
        }
    }

    #[test]
    fn test_random_zero_weight_children_skipped() {
        let mut store = ContainerStore::new();
        let mut random = crate::container::RandomContainer::new(1, "Weighted").with_avoid_repeat(0);
        random.add_child(RandomClip::new(10).with_weight(0.0));
        random.add_child(RandomClip::new(11).with_weight(5.0));
        store.insert(Container::Random(random));

        let mut states = HashMap::new();
        let mut rng = StdRng::seed_from_u64(9);
        for _ in 0..50 {
            let intents = resolve_one(&store, 1, &mut states, &empty_control(), &mut rng);
            assert_eq!(intents[0].clip, 11);
        }
    }

    #[test]
    fn test_sequence_ping_pong_through_resolver() {
        let mut store = ContainerStore::new();
        let mut seq = SequenceContainer::new(1, "Scale", SequenceMode::PingPong);
        for clip in 20..24 {
            seq.add_entry(ClipEntry::new(clip));
        }
        store.insert(Container::Sequence(seq));

        let mut states = HashMap::new();
        let mut rng = StdRng::seed_from_u64(1);
        let picks: Vec<ClipId> = (0..7)
            .map(|_| resolve_one(&store, 1, &mut states, &empty_control(), &mut rng)[0].clip)
            .collect();
        assert_eq!(picks, vec![20, 21, 22, 23, 22, 21, 20]);
    }

    #[test]
    fn test_switch_exact_match_and_default() {
        let mut store = ContainerStore::new();
        store.insert(Container::Routing(RoutingContainer {
            id: 10,
            name: "GrassSteps".into(),
            clips: vec![ClipEntry::new(100)],
        }));
        store.insert(Container::Routing(RoutingContainer {
            id: 11,
            name: "MetalSteps".into(),
            clips: vec![ClipEntry::new(101)],
        }));
        store.insert(Container::Routing(RoutingContainer {
            id: 12,
            name: "DefaultSteps".into(),
            clips: vec![ClipEntry::new(102)],
        }));
        store.insert(Container::Switch(
            SwitchContainer::new(1, "Footsteps", "Surface")
                .map("Grass", 10)
                .map("Metal", 11)
                .with_default(12),
        ));

        let mut states = HashMap::new();
        let mut rng = StdRng::seed_from_u64(1);

        // Unset group → default
        let intents = resolve_one(&store, 1, &mut states, &empty_control(), &mut rng);
        assert_eq!(intents[0].clip, 102);

        // Exact match
        let mut control = empty_control();
        control.0.insert("Surface".into(), "Metal".into());
        let intents = resolve_one(&store, 1, &mut states, &control, &mut rng);
        assert_eq!(intents[0].clip, 101);

        // Unknown value → default, no fuzzy matching
        control.0.insert("Surface".into(), "metal".into());
        let intents = resolve_one(&store, 1, &mut states, &control, &mut rng);
        assert_eq!(intents[0].clip, 102);
    }

    #[test]
    fn test_switch_without_default_resolves_to_nothing() {
        let mut store = ContainerStore::new();
        store.insert(Container::Switch(SwitchContainer::new(1, "Bare", "Surface")));

        let mut states = HashMap::new();
        let mut rng = StdRng::seed_from_u64(1);
        let intents = resolve_one(&store, 1, &mut states, &empty_control(), &mut rng);
        assert!(intents.is_empty());
    }

    #[test]
    fn test_blend_drives_child_gains() {
        let mut store = ContainerStore::new();
        store.insert(Container::Routing(RoutingContainer {
            id: 10,
            name: "Calm".into(),
            clips: vec![ClipEntry::new(100).looping()],
        }));
        store.insert(Container::Routing(RoutingContainer {
            id: 11,
            name: "Intense".into(),
            clips: vec![ClipEntry::new(101).looping()],
        }));
        let mut blend = BlendContainer::new(1, "Tension", "Intensity");
        blend.add_child(10, BlendCurve::ramp_down(0.0, 1.0));
        blend.add_child(11, BlendCurve::ramp_up(0.0, 1.0));
        store.insert(Container::Blend(blend));

        let mut states = HashMap::new();
        let mut rng = StdRng::seed_from_u64(1);
        let mut control = empty_control();
        control.1.insert("Intensity".into(), 0.25);

        let intents = resolve_one(&store, 1, &mut states, &control, &mut rng);
        assert_eq!(intents.len(), 2);
        // Static gains stay at the clip entry value; the live drive
        // comes from the attached links
        assert!(intents.iter().all(|i| (i.gain - 1.0).abs() < 1e-6));
        let links: Vec<_> = intents.iter().map(|i| i.rtpc_link.as_ref().unwrap()).collect();
        assert!(links.iter().all(|l| l.rtpc == "Intensity"));
        assert!((links[0].curve.evaluate(0.25) - 0.75).abs() < 1e-5);
        assert!((links[1].curve.evaluate(0.25) - 0.25).abs() < 1e-5);
    }

    #[test]
    fn test_missing_container_is_not_fatal() {
        let store = ContainerStore::new();
        let mut states = HashMap::new();
        let mut rng = StdRng::seed_from_u64(1);
        let intents = resolve_one(&store, 99, &mut states, &empty_control(), &mut rng);
        assert!(intents.is_empty());
    }
}

//! Bus graph — arena-backed mixing tree.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use soniq_core::{BusId, Decibels, EngineError, EngineResult, MASTER_BUS, db_to_linear};

use crate::ducking::{DuckEnvelope, DuckSettings};

// ═══════════════════════════════════════════════════════════════════════════════
// BUS DEFINITION
// ═══════════════════════════════════════════════════════════════════════════════

/// Named effect send carried by a bus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectSend {
    pub name: String,
    /// Send level, 0.0–1.0
    pub level: f32,
}

/// Immutable authoring data for one bus.
///
/// The parent is an arena index; only the master bus (id 0) has none.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusDefinition {
    pub id: BusId,
    pub name: String,
    pub parent: Option<BusId>,
    pub volume: Decibels,
    pub mute: bool,
    pub solo: bool,
    pub ducking: Option<DuckSettings>,
    pub effect_sends: Vec<EffectSend>,
}

impl BusDefinition {
    pub fn new(id: BusId, name: impl Into<String>, parent: BusId) -> Self {
        Self {
            id,
            name: name.into(),
            parent: Some(parent),
            volume: Decibels::ZERO,
            mute: false,
            solo: false,
            ducking: None,
            effect_sends: Vec::new(),
        }
    }

    pub fn with_volume_db(mut self, db: f32) -> Self {
        self.volume = Decibels(db);
        self
    }

    pub fn with_ducking(mut self, settings: DuckSettings) -> Self {
        self.ducking = Some(settings);
        self
    }

    pub fn with_send(mut self, name: impl Into<String>, level: f32) -> Self {
        self.effect_sends.push(EffectSend {
            name: name.into(),
            level: level.clamp(0.0, 1.0),
        });
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BUS NODE (runtime)
// ═══════════════════════════════════════════════════════════════════════════════

/// In-flight decibel-space volume ramp
#[derive(Debug, Clone)]
struct VolumeTransition {
    from_db: f32,
    to_db: f32,
    elapsed: f32,
    duration: f32,
}

#[derive(Debug)]
struct BusNode {
    name: String,
    parent: Option<BusId>,
    volume_db: f32,
    /// Cached linear multiplier for `volume_db`
    linear: f32,
    mute: bool,
    solo: bool,
    ducking: Option<DuckSettings>,
    duck_env: Option<DuckEnvelope>,
    effect_sends: Vec<EffectSend>,
    transition: Option<VolumeTransition>,
}

impl BusNode {
    fn set_volume_db(&mut self, db: f32) {
        self.volume_db = db;
        self.linear = db_to_linear(db);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BUS GRAPH
// ═══════════════════════════════════════════════════════════════════════════════

/// Arena of mixing buses. Index 0 is always the master bus.
pub struct BusGraph {
    nodes: Vec<Option<BusNode>>,
}

impl BusGraph {
    /// Create a graph containing only the master bus.
    pub fn new() -> Self {
        let master = BusNode {
            name: "Master".to_string(),
            parent: None,
            volume_db: 0.0,
            linear: 1.0,
            mute: false,
            solo: false,
            ducking: None,
            duck_env: None,
            effect_sends: Vec::new(),
            transition: None,
        };
        Self {
            nodes: vec![Some(master)],
        }
    }

    /// Insert a bus from its definition.
    ///
    /// The parent must already exist, so the tree is acyclic by
    /// construction. Re-inserting an existing id is rejected.
    pub fn add_bus(&mut self, def: BusDefinition) -> EngineResult<()> {
        if def.id != MASTER_BUS && def.parent.is_none() {
            return Err(EngineError::InvalidParam(format!(
                "bus {} ({}) has no parent",
                def.id, def.name
            )));
        }
        if let Some(parent) = def.parent {
            if !self.contains(parent) {
                return Err(EngineError::BusNotFound(parent));
            }
        }

        let idx = def.id as usize;
        if idx < self.nodes.len() && self.nodes[idx].is_some() {
            return Err(EngineError::InvalidParam(format!(
                "bus id {} already in use",
                def.id
            )));
        }
        if idx >= self.nodes.len() {
            self.nodes.resize_with(idx + 1, || None);
        }

        self.nodes[idx] = Some(BusNode {
            name: def.name,
            parent: def.parent,
            volume_db: def.volume.0,
            linear: def.volume.to_linear(),
            mute: def.mute,
            solo: def.solo,
            ducking: def.ducking,
            duck_env: None,
            effect_sends: def.effect_sends,
            transition: None,
        });
        Ok(())
    }

    #[inline]
    pub fn contains(&self, bus: BusId) -> bool {
        self.nodes
            .get(bus as usize)
            .is_some_and(|slot| slot.is_some())
    }

    fn node(&self, bus: BusId) -> Option<&BusNode> {
        self.nodes.get(bus as usize).and_then(|slot| slot.as_ref())
    }

    fn node_mut(&mut self, bus: BusId) -> Option<&mut BusNode> {
        self.nodes
            .get_mut(bus as usize)
            .and_then(|slot| slot.as_mut())
    }

    pub fn bus_name(&self, bus: BusId) -> Option<&str> {
        self.node(bus).map(|n| n.name.as_str())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // GAIN RESOLUTION
    // ═══════════════════════════════════════════════════════════════════════════

    /// Effective linear gain of a bus: the product of its own volume and
    /// every ancestor's, zero if any node on the chain is muted or the
    /// bus fails the solo rule.
    pub fn resolve(&self, bus: BusId) -> f32 {
        if !self.contains(bus) {
            log::warn!("[BusGraph] resolve on unknown bus {bus}");
            return 0.0;
        }

        if self.solo_active() && !self.passes_solo(bus) {
            return 0.0;
        }

        let mut gain = 1.0;
        let mut current = Some(bus);
        while let Some(id) = current {
            let node = match self.node(id) {
                Some(n) => n,
                None => return 0.0,
            };
            if node.mute {
                return 0.0;
            }
            gain *= node.linear;
            current = node.parent;
        }
        gain
    }

    /// True if any bus in the graph is solo-marked.
    pub fn solo_active(&self) -> bool {
        self.nodes
            .iter()
            .flatten()
            .any(|n| n.solo)
    }

    /// Solo rule: a bus passes audio if it is solo-marked itself or is an
    /// ancestor of a solo-marked bus.
    fn passes_solo(&self, bus: BusId) -> bool {
        for (id, node) in self.nodes.iter().enumerate() {
            let Some(node) = node else { continue };
            if node.solo && self.is_ancestor_or_self(bus, id as BusId) {
                return true;
            }
        }
        false
    }

    /// True if `ancestor` is on the parent chain of `bus` (or equal to it).
    pub fn is_ancestor_or_self(&self, ancestor: BusId, bus: BusId) -> bool {
        let mut current = Some(bus);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.node(id).and_then(|n| n.parent);
        }
        false
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // VOLUME / MUTE / SOLO
    // ═══════════════════════════════════════════════════════════════════════════

    /// Set bus volume. Zero transition applies immediately; otherwise a
    /// decibel-space ramp is registered and advanced by `tick`.
    pub fn set_volume(&mut self, bus: BusId, db: f32, transition_secs: f32) {
        let Some(node) = self.node_mut(bus) else {
            log::warn!("[BusGraph] set_volume on unknown bus {bus}");
            return;
        };
        if transition_secs <= 0.0 {
            node.set_volume_db(db);
            node.transition = None;
        } else {
            node.transition = Some(VolumeTransition {
                from_db: node.volume_db,
                to_db: db,
                elapsed: 0.0,
                duration: transition_secs,
            });
        }
    }

    pub fn volume_db(&self, bus: BusId) -> Option<f32> {
        self.node(bus).map(|n| n.volume_db)
    }

    pub fn set_mute(&mut self, bus: BusId, mute: bool) {
        if let Some(node) = self.node_mut(bus) {
            node.mute = mute;
        }
    }

    pub fn set_solo(&mut self, bus: BusId, solo: bool) {
        if let Some(node) = self.node_mut(bus) {
            node.solo = solo;
        }
    }

    pub fn set_send_level(&mut self, bus: BusId, send: &str, level: f32) {
        let Some(node) = self.node_mut(bus) else { return };
        if let Some(s) = node.effect_sends.iter_mut().find(|s| s.name == send) {
            s.level = level.clamp(0.0, 1.0);
        } else {
            log::warn!("[BusGraph] unknown send '{send}' on bus {bus}");
        }
    }

    pub fn send_level(&self, bus: BusId, send: &str) -> Option<f32> {
        self.node(bus)?
            .effect_sends
            .iter()
            .find(|s| s.name == send)
            .map(|s| s.level)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // DUCKING
    // ═══════════════════════════════════════════════════════════════════════════

    /// Arm the duck configured on `bus` (no-op if it has none).
    pub fn trigger_duck(&mut self, bus: BusId) {
        let Some(node) = self.node_mut(bus) else { return };
        let Some(settings) = node.ducking.clone() else {
            log::warn!("[BusGraph] trigger_duck on bus {bus} with no duck config");
            return;
        };
        node.duck_env
            .get_or_insert_with(|| DuckEnvelope::new(settings))
            .trigger();
    }

    /// Release one trigger of the duck on `bus`.
    pub fn release_duck(&mut self, bus: BusId) {
        if let Some(env) = self.node_mut(bus).and_then(|n| n.duck_env.as_mut()) {
            env.release();
        }
    }

    /// Combined duck multiplier affecting `bus`: the product of every
    /// active envelope whose target set contains `bus` or one of its
    /// ancestors (voices on a ducked bus's subtree are all ducked).
    pub fn duck_gain(&self, bus: BusId) -> f32 {
        let mut gain = 1.0;
        for node in self.nodes.iter().flatten() {
            let Some(env) = &node.duck_env else { continue };
            if env.is_idle() {
                continue;
            }
            let targeted = env
                .settings()
                .targets
                .iter()
                .any(|&t| self.is_ancestor_or_self(t, bus));
            if targeted {
                gain *= env.gain();
            }
        }
        gain
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // TICK
    // ═══════════════════════════════════════════════════════════════════════════

    /// Advance volume transitions and duck envelopes.
    pub fn tick(&mut self, dt: f32) {
        for node in self.nodes.iter_mut().flatten() {
            if let Some(tr) = &mut node.transition {
                tr.elapsed += dt;
                if tr.elapsed >= tr.duration {
                    let target = tr.to_db;
                    node.transition = None;
                    node.set_volume_db(target);
                } else {
                    let t = tr.elapsed / tr.duration;
                    let db = tr.from_db + (tr.to_db - tr.from_db) * t;
                    node.set_volume_db(db);
                }
            }

            if let Some(env) = &mut node.duck_env {
                env.tick(dt);
                if env.is_idle() {
                    node.duck_env = None;
                }
            }
        }
    }

    /// Buses currently in the graph (debug/teardown)
    pub fn bus_ids(&self) -> SmallVec<[BusId; 16]> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(id, slot)| slot.as_ref().map(|_| id as BusId))
            .collect()
    }
}

impl Default for BusGraph {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn graph() -> BusGraph {
        let mut g = BusGraph::new();
        g.add_bus(BusDefinition::new(1, "SFX", MASTER_BUS).with_volume_db(-3.0))
            .unwrap();
        g.add_bus(BusDefinition::new(2, "Weapon", 1).with_volume_db(-6.0))
            .unwrap();
        g.add_bus(BusDefinition::new(3, "Music", MASTER_BUS))
            .unwrap();
        g
    }

    #[test]
    fn test_chain_gain() {
        let g = graph();
        // Master(0dB) → SFX(-3dB) → Weapon(-6dB) ≈ 0.355
        assert_relative_eq!(g.resolve(2), 0.355, epsilon = 1e-3);
        assert_relative_eq!(g.resolve(0), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_mute_short_circuits() {
        let mut g = graph();
        g.set_mute(1, true);
        assert_eq!(g.resolve(2), 0.0);
        assert_eq!(g.resolve(1), 0.0);
        // Sibling unaffected
        assert!(g.resolve(3) > 0.0);
    }

    #[test]
    fn test_solo_rule() {
        let mut g = graph();
        g.set_solo(2, true);

        // Soloed bus and its ancestors pass
        assert!(g.resolve(2) > 0.0);
        assert!(g.resolve(1) > 0.0);
        assert!(g.resolve(0) > 0.0);
        // Non-ancestor is silenced
        assert_eq!(g.resolve(3), 0.0);

        g.set_solo(2, false);
        assert!(g.resolve(3) > 0.0);
    }

    #[test]
    fn test_missing_parent_rejected() {
        let mut g = BusGraph::new();
        let err = g.add_bus(BusDefinition::new(5, "Orphan", 99));
        assert!(matches!(err, Err(EngineError::BusNotFound(99))));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut g = graph();
        assert!(g.add_bus(BusDefinition::new(1, "Dup", MASTER_BUS)).is_err());
    }

    #[test]
    fn test_volume_transition() {
        let mut g = graph();
        g.set_volume(3, -12.0, 1.0);
        assert_relative_eq!(g.volume_db(3).unwrap(), 0.0, epsilon = 1e-6);

        g.tick(0.5);
        assert_relative_eq!(g.volume_db(3).unwrap(), -6.0, epsilon = 1e-4);

        g.tick(0.6);
        assert_relative_eq!(g.volume_db(3).unwrap(), -12.0, epsilon = 1e-4);
    }

    #[test]
    fn test_immediate_volume() {
        let mut g = graph();
        g.set_volume(3, -6.0, 0.0);
        assert_relative_eq!(g.resolve(3), db_to_linear(-6.0), epsilon = 1e-5);
    }

    #[test]
    fn test_duck_targets_subtree() {
        let mut g = BusGraph::new();
        g.add_bus(
            BusDefinition::new(1, "VO", MASTER_BUS)
                .with_ducking(DuckSettings::new([2], -12.0).with_times(0.0, 0.0, 0.1)),
        )
        .unwrap();
        g.add_bus(BusDefinition::new(2, "Music", MASTER_BUS)).unwrap();
        g.add_bus(BusDefinition::new(3, "MusicLayers", 2)).unwrap();

        g.trigger_duck(1);
        g.tick(0.01);

        let floor = db_to_linear(-12.0);
        // Target bus and its descendants are ducked
        assert_relative_eq!(g.duck_gain(2), floor, epsilon = 1e-5);
        assert_relative_eq!(g.duck_gain(3), floor, epsilon = 1e-5);
        // Unrelated bus is not
        assert_relative_eq!(g.duck_gain(1), 1.0, epsilon = 1e-6);

        g.release_duck(1);
        for _ in 0..20 {
            g.tick(0.01);
        }
        assert_relative_eq!(g.duck_gain(2), 1.0, epsilon = 1e-5);
    }
}

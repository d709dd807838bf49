//! Control plane — switches, RTPCs and states
//!
//! Process-wide (per engine context) parameter store. Switches are
//! discrete last-write-wins values, RTPCs are continuous floats with
//! optional timed transitions consumed by the scheduler tick, states are
//! named bundles of bus-volume/switch/RTPC/send deltas with at most one
//! active state per state group.
//!
//! Listeners are invoked synchronously from the owning tick, never from
//! an arbitrary thread.

use serde::{Deserialize, Serialize};
use soniq_core::{BusId, StateId};
use soniq_mix::BusGraph;
use std::collections::{HashMap, HashSet};

// ═══════════════════════════════════════════════════════════════════════════════
// RTPC
// ═══════════════════════════════════════════════════════════════════════════════

/// RTPC registration: name, range and default
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RtpcDefinition {
    pub name: String,
    pub min: f32,
    pub max: f32,
    pub default: f32,
}

impl RtpcDefinition {
    pub fn new(name: impl Into<String>, min: f32, max: f32, default: f32) -> Self {
        Self {
            name: name.into(),
            min,
            max,
            default: default.clamp(min, max),
        }
    }

    /// Convenience for the common normalized parameter
    pub fn normalized(name: impl Into<String>) -> Self {
        Self::new(name, 0.0, 1.0, 0.0)
    }
}

/// Live RTPC value with an optional linear-in-time transition
#[derive(Debug, Clone)]
struct RtpcValue {
    current: f32,
    target: f32,
    /// Remaining transition time; 0 = settled
    remaining: f32,
}

impl RtpcValue {
    fn new(value: f32) -> Self {
        Self {
            current: value,
            target: value,
            remaining: 0.0,
        }
    }

    fn set(&mut self, value: f32) -> bool {
        let changed = self.current != value || self.remaining > 0.0;
        self.current = value;
        self.target = value;
        self.remaining = 0.0;
        changed
    }

    fn transition_to(&mut self, target: f32, duration: f32) {
        if duration <= 0.0 {
            self.set(target);
            return;
        }
        self.target = target;
        self.remaining = duration;
    }

    /// Advance; returns true when the value moved this tick
    fn tick(&mut self, dt: f32) -> bool {
        if self.remaining <= 0.0 {
            return false;
        }
        if dt >= self.remaining {
            self.current = self.target;
            self.remaining = 0.0;
        } else {
            let step = (self.target - self.current) * (dt / self.remaining);
            self.current += step;
            self.remaining -= dt;
        }
        true
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// STATES
// ═══════════════════════════════════════════════════════════════════════════════

/// A named bundle of coordinated parameter deltas; one active per group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateDefinition {
    pub id: StateId,
    pub name: String,
    pub group: String,
    /// Target bus volumes in decibels
    pub bus_volumes: Vec<(BusId, f32)>,
    /// Switch values set on activation (immediate, per switch mechanics)
    pub switches: Vec<(String, String)>,
    /// RTPC targets, linearly interpolated over the transition
    pub rtpcs: Vec<(String, f32)>,
    /// Effect send levels, linearly interpolated
    pub sends: Vec<(BusId, String, f32)>,
}

impl StateDefinition {
    pub fn new(id: StateId, name: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            group: group.into(),
            bus_volumes: Vec::new(),
            switches: Vec::new(),
            rtpcs: Vec::new(),
            sends: Vec::new(),
        }
    }

    pub fn with_bus_volume(mut self, bus: BusId, db: f32) -> Self {
        self.bus_volumes.push((bus, db));
        self
    }

    pub fn with_switch(mut self, group: impl Into<String>, value: impl Into<String>) -> Self {
        self.switches.push((group.into(), value.into()));
        self
    }

    pub fn with_rtpc(mut self, name: impl Into<String>, value: f32) -> Self {
        self.rtpcs.push((name.into(), value));
        self
    }

    pub fn with_send(mut self, bus: BusId, send: impl Into<String>, level: f32) -> Self {
        self.sends.push((bus, send.into(), level));
        self
    }
}

/// Bus-graph mutation produced by a state change, applied by the engine
#[derive(Debug, Clone, PartialEq)]
pub enum StateOp {
    BusVolume {
        bus: BusId,
        db: f32,
        transition_secs: f32,
    },
    SendLevel {
        bus: BusId,
        send: String,
        level: f32,
    },
}

/// Baselines captured at activation, restored on deactivation
#[derive(Debug, Clone)]
struct ActiveState {
    state: StateId,
    saved_bus_volumes: Vec<(BusId, f32)>,
    saved_switches: Vec<(String, Option<String>)>,
    saved_rtpcs: Vec<(String, f32)>,
    saved_sends: Vec<(BusId, String, f32)>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// LISTENERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Token returned by a subscription; pass it back to unsubscribe
pub type SubscriptionId = u64;

type RtpcListener = Box<dyn FnMut(&str, f32) + Send>;
type SwitchListener = Box<dyn FnMut(&str, &str) + Send>;

struct Listeners<F> {
    entries: Vec<(SubscriptionId, F)>,
    next_id: SubscriptionId,
}

impl<F> Listeners<F> {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 1,
        }
    }

    fn subscribe(&mut self, listener: F) -> SubscriptionId {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push((id, listener));
        id
    }

    fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(sid, _)| *sid != id);
        self.entries.len() != before
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONTROL PLANE
// ═══════════════════════════════════════════════════════════════════════════════

pub struct ControlPlane {
    switches: HashMap<String, String>,
    rtpc_definitions: HashMap<String, RtpcDefinition>,
    rtpcs: HashMap<String, RtpcValue>,
    states: HashMap<StateId, StateDefinition>,
    /// group → currently active state
    active_states: HashMap<String, ActiveState>,
    rtpc_listeners: Listeners<RtpcListener>,
    switch_listeners: Listeners<SwitchListener>,
    /// Unknown names already reported, so each is warned once
    warned_names: HashSet<String>,
}

impl Default for ControlPlane {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlPlane {
    pub fn new() -> Self {
        Self {
            switches: HashMap::new(),
            rtpc_definitions: HashMap::new(),
            rtpcs: HashMap::new(),
            states: HashMap::new(),
            active_states: HashMap::new(),
            rtpc_listeners: Listeners::new(),
            switch_listeners: Listeners::new(),
            warned_names: HashSet::new(),
        }
    }

    fn warn_once(&mut self, kind: &str, name: &str) {
        if self.warned_names.insert(format!("{kind}:{name}")) {
            log::warn!("[Control] unknown {kind} '{name}' ignored");
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // REGISTRATION
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn register_rtpc(&mut self, def: RtpcDefinition) {
        self.rtpcs
            .insert(def.name.clone(), RtpcValue::new(def.default));
        self.rtpc_definitions.insert(def.name.clone(), def);
    }

    pub fn register_state(&mut self, def: StateDefinition) {
        self.states.insert(def.id, def);
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // SWITCHES
    // ═══════════════════════════════════════════════════════════════════════════

    /// Set a switch group value. Writing the current value again is a
    /// no-op: no store write, no listener notification.
    pub fn set_switch(&mut self, group: &str, value: &str) -> bool {
        if self.switches.get(group).map(|v| v.as_str()) == Some(value) {
            return false;
        }
        self.switches.insert(group.to_string(), value.to_string());
        for (_, listener) in &mut self.switch_listeners.entries {
            listener(group, value);
        }
        true
    }

    pub fn switch(&self, group: &str) -> Option<&str> {
        self.switches.get(group).map(|v| v.as_str())
    }

    pub fn subscribe_switch(
        &mut self,
        listener: impl FnMut(&str, &str) + Send + 'static,
    ) -> SubscriptionId {
        self.switch_listeners.subscribe(Box::new(listener))
    }

    pub fn unsubscribe_switch(&mut self, id: SubscriptionId) -> bool {
        self.switch_listeners.unsubscribe(id)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // RTPCS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Immediate write; value clamps to the registered range
    pub fn set_rtpc(&mut self, name: &str, value: f32) {
        let Some(def) = self.rtpc_definitions.get(name) else {
            self.warn_once("rtpc", name);
            return;
        };
        let clamped = value.clamp(def.min, def.max);
        let Some(slot) = self.rtpcs.get_mut(name) else {
            return;
        };
        if slot.set(clamped) {
            for (_, listener) in &mut self.rtpc_listeners.entries {
                listener(name, clamped);
            }
        }
    }

    /// Register a linear interpolation toward `target` over `duration`
    pub fn transition_rtpc(&mut self, name: &str, target: f32, duration: f32) {
        let Some(def) = self.rtpc_definitions.get(name) else {
            self.warn_once("rtpc", name);
            return;
        };
        let clamped = target.clamp(def.min, def.max);
        if duration <= 0.0 {
            self.set_rtpc(name, clamped);
            return;
        }
        if let Some(slot) = self.rtpcs.get_mut(name) {
            slot.transition_to(clamped, duration);
        }
    }

    pub fn rtpc(&self, name: &str) -> Option<f32> {
        self.rtpcs.get(name).map(|v| v.current)
    }

    pub fn subscribe_rtpc(
        &mut self,
        listener: impl FnMut(&str, f32) + Send + 'static,
    ) -> SubscriptionId {
        self.rtpc_listeners.subscribe(Box::new(listener))
    }

    pub fn unsubscribe_rtpc(&mut self, id: SubscriptionId) -> bool {
        self.rtpc_listeners.unsubscribe(id)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // STATES
    // ═══════════════════════════════════════════════════════════════════════════

    /// Activate a state, deactivating the previous state in its group.
    ///
    /// Switch and RTPC deltas are applied internally; returned ops carry
    /// the bus-graph mutations for the engine to apply. Deactivation
    /// reverts the old state's deltas to the baselines captured when it
    /// was activated, using the same transition mechanics.
    pub fn activate_state(
        &mut self,
        state: StateId,
        transition_secs: f32,
        graph: &BusGraph,
    ) -> Vec<StateOp> {
        let Some(def) = self.states.get(&state).cloned() else {
            self.warn_once("state", &state.to_string());
            return Vec::new();
        };

        let mut ops = Vec::new();

        if let Some(previous) = self.active_states.remove(&def.group) {
            if previous.state == state {
                // Re-activating the active state is a no-op
                self.active_states.insert(def.group.clone(), previous);
                return Vec::new();
            }
            self.revert(previous, transition_secs, &mut ops);
        }

        // Capture baselines for later reversion
        let active = ActiveState {
            state,
            saved_bus_volumes: def
                .bus_volumes
                .iter()
                .filter_map(|(bus, _)| graph.volume_db(*bus).map(|db| (*bus, db)))
                .collect(),
            saved_switches: def
                .switches
                .iter()
                .map(|(group, _)| (group.clone(), self.switches.get(group).cloned()))
                .collect(),
            saved_rtpcs: def
                .rtpcs
                .iter()
                .filter_map(|(name, _)| self.rtpc(name).map(|v| (name.clone(), v)))
                .collect(),
            saved_sends: def
                .sends
                .iter()
                .filter_map(|(bus, send, _)| {
                    graph.send_level(*bus, send).map(|l| (*bus, send.clone(), l))
                })
                .collect(),
        };

        for (bus, db) in &def.bus_volumes {
            ops.push(StateOp::BusVolume {
                bus: *bus,
                db: *db,
                transition_secs,
            });
        }
        for (group, value) in &def.switches {
            self.set_switch(group, value);
        }
        for (name, value) in &def.rtpcs {
            self.transition_rtpc(name, *value, transition_secs);
        }
        for (bus, send, level) in &def.sends {
            ops.push(StateOp::SendLevel {
                bus: *bus,
                send: send.clone(),
                level: *level,
            });
        }

        self.active_states.insert(def.group.clone(), active);
        ops
    }

    /// Deactivate whatever state is active in `group`, reverting it
    pub fn clear_state(&mut self, group: &str, transition_secs: f32) -> Vec<StateOp> {
        let mut ops = Vec::new();
        if let Some(previous) = self.active_states.remove(group) {
            self.revert(previous, transition_secs, &mut ops);
        }
        ops
    }

    pub fn state_known(&self, state: StateId) -> bool {
        self.states.contains_key(&state)
    }

    pub fn active_state(&self, group: &str) -> Option<StateId> {
        self.active_states.get(group).map(|a| a.state)
    }

    fn revert(&mut self, previous: ActiveState, transition_secs: f32, ops: &mut Vec<StateOp>) {
        for (bus, db) in previous.saved_bus_volumes {
            ops.push(StateOp::BusVolume {
                bus,
                db,
                transition_secs,
            });
        }
        for (group, value) in previous.saved_switches {
            match value {
                Some(v) => {
                    self.set_switch(&group, &v);
                }
                None => {
                    self.switches.remove(&group);
                }
            }
        }
        for (name, value) in previous.saved_rtpcs {
            self.transition_rtpc(&name, value, transition_secs);
        }
        for (bus, send, level) in previous.saved_sends {
            ops.push(StateOp::SendLevel { bus, send, level });
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // TICK
    // ═══════════════════════════════════════════════════════════════════════════

    /// Advance RTPC transitions; listeners fire for every value change,
    /// including interpolation steps.
    pub fn tick(&mut self, dt: f32) {
        let mut changed: Vec<(String, f32)> = Vec::new();
        for (name, value) in &mut self.rtpcs {
            if value.tick(dt) {
                changed.push((name.clone(), value.current));
            }
        }
        for (name, value) in changed {
            for (_, listener) in &mut self.rtpc_listeners.entries {
                listener(&name, value);
            }
        }
    }
}

impl soniq_containers::ControlView for ControlPlane {
    fn switch_value(&self, group: &str) -> Option<&str> {
        self.switch(group)
    }

    fn rtpc_value(&self, name: &str) -> Option<f32> {
        self.rtpc(name)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

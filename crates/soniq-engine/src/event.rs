//! Event definitions — ordered action lists with admission rules
//!
//! An event is a named, stateless definition: a list of actions executed
//! in order when the event is posted, plus the admission knobs (priority,
//! instance cap, steal policy, cooldown). Runtime instance counts and
//! last-post times are tracked by the engine, not here.

use serde::{Deserialize, Serialize};
use soniq_containers::FadeCurve;
use soniq_core::{BusId, ContainerId, EventId, Priority, StateId, PRIORITY_DEFAULT, MASTER_BUS};

// ═══════════════════════════════════════════════════════════════════════════════
// STEAL POLICY
// ═══════════════════════════════════════════════════════════════════════════════

/// Which voice to evict when a cap is hit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum StealPolicy {
    /// Earliest allocation timestamp
    #[default]
    Oldest = 0,
    /// Lowest current composite gain
    Quietest = 1,
    /// Largest distance from the listener; degrades to Oldest for
    /// distance-less voices
    Furthest = 2,
    /// Smallest priority strictly below the incoming request, ties
    /// broken by age
    LowestPriority = 3,
}

// ═══════════════════════════════════════════════════════════════════════════════
// ACTIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// One step of an event's action list.
///
/// Every variant carries its own `delay_secs`; delayed actions are
/// scheduled by due time, never executed by blocking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Action {
    /// Resolve a container and start its clips on a bus
    Play {
        container: ContainerId,
        bus: BusId,
        gain_db: f32,
        delay_secs: f32,
        fade_secs: f32,
        curve: FadeCurve,
    },
    /// Stop a container's voices (or, with `container: None`, the
    /// voices spawned by this post)
    Stop {
        container: Option<ContainerId>,
        delay_secs: f32,
        fade_secs: f32,
        curve: FadeCurve,
    },
    /// Pause the voices spawned by this post
    Pause { delay_secs: f32 },
    /// Resume the voices spawned by this post
    Resume { delay_secs: f32 },
    SetSwitch {
        group: String,
        value: String,
        delay_secs: f32,
    },
    SetRtpc {
        name: String,
        value: f32,
        transition_secs: f32,
        delay_secs: f32,
    },
    SetState {
        state: StateId,
        transition_secs: f32,
        delay_secs: f32,
    },
    /// Fire a bus's duck envelope (attack → hold → release)
    TriggerDucking { bus: BusId, delay_secs: f32 },
    /// Fade `from`'s live voices out while fading a fresh resolve of
    /// `to` in, over the same window
    CrossFade {
        from: ContainerId,
        to: ContainerId,
        bus: BusId,
        duration_secs: f32,
        curve: FadeCurve,
        delay_secs: f32,
    },
}

impl Action {
    /// Shorthand for an immediate play with no fade
    pub fn play(container: ContainerId, bus: BusId) -> Self {
        Action::Play {
            container,
            bus,
            gain_db: 0.0,
            delay_secs: 0.0,
            fade_secs: 0.0,
            curve: FadeCurve::Linear,
        }
    }

    /// Shorthand for an immediate stop of this post's voices
    pub fn stop(fade_secs: f32) -> Self {
        Action::Stop {
            container: None,
            delay_secs: 0.0,
            fade_secs,
            curve: FadeCurve::Linear,
        }
    }

    pub fn delay_secs(&self) -> f32 {
        match self {
            Action::Play { delay_secs, .. }
            | Action::Stop { delay_secs, .. }
            | Action::Pause { delay_secs }
            | Action::Resume { delay_secs }
            | Action::SetSwitch { delay_secs, .. }
            | Action::SetRtpc { delay_secs, .. }
            | Action::SetState { delay_secs, .. }
            | Action::TriggerDucking { delay_secs, .. }
            | Action::CrossFade { delay_secs, .. } => *delay_secs,
        }
    }

    pub fn with_delay(mut self, secs: f32) -> Self {
        match &mut self {
            Action::Play { delay_secs, .. }
            | Action::Stop { delay_secs, .. }
            | Action::Pause { delay_secs }
            | Action::Resume { delay_secs }
            | Action::SetSwitch { delay_secs, .. }
            | Action::SetRtpc { delay_secs, .. }
            | Action::SetState { delay_secs, .. }
            | Action::TriggerDucking { delay_secs, .. }
            | Action::CrossFade { delay_secs, .. } => *delay_secs = secs.max(0.0),
        }
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// EVENT DEFINITION
// ═══════════════════════════════════════════════════════════════════════════════

/// Designer-authored event: admission rules plus an ordered action list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventDefinition {
    pub id: EventId,
    pub name: String,
    pub actions: Vec<Action>,
    pub priority: Priority,
    /// 0 = uncapped
    pub max_instances: u32,
    pub steal_policy: StealPolicy,
    /// Posts within this window of the previous one are rejected
    pub cooldown_secs: f32,
}

impl EventDefinition {
    pub fn new(id: EventId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            actions: Vec::new(),
            priority: PRIORITY_DEFAULT,
            max_instances: 0,
            steal_policy: StealPolicy::default(),
            cooldown_secs: 0.0,
        }
    }

    pub fn add_action(&mut self, action: Action) -> &mut Self {
        self.actions.push(action);
        self
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_instances(mut self, max: u32, policy: StealPolicy) -> Self {
        self.max_instances = max;
        self.steal_policy = policy;
        self
    }

    pub fn with_cooldown(mut self, secs: f32) -> Self {
        self.cooldown_secs = secs.max(0.0);
        self
    }

    /// A play event with a single immediate Play action
    pub fn simple_play(id: EventId, name: impl Into<String>, container: ContainerId) -> Self {
        Self::new(id, name).with_action(Action::play(container, MASTER_BUS))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

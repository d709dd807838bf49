//! External collaborator contracts
//!
//! The engine never touches samples: it looks definitions up in an
//! [`AssetStore`], emits channel intents to an [`OutputBackend`], and
//! optionally consults a [`SpatialQuery`] for occlusion. A lookup miss is
//! a NotFound outcome handled with a warning, never a crash.

use soniq_containers::Container;
use soniq_core::{BusId, ClipId, ContainerId, EventId, Position, StateId};
use soniq_mix::BusDefinition;
use std::collections::HashMap;

use crate::control::StateDefinition;
use crate::event::EventDefinition;

/// Opaque output-channel handle minted by the backend
pub type ChannelId = u64;

// ═══════════════════════════════════════════════════════════════════════════════
// ASSET STORE
// ═══════════════════════════════════════════════════════════════════════════════

/// Read-only definition and clip-metadata lookup
pub trait AssetStore: Send {
    fn load_event(&self, id: EventId) -> Option<EventDefinition>;
    fn load_container(&self, id: ContainerId) -> Option<Container>;
    fn load_bus(&self, id: BusId) -> Option<BusDefinition>;
    fn load_state(&self, id: StateId) -> Option<StateDefinition>;
    /// Clip length in seconds; drives natural end and loop callbacks
    fn clip_duration(&self, clip: ClipId) -> Option<f32>;
}

/// Asset store with nothing in it
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAssets;

impl AssetStore for NullAssets {
    fn load_event(&self, _id: EventId) -> Option<EventDefinition> {
        None
    }
    fn load_container(&self, _id: ContainerId) -> Option<Container> {
        None
    }
    fn load_bus(&self, _id: BusId) -> Option<BusDefinition> {
        None
    }
    fn load_state(&self, _id: StateId) -> Option<StateDefinition> {
        None
    }
    fn clip_duration(&self, _clip: ClipId) -> Option<f32> {
        None
    }
}

/// In-memory asset store populated up front; hosts with a real bank
/// format implement [`AssetStore`] themselves
#[derive(Debug, Default)]
pub struct StaticAssets {
    events: HashMap<EventId, EventDefinition>,
    containers: HashMap<ContainerId, Container>,
    buses: HashMap<BusId, BusDefinition>,
    states: HashMap<StateId, StateDefinition>,
    clip_durations: HashMap<ClipId, f32>,
}

impl StaticAssets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_event(&mut self, event: EventDefinition) -> &mut Self {
        self.events.insert(event.id, event);
        self
    }

    pub fn add_container(&mut self, container: Container) -> &mut Self {
        self.containers.insert(container.id(), container);
        self
    }

    pub fn add_bus(&mut self, bus: BusDefinition) -> &mut Self {
        self.buses.insert(bus.id, bus);
        self
    }

    pub fn add_state(&mut self, state: StateDefinition) -> &mut Self {
        self.states.insert(state.id, state);
        self
    }

    pub fn add_clip(&mut self, clip: ClipId, duration_secs: f32) -> &mut Self {
        self.clip_durations.insert(clip, duration_secs);
        self
    }
}

impl AssetStore for StaticAssets {
    fn load_event(&self, id: EventId) -> Option<EventDefinition> {
        self.events.get(&id).cloned()
    }

    fn load_container(&self, id: ContainerId) -> Option<Container> {
        self.containers.get(&id).cloned()
    }

    fn load_bus(&self, id: BusId) -> Option<BusDefinition> {
        self.buses.get(&id).cloned()
    }

    fn load_state(&self, id: StateId) -> Option<StateDefinition> {
        self.states.get(&id).cloned()
    }

    fn clip_duration(&self, clip: ClipId) -> Option<f32> {
        self.clip_durations.get(&clip).copied()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// OUTPUT BACKEND
// ═══════════════════════════════════════════════════════════════════════════════

/// Everything the backend needs to start one output channel
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelParams {
    pub clip: ClipId,
    pub bus: BusId,
    /// Composite linear gain at creation time
    pub gain: f32,
    pub pitch_semitones: f32,
    pub looped: bool,
    /// Playback offset, used when promoting a virtualized voice
    pub start_secs: f32,
}

/// Platform playback abstraction consumed by the engine
pub trait OutputBackend {
    /// `None` means the platform refused the channel; the voice is
    /// dropped and reported
    fn create_channel(&mut self, params: &ChannelParams) -> Option<ChannelId>;
    fn set_channel_gain(&mut self, channel: ChannelId, gain: f32);
    fn set_channel_pitch(&mut self, channel: ChannelId, semitones: f32);
    fn pause_channel(&mut self, channel: ChannelId);
    fn resume_channel(&mut self, channel: ChannelId);
    fn stop_channel(&mut self, channel: ChannelId);
    fn is_channel_finished(&self, channel: ChannelId) -> bool;
}

// ═══════════════════════════════════════════════════════════════════════════════
// SPATIAL QUERY
// ═══════════════════════════════════════════════════════════════════════════════

/// Occlusion raycast contract; `true` means the path is blocked.
/// `mask` selects which physics layers the ray may collide with.
pub trait SpatialQuery {
    fn raycast(&self, from: Position, to: Position, mask: u32) -> bool;
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

//! Soniq Engine — event-driven playback runtime
//!
//! Ties the mixing graph, container resolution and the control plane
//! together behind one engine context:
//! - **Events** bundle actions (play, stop, control changes, ducking,
//!   crossfades) behind stable ids, with delays, cooldowns and
//!   per-event instance caps
//! - **Voices** come from a fixed pool with stealing and
//!   virtualization; over-budget voices keep their playback clock and
//!   resume where they would have been
//! - **One tick** drives everything: command intake, delayed actions,
//!   RTPC and bus transitions, occlusion, fades, crossfades and gain
//!   composition all advance from `AudioEngine::tick(dt)`
//!
//! The split between [`EngineHandle`] (thread-safe, lock-free intake)
//! and [`AudioEngine`] (single-owner processor) means no caller
//! operation ever blocks on the update thread.

pub mod backend;
pub mod control;
pub mod engine;
pub mod event;
pub mod handle;
pub mod voice;

pub use backend::{
    AssetStore, ChannelId, ChannelParams, NullAssets, OutputBackend, SpatialQuery, StaticAssets,
};
pub use control::{ControlPlane, RtpcDefinition, StateDefinition, StateOp, SubscriptionId};
pub use engine::{
    create_engine, AudioEngine, EngineCommand, EngineConfig, EngineHandle, EngineStatistics,
    VoiceDebugInfo,
};
pub use event::{Action, EventDefinition, StealPolicy};
pub use handle::{CallbackId, CallbackToken, InstanceHandle, VoiceCallbackKind};
pub use voice::{Voice, VoicePool, VoiceState};

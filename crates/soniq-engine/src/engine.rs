//! Engine context — handle/processor split and the scheduler tick
//!
//! The runtime is one explicit context, split the same way the rest of
//! the system splits thread roles:
//! - [`EngineHandle`]: thread-safe caller surface; posts and control
//!   changes go into a lock-free intake queue
//! - [`AudioEngine`]: single-owner processor; drains the queue at the
//!   start of [`AudioEngine::tick`] and owns all pool/bus/voice state
//!
//! Draining in enqueue order makes the effects of one tick
//! deterministic; no caller operation blocks. `post()` returns a handle
//! immediately even though allocation happens on the next tick.

use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rtrb::{Consumer, Producer, RingBuffer};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use soniq_containers::{Container, ContainerState, ContainerStore, FadeCurve, resolve};
use soniq_core::{
    db_to_linear, generate_playing_id, BusId, ContainerId, EventId, GainStack, PlayingId,
    Position, Priority, SourceId, StateId, VoiceId,
};
use soniq_mix::{BusDefinition, BusGraph};

use crate::backend::{AssetStore, ChannelParams, OutputBackend, SpatialQuery};
use crate::control::{ControlPlane, RtpcDefinition, StateDefinition, StateOp};
use crate::event::{Action, EventDefinition, StealPolicy};
use crate::handle::{CallbackRegistry, InstanceHandle, VoiceCallbackKind};
use crate::voice::{select_victim, VoiceFade, VoicePool, VoiceState};

// ═══════════════════════════════════════════════════════════════════════════════
// CONFIG
// ═══════════════════════════════════════════════════════════════════════════════

/// Engine construction parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Audible voice budget
    pub max_real_voices: usize,
    /// Extra slots kept alive as virtualized voices
    pub max_virtual_voices: usize,
    pub command_queue_capacity: usize,
    /// Cadence of the virtualization re-evaluation
    pub voice_update_interval_secs: f32,
    /// Cadence of occlusion raycasts
    pub occlusion_interval_secs: f32,
    /// Occlusion factor applied to blocked voices
    pub occlusion_gain: f32,
    /// Physics layer mask handed to occlusion raycasts
    pub occlusion_mask: u32,
    /// Attenuation range used when a voice does not carry its own
    pub default_max_distance: f32,
    /// Fixed seed for reproducible container selection
    pub rng_seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_real_voices: 32,
            max_virtual_voices: 96,
            command_queue_capacity: 2048,
            voice_update_interval_secs: 0.05,
            occlusion_interval_secs: 0.25,
            occlusion_gain: 0.35,
            occlusion_mask: u32::MAX,
            default_max_distance: 100.0,
            rng_seed: None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMMANDS
// ═══════════════════════════════════════════════════════════════════════════════

/// Caller → tick intake queue payload
#[derive(Debug, Clone)]
pub enum EngineCommand {
    Post {
        event: EventId,
        playing_id: PlayingId,
        source: SourceId,
        position: Option<Position>,
    },
    PostByName {
        name: String,
        playing_id: PlayingId,
        source: SourceId,
        position: Option<Position>,
    },
    StopPlaying {
        playing_id: PlayingId,
        fade_secs: f32,
    },
    StopAll {
        fade_secs: f32,
    },
    StopSource {
        source: SourceId,
        fade_secs: f32,
    },
    PausePlaying {
        playing_id: PlayingId,
    },
    ResumePlaying {
        playing_id: PlayingId,
    },
    PauseAll,
    ResumeAll,
    SetVoiceVolume {
        playing_id: PlayingId,
        gain: f32,
    },
    SetVoicePitch {
        playing_id: PlayingId,
        semitones: f32,
    },
    SetSwitch {
        group: String,
        value: String,
    },
    SetRtpc {
        name: String,
        value: f32,
    },
    TransitionRtpc {
        name: String,
        target: f32,
        duration_secs: f32,
    },
    SetState {
        state: StateId,
        transition_secs: f32,
    },
    ClearState {
        group: String,
        transition_secs: f32,
    },
    AddBus(BusDefinition),
    SetBusVolume {
        bus: BusId,
        db: f32,
        transition_secs: f32,
    },
    SetBusMute {
        bus: BusId,
        mute: bool,
    },
    SetBusSolo {
        bus: BusId,
        solo: bool,
    },
    TriggerDuck {
        bus: BusId,
    },
    ReleaseDuck {
        bus: BusId,
    },
    RegisterRtpc(RtpcDefinition),
    RegisterState(StateDefinition),
    SetListener {
        position: Position,
    },
}

// ═══════════════════════════════════════════════════════════════════════════════
// SHARED STATE
// ═══════════════════════════════════════════════════════════════════════════════

/// Statistics mirrored into atomics so the handle side can read them
#[derive(Default)]
pub(crate) struct SharedStats {
    pub(crate) real: AtomicUsize,
    pub(crate) virtual_: AtomicUsize,
    pub(crate) stopping: AtomicUsize,
    pub(crate) free: AtomicUsize,
    pub(crate) active_loops: AtomicUsize,
    pub(crate) dropped_plays: AtomicU64,
}

/// State shared between [`EngineHandle`] and [`AudioEngine`]
pub struct EngineShared {
    pub(crate) events: RwLock<HashMap<EventId, EventDefinition>>,
    pub(crate) event_names: RwLock<HashMap<String, EventId>>,
    pub(crate) containers: RwLock<ContainerStore>,
    pub(crate) command_tx: Mutex<Producer<EngineCommand>>,
    pub(crate) callbacks: Mutex<CallbackRegistry>,
    pub(crate) active_playing: RwLock<HashSet<PlayingId>>,
    pub(crate) stats: SharedStats,
}

impl EngineShared {
    pub(crate) fn push_command(&self, command: EngineCommand) {
        if self.command_tx.lock().push(command).is_err() {
            log::warn!("[Engine] command queue full, command dropped");
        }
    }
}

/// Voice-count snapshot readable from any thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineStatistics {
    pub real_voices: usize,
    pub virtual_voices: usize,
    pub stopping_voices: usize,
    pub free_voices: usize,
    pub active_loops: usize,
    pub dropped_plays: u64,
}

/// Per-voice debug snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceDebugInfo {
    pub voice: VoiceId,
    pub playing_id: PlayingId,
    pub event: EventId,
    pub container: ContainerId,
    pub bus: BusId,
    pub is_virtual: bool,
    pub priority: Priority,
    pub distance: Option<f32>,
    pub gain: f32,
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENGINE HANDLE
// ═══════════════════════════════════════════════════════════════════════════════

/// Thread-safe caller surface; clone freely
#[derive(Clone)]
pub struct EngineHandle {
    shared: Arc<EngineShared>,
}

impl EngineHandle {
    // ═══════════════════════════════════════════════════════════════════════════
    // DEFINITION REGISTRATION
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn register_event(&self, event: EventDefinition) {
        let id = event.id;
        let name = event.name.clone();
        self.shared.events.write().insert(id, event);
        self.shared.event_names.write().insert(name, id);
    }

    pub fn register_container(&self, container: Container) {
        self.shared.containers.write().insert(container);
    }

    pub fn event_id(&self, name: &str) -> Option<EventId> {
        self.shared.event_names.read().get(name).copied()
    }

    pub fn add_bus(&self, bus: BusDefinition) {
        self.shared.push_command(EngineCommand::AddBus(bus));
    }

    pub fn register_rtpc(&self, rtpc: RtpcDefinition) {
        self.shared.push_command(EngineCommand::RegisterRtpc(rtpc));
    }

    pub fn register_state(&self, state: StateDefinition) {
        self.shared.push_command(EngineCommand::RegisterState(state));
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // POSTING
    // ═══════════════════════════════════════════════════════════════════════════

    /// Post an event. Always returns a handle; if the event cannot be
    /// admitted the handle simply never becomes active.
    pub fn post(&self, event: EventId, source: SourceId, position: Option<Position>) -> InstanceHandle {
        let playing_id = generate_playing_id();
        self.shared.push_command(EngineCommand::Post {
            event,
            playing_id,
            source,
            position,
        });
        InstanceHandle::new(playing_id, Arc::clone(&self.shared))
    }

    pub fn post_by_name(
        &self,
        name: &str,
        source: SourceId,
        position: Option<Position>,
    ) -> InstanceHandle {
        let playing_id = generate_playing_id();
        self.shared.push_command(EngineCommand::PostByName {
            name: name.to_string(),
            playing_id,
            source,
            position,
        });
        InstanceHandle::new(playing_id, Arc::clone(&self.shared))
    }

    pub fn stop_all(&self, fade_secs: f32) {
        self.shared.push_command(EngineCommand::StopAll { fade_secs });
    }

    /// Stop every voice posted against one emitter
    pub fn stop_source(&self, source: SourceId, fade_secs: f32) {
        self.shared
            .push_command(EngineCommand::StopSource { source, fade_secs });
    }

    pub fn pause_all(&self) {
        self.shared.push_command(EngineCommand::PauseAll);
    }

    pub fn resume_all(&self) {
        self.shared.push_command(EngineCommand::ResumeAll);
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // CONTROL PLANE
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn set_switch(&self, group: &str, value: &str) {
        self.shared.push_command(EngineCommand::SetSwitch {
            group: group.to_string(),
            value: value.to_string(),
        });
    }

    pub fn set_rtpc(&self, name: &str, value: f32) {
        self.shared.push_command(EngineCommand::SetRtpc {
            name: name.to_string(),
            value,
        });
    }

    pub fn transition_rtpc(&self, name: &str, target: f32, duration_secs: f32) {
        self.shared.push_command(EngineCommand::TransitionRtpc {
            name: name.to_string(),
            target,
            duration_secs,
        });
    }

    pub fn set_state(&self, state: StateId, transition_secs: f32) {
        self.shared.push_command(EngineCommand::SetState {
            state,
            transition_secs,
        });
    }

    pub fn clear_state(&self, group: &str, transition_secs: f32) {
        self.shared.push_command(EngineCommand::ClearState {
            group: group.to_string(),
            transition_secs,
        });
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // MIX CONTROL
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn set_bus_volume(&self, bus: BusId, db: f32, transition_secs: f32) {
        self.shared.push_command(EngineCommand::SetBusVolume {
            bus,
            db,
            transition_secs,
        });
    }

    pub fn set_bus_mute(&self, bus: BusId, mute: bool) {
        self.shared.push_command(EngineCommand::SetBusMute { bus, mute });
    }

    pub fn set_bus_solo(&self, bus: BusId, solo: bool) {
        self.shared.push_command(EngineCommand::SetBusSolo { bus, solo });
    }

    pub fn trigger_duck(&self, bus: BusId) {
        self.shared.push_command(EngineCommand::TriggerDuck { bus });
    }

    pub fn release_duck(&self, bus: BusId) {
        self.shared.push_command(EngineCommand::ReleaseDuck { bus });
    }

    pub fn set_listener_position(&self, position: Position) {
        self.shared.push_command(EngineCommand::SetListener { position });
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // QUERIES
    // ═══════════════════════════════════════════════════════════════════════════

    /// Counts as of the last completed tick
    pub fn statistics(&self) -> EngineStatistics {
        let stats = &self.shared.stats;
        EngineStatistics {
            real_voices: stats.real.load(Ordering::Relaxed),
            virtual_voices: stats.virtual_.load(Ordering::Relaxed),
            stopping_voices: stats.stopping.load(Ordering::Relaxed),
            free_voices: stats.free.load(Ordering::Relaxed),
            active_loops: stats.active_loops.load(Ordering::Relaxed),
            dropped_plays: stats.dropped_plays.load(Ordering::Relaxed),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SCHEDULED WORK
// ═══════════════════════════════════════════════════════════════════════════════

/// Admission context carried from a post to its (possibly delayed) actions
#[derive(Debug, Clone)]
struct PostContext {
    playing_id: PlayingId,
    event: EventId,
    priority: Priority,
    steal_policy: StealPolicy,
    source: SourceId,
    position: Option<Position>,
}

/// Delayed action keyed by absolute due time
struct ScheduledAction {
    due: f64,
    seq: u64,
    ctx: PostContext,
    action: Action,
}

/// Active A→B crossfade driven by the tick. Slots are paired with the
/// post that owned them at capture time; a slot freed and reallocated
/// mid-fade no longer matches and is dropped from the task.
struct CrossfadeTask {
    out_voices: SmallVec<[(VoiceId, PlayingId); 4]>,
    in_voices: SmallVec<[(VoiceId, PlayingId); 4]>,
    elapsed: f32,
    duration: f32,
    curve: FadeCurve,
}

// ═══════════════════════════════════════════════════════════════════════════════
// AUDIO ENGINE (processor)
// ═══════════════════════════════════════════════════════════════════════════════

/// Single-owner processor: all voice/bus/control mutation happens here,
/// driven by the host calling [`tick`](Self::tick)
pub struct AudioEngine<B: OutputBackend> {
    shared: Arc<EngineShared>,
    command_rx: Consumer<EngineCommand>,
    config: EngineConfig,
    backend: B,
    assets: Box<dyn AssetStore>,
    spatial: Option<Box<dyn SpatialQuery>>,
    pool: VoicePool,
    buses: BusGraph,
    control: ControlPlane,
    container_states: HashMap<ContainerId, ContainerState>,
    last_post_times: HashMap<EventId, f64>,
    scheduled: Vec<ScheduledAction>,
    crossfades: Vec<CrossfadeTask>,
    listener: Position,
    rng: StdRng,
    now: f64,
    next_seq: u64,
    virtualization_timer: f32,
    occlusion_timer: f32,
    dropped_plays: u64,
    /// (playing_id, kind) pairs collected during the tick, fired at the end
    pending_callbacks: Vec<(PlayingId, VoiceCallbackKind)>,
    /// Posts whose last voice ended this tick
    ended_posts: Vec<PlayingId>,
}

/// Build the engine context: thread-safe handle plus the processor that
/// the host ticks. Definitions can be registered through the handle or
/// resolved lazily from `assets`.
pub fn create_engine<B: OutputBackend>(
    config: EngineConfig,
    assets: Box<dyn AssetStore>,
    backend: B,
) -> (EngineHandle, AudioEngine<B>) {
    let (command_tx, command_rx) = RingBuffer::new(config.command_queue_capacity);

    let shared = Arc::new(EngineShared {
        events: RwLock::new(HashMap::new()),
        event_names: RwLock::new(HashMap::new()),
        containers: RwLock::new(ContainerStore::new()),
        command_tx: Mutex::new(command_tx),
        callbacks: Mutex::new(CallbackRegistry::new()),
        active_playing: RwLock::new(HashSet::new()),
        stats: SharedStats::default(),
    });

    let rng = match config.rng_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    let engine = AudioEngine {
        shared: Arc::clone(&shared),
        command_rx,
        pool: VoicePool::new(config.max_real_voices, config.max_virtual_voices),
        config,
        backend,
        assets,
        spatial: None,
        buses: BusGraph::new(),
        control: ControlPlane::new(),
        container_states: HashMap::new(),
        last_post_times: HashMap::new(),
        scheduled: Vec::new(),
        crossfades: Vec::new(),
        listener: Position::ORIGIN,
        rng,
        now: 0.0,
        next_seq: 0,
        virtualization_timer: 0.0,
        occlusion_timer: 0.0,
        dropped_plays: 0,
        pending_callbacks: Vec::new(),
        ended_posts: Vec::new(),
    };

    (EngineHandle { shared }, engine)
}

impl<B: OutputBackend> AudioEngine<B> {
    /// Attach an occlusion raycast provider
    pub fn set_spatial_query(&mut self, spatial: Box<dyn SpatialQuery>) {
        self.spatial = Some(spatial);
    }

    /// Direct access to the bus graph for host-side setup
    pub fn buses_mut(&mut self) -> &mut BusGraph {
        &mut self.buses
    }

    /// Direct access to the control plane, e.g. for listener
    /// registration before the first tick
    pub fn control_mut(&mut self) -> &mut ControlPlane {
        &mut self.control
    }

    pub fn switch(&self, group: &str) -> Option<&str> {
        self.control.switch(group)
    }

    pub fn rtpc(&self, name: &str) -> Option<f32> {
        self.control.rtpc(name)
    }

    pub fn active_state(&self, group: &str) -> Option<StateId> {
        self.control.active_state(group)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // TICK
    // ═══════════════════════════════════════════════════════════════════════════

    /// Advance the runtime by `dt` seconds.
    ///
    /// This is the single periodic entry point: command intake, delayed
    /// actions, control/bus transitions, occlusion, voice lifecycle,
    /// virtualization, crossfades and gain pushes all run from here, in
    /// that order.
    pub fn tick(&mut self, dt: f32) {
        self.now += dt as f64;

        self.drain_commands();
        self.run_due_actions();

        self.control.tick(dt);
        self.buses.tick(dt);

        self.occlusion_timer += dt;
        if self.occlusion_timer >= self.config.occlusion_interval_secs {
            self.occlusion_timer = 0.0;
            self.update_occlusion();
        }

        self.advance_voices(dt);

        self.virtualization_timer += dt;
        if self.virtualization_timer >= self.config.voice_update_interval_secs {
            self.virtualization_timer = 0.0;
            self.update_virtualization();
        }

        self.advance_crossfades(dt);
        self.apply_gains();
        self.publish_stats();
        self.fire_pending_callbacks();
    }

    /// Stop everything and drop all voices; the teardown half of the
    /// explicit init/teardown contract
    pub fn shutdown(&mut self) {
        let slots: Vec<VoiceId> = self.pool.live().map(|v| v.id).collect();
        for slot in slots {
            self.kill_voice(slot);
        }
        self.scheduled.clear();
        self.crossfades.clear();
        self.shared.active_playing.write().clear();
        self.publish_stats();
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // COMMAND INTAKE
    // ═══════════════════════════════════════════════════════════════════════════

    fn drain_commands(&mut self) {
        while let Ok(command) = self.command_rx.pop() {
            self.process_command(command);
        }
    }

    fn process_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Post {
                event,
                playing_id,
                source,
                position,
            } => self.execute_post(event, playing_id, source, position),
            EngineCommand::PostByName {
                name,
                playing_id,
                source,
                position,
            } => {
                let id = self.shared.event_names.read().get(&name).copied();
                match id {
                    Some(event) => self.execute_post(event, playing_id, source, position),
                    None => log::warn!("[Engine] post of unknown event '{name}' ignored"),
                }
            }
            EngineCommand::StopPlaying {
                playing_id,
                fade_secs,
            } => self.stop_voices(|v| v.playing_id == playing_id, fade_secs, FadeCurve::Linear),
            EngineCommand::StopAll { fade_secs } => {
                self.stop_voices(|_| true, fade_secs, FadeCurve::Linear)
            }
            EngineCommand::StopSource { source, fade_secs } => {
                self.stop_voices(|v| v.source == source, fade_secs, FadeCurve::Linear)
            }
            EngineCommand::PausePlaying { playing_id } => {
                self.set_paused(|v| v.playing_id == playing_id, true)
            }
            EngineCommand::ResumePlaying { playing_id } => {
                self.set_paused(|v| v.playing_id == playing_id, false)
            }
            EngineCommand::PauseAll => self.set_paused(|_| true, true),
            EngineCommand::ResumeAll => self.set_paused(|_| true, false),
            EngineCommand::SetVoiceVolume { playing_id, gain } => {
                for voice in self.pool.live_mut() {
                    if voice.playing_id == playing_id {
                        voice.gain.base = voice.base_seed * gain;
                    }
                }
            }
            EngineCommand::SetVoicePitch {
                playing_id,
                semitones,
            } => {
                for voice in self.pool.live_mut() {
                    if voice.playing_id == playing_id {
                        voice.pitch_semitones = semitones;
                        if let Some(channel) = voice.channel {
                            self.backend.set_channel_pitch(channel, semitones);
                        }
                    }
                }
            }
            EngineCommand::SetSwitch { group, value } => {
                self.control.set_switch(&group, &value);
            }
            EngineCommand::SetRtpc { name, value } => self.control.set_rtpc(&name, value),
            EngineCommand::TransitionRtpc {
                name,
                target,
                duration_secs,
            } => self.control.transition_rtpc(&name, target, duration_secs),
            EngineCommand::SetState {
                state,
                transition_secs,
            } => self.apply_state(state, transition_secs),
            EngineCommand::ClearState {
                group,
                transition_secs,
            } => {
                let ops = self.control.clear_state(&group, transition_secs);
                self.apply_state_ops(ops);
            }
            EngineCommand::AddBus(def) => {
                if let Err(err) = self.buses.add_bus(def) {
                    log::warn!("[Engine] bus rejected: {err}");
                }
            }
            EngineCommand::SetBusVolume {
                bus,
                db,
                transition_secs,
            } => self.buses.set_volume(bus, db, transition_secs),
            EngineCommand::SetBusMute { bus, mute } => self.buses.set_mute(bus, mute),
            EngineCommand::SetBusSolo { bus, solo } => self.buses.set_solo(bus, solo),
            EngineCommand::TriggerDuck { bus } => self.buses.trigger_duck(bus),
            EngineCommand::ReleaseDuck { bus } => self.buses.release_duck(bus),
            EngineCommand::RegisterRtpc(def) => self.control.register_rtpc(def),
            EngineCommand::RegisterState(def) => self.control.register_state(def),
            EngineCommand::SetListener { position } => self.listener = position,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // ADMISSION
    // ═══════════════════════════════════════════════════════════════════════════

    fn lookup_event(&mut self, event: EventId) -> Option<EventDefinition> {
        if let Some(def) = self.shared.events.read().get(&event) {
            return Some(def.clone());
        }
        let def = self.assets.load_event(event)?;
        self.shared
            .event_names
            .write()
            .insert(def.name.clone(), def.id);
        self.shared.events.write().insert(def.id, def.clone());
        Some(def)
    }

    fn execute_post(
        &mut self,
        event: EventId,
        playing_id: PlayingId,
        source: SourceId,
        position: Option<Position>,
    ) {
        let Some(def) = self.lookup_event(event) else {
            log::warn!("[Engine] post of unknown event {event} ignored");
            return;
        };

        // Cooldown gate
        if def.cooldown_secs > 0.0 {
            if let Some(last) = self.last_post_times.get(&event) {
                if self.now - last < def.cooldown_secs as f64 {
                    log::debug!("[Engine] '{}' posted within cooldown, ignored", def.name);
                    return;
                }
            }
        }

        // Per-event instance cap with event-level stealing. An instance
        // is a post, which may hold several voices; the cap counts
        // posts and stealing evicts every voice of the victim post.
        if def.max_instances > 0 {
            let mut instances: SmallVec<[PlayingId; 8]> = SmallVec::new();
            for v in self.pool.live().filter(|v| v.event == event) {
                if !instances.contains(&v.playing_id) {
                    instances.push(v.playing_id);
                }
            }
            if instances.len() as u32 >= def.max_instances {
                let victim = select_victim(
                    self.pool.live().filter(|v| v.event == event),
                    def.steal_policy,
                    def.priority,
                    &self.listener,
                )
                .and_then(|slot| self.pool.get(slot).map(|v| v.playing_id));
                match victim {
                    Some(victim_post) => {
                        let slots: Vec<VoiceId> = self
                            .pool
                            .live()
                            .filter(|v| v.playing_id == victim_post)
                            .map(|v| v.id)
                            .collect();
                        for slot in slots {
                            self.kill_voice(slot);
                        }
                    }
                    None => {
                        log::warn!(
                            "[Engine] '{}' at instance cap with no stealable voice, post dropped",
                            def.name
                        );
                        self.dropped_plays += 1;
                        return;
                    }
                }
            }
        }

        self.last_post_times.insert(event, self.now);

        let ctx = PostContext {
            playing_id,
            event,
            priority: def.priority,
            steal_policy: def.steal_policy,
            source,
            position,
        };

        for action in def.actions {
            let delay = action.delay_secs();
            if delay <= 0.0 {
                self.execute_action(&ctx, action);
            } else {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.scheduled.push(ScheduledAction {
                    due: self.now + delay as f64,
                    seq,
                    ctx: ctx.clone(),
                    action,
                });
            }
        }
    }

    fn run_due_actions(&mut self) {
        if self.scheduled.is_empty() {
            return;
        }
        let now = self.now;
        let mut due: Vec<ScheduledAction> = Vec::new();
        let mut i = 0;
        while i < self.scheduled.len() {
            if self.scheduled[i].due <= now {
                due.push(self.scheduled.swap_remove(i));
            } else {
                i += 1;
            }
        }
        due.sort_by(|a, b| a.due.total_cmp(&b.due).then(a.seq.cmp(&b.seq)));
        for item in due {
            self.execute_action(&item.ctx, item.action);
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // ACTION EXECUTION
    // ═══════════════════════════════════════════════════════════════════════════

    fn execute_action(&mut self, ctx: &PostContext, action: Action) {
        match action {
            Action::Play {
                container,
                bus,
                gain_db,
                fade_secs,
                curve,
                ..
            } => {
                self.execute_play(ctx, container, bus, gain_db, fade_secs, curve, 1.0);
            }
            Action::Stop {
                container,
                fade_secs,
                curve,
                ..
            } => match container {
                Some(c) => self.stop_voices(|v| v.container == c, fade_secs, curve),
                None => self.stop_voices(|v| v.playing_id == ctx.playing_id, fade_secs, curve),
            },
            Action::Pause { .. } => self.set_paused(|v| v.playing_id == ctx.playing_id, true),
            Action::Resume { .. } => self.set_paused(|v| v.playing_id == ctx.playing_id, false),
            Action::SetSwitch { group, value, .. } => {
                self.control.set_switch(&group, &value);
            }
            Action::SetRtpc {
                name,
                value,
                transition_secs,
                ..
            } => self.control.transition_rtpc(&name, value, transition_secs),
            Action::SetState {
                state,
                transition_secs,
                ..
            } => self.apply_state(state, transition_secs),
            Action::TriggerDucking { bus, .. } => {
                // Fire-and-forget: attack runs, the configured hold time
                // keeps the floor, then the envelope releases itself
                self.buses.trigger_duck(bus);
                self.buses.release_duck(bus);
            }
            Action::CrossFade {
                from,
                to,
                bus,
                duration_secs,
                curve,
                ..
            } => self.execute_crossfade(ctx, from, to, bus, duration_secs, curve),
        }
    }

    fn ensure_container_loaded(&mut self, container: ContainerId, depth: usize) {
        if depth > 8 || self.shared.containers.read().contains(container) {
            return;
        }
        let Some(def) = self.assets.load_container(container) else {
            return;
        };
        let children: Vec<ContainerId> = match &def {
            Container::Switch(c) => c
                .entries
                .values()
                .copied()
                .chain(c.default_child)
                .collect(),
            Container::Blend(c) => c.children.iter().map(|ch| ch.container).collect(),
            _ => Vec::new(),
        };
        self.shared.containers.write().insert(def);
        for child in children {
            self.ensure_container_loaded(child, depth + 1);
        }
    }

    fn ensure_bus_loaded(&mut self, bus: BusId, depth: usize) -> bool {
        if self.buses.contains(bus) {
            return true;
        }
        if depth > 8 {
            return false;
        }
        let Some(def) = self.assets.load_bus(bus) else {
            return false;
        };
        if let Some(parent) = def.parent {
            if !self.ensure_bus_loaded(parent, depth + 1) {
                return false;
            }
        }
        self.buses.add_bus(def).is_ok()
    }

    /// Resolve a container and start a voice per play intent. Returns
    /// the slots it started, for crossfade bookkeeping.
    #[allow(clippy::too_many_arguments)]
    fn execute_play(
        &mut self,
        ctx: &PostContext,
        container: ContainerId,
        bus: BusId,
        gain_db: f32,
        fade_secs: f32,
        curve: FadeCurve,
        crossfade_gain: f32,
    ) -> SmallVec<[VoiceId; 4]> {
        let mut started: SmallVec<[VoiceId; 4]> = SmallVec::new();

        if !self.ensure_bus_loaded(bus, 0) {
            log::warn!("[Engine] play routed to unknown bus {bus}, dropped");
            self.dropped_plays += 1;
            return started;
        }
        self.ensure_container_loaded(container, 0);

        let intents = {
            let store = self.shared.containers.read();
            resolve(
                &store,
                container,
                &mut self.container_states,
                &self.control,
                &mut self.rng,
            )
        };
        if intents.is_empty() {
            self.dropped_plays += 1;
            return started;
        }

        let action_gain = db_to_linear(gain_db);
        for intent in intents {
            let Some(alloc) = self
                .pool
                .allocate(ctx.priority, ctx.steal_policy, &self.listener)
            else {
                log::warn!(
                    "[Engine] voice pool exhausted with no stealable voice, play dropped"
                );
                self.dropped_plays += 1;
                continue;
            };
            if let Some(stolen) = alloc.stolen {
                if let Some(channel) = stolen.channel {
                    self.backend.stop_channel(channel);
                }
                self.note_voice_gone(stolen.playing_id);
            }

            let slot = alloc.slot;
            let make_real = self.pool.count(VoiceState::Real) < self.pool.max_real();
            let base = intent.gain * action_gain;
            let rtpc_gain = intent
                .rtpc_link
                .as_ref()
                .map(|link| {
                    link.curve
                        .evaluate(self.control.rtpc(&link.rtpc).unwrap_or(0.0))
                })
                .unwrap_or(1.0);
            let fade = (fade_secs > 0.0)
                .then(|| VoiceFade::new(0.0, 1.0, fade_secs, curve));
            let fade_gain = fade.as_ref().map(|f| f.gain()).unwrap_or(1.0);

            let mut gain = GainStack::with_base(base);
            gain.bus = self.buses.resolve(bus);
            gain.rtpc = rtpc_gain;
            gain.scheduler = fade_gain * crossfade_gain * self.buses.duck_gain(bus);

            let channel = if make_real {
                let created = self.backend.create_channel(&ChannelParams {
                    clip: intent.clip,
                    bus,
                    gain: gain.final_gain(),
                    pitch_semitones: intent.pitch_semitones,
                    looped: intent.looped,
                    start_secs: 0.0,
                });
                if created.is_none() {
                    log::warn!("[Engine] backend refused a channel, play dropped");
                    self.pool.release(slot);
                    self.dropped_plays += 1;
                    continue;
                }
                created
            } else {
                None
            };

            let Some(voice) = self.pool.get_mut(slot) else {
                continue;
            };
            voice.state = if make_real {
                VoiceState::Real
            } else {
                VoiceState::Virtual
            };
            voice.playing_id = ctx.playing_id;
            voice.event = ctx.event;
            voice.source = ctx.source;
            voice.container = container;
            voice.clip = intent.clip;
            voice.bus = bus;
            voice.priority = ctx.priority;
            voice.gain = gain;
            voice.base_seed = base;
            voice.looped = intent.looped;
            voice.pitch_semitones = intent.pitch_semitones;
            voice.position = ctx.position;
            voice.max_distance = self.config.default_max_distance;
            voice.started_at = self.now;
            voice.channel = channel;
            voice.fade = fade;
            voice.crossfade_gain = crossfade_gain;
            voice.rtpc_link = intent.rtpc_link;
            started.push(slot);
        }

        if !started.is_empty() {
            let newly_active = self.shared.active_playing.write().insert(ctx.playing_id);
            if newly_active {
                self.pending_callbacks
                    .push((ctx.playing_id, VoiceCallbackKind::Started));
            }
        }
        started
    }

    fn execute_crossfade(
        &mut self,
        ctx: &PostContext,
        from: ContainerId,
        to: ContainerId,
        bus: BusId,
        duration_secs: f32,
        curve: FadeCurve,
    ) {
        let out_voices: SmallVec<[(VoiceId, PlayingId); 4]> = self
            .pool
            .live()
            .filter(|v| v.container == from && v.state != VoiceState::Stopping)
            .map(|v| (v.id, v.playing_id))
            .collect();
        if out_voices.is_empty() {
            log::warn!("[Engine] crossfade from container {from} with no live voices");
        }

        // Incoming side starts silent and ramps in with the task
        let in_voices: SmallVec<[(VoiceId, PlayingId); 4]> = self
            .execute_play(ctx, to, bus, 0.0, 0.0, curve, 0.0)
            .into_iter()
            .map(|slot| (slot, ctx.playing_id))
            .collect();

        if duration_secs <= 0.0 {
            for (slot, _) in out_voices {
                self.kill_voice(slot);
            }
            for (slot, _) in in_voices {
                if let Some(voice) = self.pool.get_mut(slot) {
                    voice.crossfade_gain = 1.0;
                }
            }
            return;
        }

        self.crossfades.push(CrossfadeTask {
            out_voices,
            in_voices,
            elapsed: 0.0,
            duration: duration_secs,
            curve,
        });
    }

    fn apply_state(&mut self, state: StateId, transition_secs: f32) {
        if self.control.state_known(state) {
            let ops = self.control.activate_state(state, transition_secs, &self.buses);
            self.apply_state_ops(ops);
            return;
        }
        // Lazy definition pull before the warn-once path triggers
        if let Some(def) = self.assets.load_state(state) {
            self.control.register_state(def);
        }
        let ops = self.control.activate_state(state, transition_secs, &self.buses);
        self.apply_state_ops(ops);
    }

    fn apply_state_ops(&mut self, ops: Vec<StateOp>) {
        for op in ops {
            match op {
                StateOp::BusVolume {
                    bus,
                    db,
                    transition_secs,
                } => self.buses.set_volume(bus, db, transition_secs),
                StateOp::SendLevel { bus, send, level } => {
                    self.buses.set_send_level(bus, &send, level)
                }
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // VOICE LIFECYCLE
    // ═══════════════════════════════════════════════════════════════════════════

    fn stop_voices(&mut self, matches: impl Fn(&crate::voice::Voice) -> bool, fade_secs: f32, curve: FadeCurve) {
        let slots: Vec<VoiceId> = self
            .pool
            .live()
            .filter(|v| matches(v) && v.state != VoiceState::Stopping)
            .map(|v| v.id)
            .collect();
        for slot in slots {
            if fade_secs <= 0.0 {
                self.kill_voice(slot);
            } else if let Some(voice) = self.pool.get_mut(slot) {
                let from = voice.fade.as_ref().map(|f| f.gain()).unwrap_or(1.0);
                voice.state = VoiceState::Stopping;
                voice.fade = Some(VoiceFade::new(from, 0.0, fade_secs, curve).then_free());
            }
        }
    }

    fn set_paused(&mut self, matches: impl Fn(&crate::voice::Voice) -> bool, paused: bool) {
        let slots: Vec<(VoiceId, Option<crate::backend::ChannelId>)> = self
            .pool
            .live()
            .filter(|v| matches(v) && v.paused != paused)
            .map(|v| (v.id, v.channel))
            .collect();
        for (slot, channel) in slots {
            if let Some(voice) = self.pool.get_mut(slot) {
                voice.paused = paused;
            }
            if let Some(channel) = channel {
                if paused {
                    self.backend.pause_channel(channel);
                } else {
                    self.backend.resume_channel(channel);
                }
            }
        }
    }

    /// Immediately end a voice: stop its channel, free its slot, and
    /// queue end-of-post bookkeeping
    fn kill_voice(&mut self, slot: VoiceId) {
        let Some(voice) = self.pool.get_mut(slot) else {
            return;
        };
        if !voice.state.is_live() {
            return;
        }
        let playing_id = voice.playing_id;
        let channel = voice.channel;
        voice.reset();
        if let Some(channel) = channel {
            self.backend.stop_channel(channel);
        }
        self.note_voice_gone(playing_id);
    }

    /// Record that a post may have lost its last voice
    fn note_voice_gone(&mut self, playing_id: PlayingId) {
        if !self.pool.live().any(|v| v.playing_id == playing_id) {
            self.ended_posts.push(playing_id);
        }
    }

    fn advance_voices(&mut self, dt: f32) {
        let mut finished_slots: Vec<VoiceId> = Vec::new();

        for voice in self.pool.live_mut() {
            if voice.paused {
                // A stop fade keeps running under pause so the slot
                // and channel still free; the playback clock holds
                if voice.state == VoiceState::Stopping {
                    if let Some(fade) = &mut voice.fade {
                        fade.tick(dt);
                        if fade.finished() {
                            voice.fade = None;
                            finished_slots.push(voice.id);
                        }
                    }
                }
                continue;
            }

            voice.playback_secs += dt;
            if voice.state == VoiceState::Virtual {
                voice.virtual_secs += dt;
            }

            // Loop wrap detection from clip metadata
            if voice.looped {
                if let Some(duration) = self.assets.clip_duration(voice.clip) {
                    if duration > 0.0 {
                        let wraps = (voice.playback_secs / duration) as u32;
                        if wraps > voice.loops_completed {
                            voice.loops_completed = wraps;
                            self.pending_callbacks
                                .push((voice.playing_id, VoiceCallbackKind::Loop));
                        }
                    }
                }
            }

            // Stop fades and fade-ins
            if let Some(fade) = &mut voice.fade {
                fade.tick(dt);
                if fade.finished() {
                    let free = fade.then_free;
                    voice.fade = None;
                    if free {
                        finished_slots.push(voice.id);
                        continue;
                    }
                }
            }

            // Natural end of non-looping content
            if !voice.looped {
                let over = match (voice.channel, self.assets.clip_duration(voice.clip)) {
                    (Some(channel), _) => self.backend.is_channel_finished(channel),
                    (None, Some(duration)) => voice.playback_secs >= duration,
                    (None, None) => false,
                };
                if over && voice.state != VoiceState::Stopping {
                    finished_slots.push(voice.id);
                }
            }
        }

        for slot in finished_slots {
            self.kill_voice(slot);
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // VIRTUALIZATION
    // ═══════════════════════════════════════════════════════════════════════════

    fn update_virtualization(&mut self) {
        // Demote lowest-importance real voices while over budget
        loop {
            let real = self.pool.count(VoiceState::Real);
            if real <= self.pool.max_real() {
                break;
            }
            let victim = self
                .pool
                .live()
                .filter(|v| v.state == VoiceState::Real)
                .min_by(|a, b| {
                    a.importance(&self.listener)
                        .total_cmp(&b.importance(&self.listener))
                })
                .map(|v| v.id);
            let Some(slot) = victim else { break };
            self.demote(slot);
        }

        // Promote best-importance virtual voices while there is room
        loop {
            let real = self.pool.count(VoiceState::Real);
            if real >= self.pool.max_real() {
                break;
            }
            let best = self
                .pool
                .live()
                .filter(|v| v.state == VoiceState::Virtual)
                .max_by(|a, b| {
                    a.importance(&self.listener)
                        .total_cmp(&b.importance(&self.listener))
                })
                .map(|v| v.id);
            let Some(slot) = best else { break };
            if !self.promote(slot) {
                break;
            }
        }
    }

    fn demote(&mut self, slot: VoiceId) {
        let Some(voice) = self.pool.get_mut(slot) else {
            return;
        };
        let channel = voice.channel.take();
        voice.state = VoiceState::Virtual;
        if let Some(channel) = channel {
            self.backend.stop_channel(channel);
        }
    }

    /// Bring a virtual voice back to real playback, resuming from its
    /// tracked playback clock
    fn promote(&mut self, slot: VoiceId) -> bool {
        let Some(voice) = self.pool.get(slot) else {
            return false;
        };
        let params = ChannelParams {
            clip: voice.clip,
            bus: voice.bus,
            gain: voice.gain.final_gain(),
            pitch_semitones: voice.pitch_semitones,
            looped: voice.looped,
            start_secs: voice.playback_secs,
        };
        let Some(channel) = self.backend.create_channel(&params) else {
            return false;
        };
        if let Some(voice) = self.pool.get_mut(slot) {
            voice.channel = Some(channel);
            voice.state = VoiceState::Real;
            if voice.paused {
                self.backend.pause_channel(channel);
            }
        }
        true
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // OCCLUSION
    // ═══════════════════════════════════════════════════════════════════════════

    fn update_occlusion(&mut self) {
        let Some(spatial) = &self.spatial else {
            return;
        };
        let listener = self.listener;
        let occlusion_gain = self.config.occlusion_gain;
        let mask = self.config.occlusion_mask;
        for voice in self.pool.live_mut() {
            let Some(position) = voice.position else {
                continue;
            };
            let occluded = spatial.raycast(listener, position, mask);
            voice.gain.occlusion = if occluded { occlusion_gain } else { 1.0 };
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // CROSSFADES
    // ═══════════════════════════════════════════════════════════════════════════

    /// Whether `slot` still holds a live voice of the given post. False
    /// once the slot was freed or reallocated to another post.
    fn voice_is(&self, slot: VoiceId, playing_id: PlayingId) -> bool {
        self.pool
            .get(slot)
            .is_some_and(|v| v.state.is_live() && v.playing_id == playing_id)
    }

    fn advance_crossfades(&mut self, dt: f32) {
        let mut tasks = std::mem::take(&mut self.crossfades);
        tasks.retain_mut(|task| {
            task.elapsed += dt;
            // Voices can end naturally mid-fade and their slots be
            // handed to unrelated posts; drop entries that no longer
            // belong to the fading posts before touching anything
            task.out_voices
                .retain(|&mut (slot, pid)| self.voice_is(slot, pid));
            task.in_voices
                .retain(|&mut (slot, pid)| self.voice_is(slot, pid));

            let t = (task.elapsed / task.duration).clamp(0.0, 1.0);
            let out_gain = task.curve.evaluate_out(t);
            let in_gain = task.curve.evaluate(t);

            for &(slot, _) in &task.out_voices {
                if let Some(voice) = self.pool.get_mut(slot) {
                    voice.crossfade_gain = out_gain;
                }
            }
            for &(slot, _) in &task.in_voices {
                if let Some(voice) = self.pool.get_mut(slot) {
                    voice.crossfade_gain = in_gain;
                }
            }

            if t < 1.0 {
                return true;
            }
            for &(slot, _) in &task.out_voices {
                self.kill_voice(slot);
            }
            for &(slot, _) in &task.in_voices {
                if let Some(voice) = self.pool.get_mut(slot) {
                    voice.crossfade_gain = 1.0;
                }
            }
            false
        });
        // Tasks registered by commands during this tick land here too
        tasks.append(&mut self.crossfades);
        self.crossfades = tasks;
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // GAIN COMPOSITION
    // ═══════════════════════════════════════════════════════════════════════════

    fn apply_gains(&mut self) {
        for voice in self.pool.live_mut() {
            voice.gain.bus = self.buses.resolve(voice.bus);
            if let Some(link) = &voice.rtpc_link {
                let value = self.control.rtpc(&link.rtpc).unwrap_or(0.0);
                voice.gain.rtpc = link.curve.evaluate(value);
            }
            let fade_gain = voice.fade.as_ref().map(|f| f.gain()).unwrap_or(1.0);
            voice.gain.scheduler =
                fade_gain * voice.crossfade_gain * self.buses.duck_gain(voice.bus);

            if let Some(channel) = voice.channel {
                self.backend.set_channel_gain(channel, voice.gain.final_gain());
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // BOOKKEEPING
    // ═══════════════════════════════════════════════════════════════════════════

    fn publish_stats(&mut self) {
        let stats = &self.shared.stats;
        stats
            .real
            .store(self.pool.count(VoiceState::Real), Ordering::Relaxed);
        stats
            .virtual_
            .store(self.pool.count(VoiceState::Virtual), Ordering::Relaxed);
        stats
            .stopping
            .store(self.pool.count(VoiceState::Stopping), Ordering::Relaxed);
        stats
            .free
            .store(self.pool.count(VoiceState::Free), Ordering::Relaxed);
        stats.active_loops.store(
            self.pool.live().filter(|v| v.looped).count(),
            Ordering::Relaxed,
        );
        stats
            .dropped_plays
            .store(self.dropped_plays, Ordering::Relaxed);
    }

    fn fire_pending_callbacks(&mut self) {
        let ended: Vec<PlayingId> = self
            .ended_posts
            .drain(..)
            .filter(|pid| self.shared.active_playing.write().remove(pid))
            .collect();
        for pid in &ended {
            self.pending_callbacks.push((*pid, VoiceCallbackKind::Finished));
        }

        if self.pending_callbacks.is_empty() {
            return;
        }
        // Swap the registry out so observers can (un)subscribe from
        // within their callbacks without deadlocking
        let mut registry =
            std::mem::replace(&mut *self.shared.callbacks.lock(), CallbackRegistry::new());
        for (pid, kind) in self.pending_callbacks.drain(..) {
            registry.fire(pid, kind);
        }
        for pid in &ended {
            registry.remove_for(*pid);
        }
        self.shared.callbacks.lock().absorb_older(registry);
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // QUERIES
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn statistics(&self) -> EngineStatistics {
        EngineStatistics {
            real_voices: self.pool.count(VoiceState::Real),
            virtual_voices: self.pool.count(VoiceState::Virtual),
            stopping_voices: self.pool.count(VoiceState::Stopping),
            free_voices: self.pool.count(VoiceState::Free),
            active_loops: self.pool.live().filter(|v| v.looped).count(),
            dropped_plays: self.dropped_plays,
        }
    }

    pub fn active_voices_debug(&self) -> Vec<VoiceDebugInfo> {
        self.pool
            .live()
            .map(|v| VoiceDebugInfo {
                voice: v.id,
                playing_id: v.playing_id,
                event: v.event,
                container: v.container,
                bus: v.bus,
                is_virtual: v.state == VoiceState::Virtual,
                priority: v.priority,
                distance: v.distance_to(&self.listener),
                gain: v.gain.final_gain(),
            })
            .collect()
    }

    /// Playback clock of the voices of one post, for host-side sync
    pub fn playback_position(&self, playing_id: PlayingId) -> Option<f32> {
        self.pool
            .live()
            .find(|v| v.playing_id == playing_id)
            .map(|v| v.playback_secs)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ChannelId, NullAssets};

    struct SilentBackend {
        next: ChannelId,
    }

    impl OutputBackend for SilentBackend {
        fn create_channel(&mut self, _params: &ChannelParams) -> Option<ChannelId> {
            self.next += 1;
            Some(self.next)
        }
        fn set_channel_gain(&mut self, _channel: ChannelId, _gain: f32) {}
        fn set_channel_pitch(&mut self, _channel: ChannelId, _semitones: f32) {}
        fn pause_channel(&mut self, _channel: ChannelId) {}
        fn resume_channel(&mut self, _channel: ChannelId) {}
        fn stop_channel(&mut self, _channel: ChannelId) {}
        fn is_channel_finished(&self, _channel: ChannelId) -> bool {
            false
        }
    }

    fn new_engine() -> (EngineHandle, AudioEngine<SilentBackend>) {
        create_engine(
            EngineConfig::default(),
            Box::new(NullAssets),
            SilentBackend { next: 0 },
        )
    }

    #[test]
    fn test_config_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_real_voices, 32);
        assert_eq!(config.max_virtual_voices, 96);
        assert!(config.rng_seed.is_none());
    }

    #[test]
    fn test_fresh_engine_is_empty() {
        let (handle, mut engine) = new_engine();
        engine.tick(0.05);
        let stats = handle.statistics();
        assert_eq!(stats.real_voices, 0);
        assert_eq!(stats.free_voices, 32 + 96);
        assert_eq!(stats.dropped_plays, 0);
    }

    #[test]
    fn test_unknown_event_post_is_inert() {
        let (handle, mut engine) = new_engine();
        let instance = handle.post(999, soniq_core::NO_SOURCE, None);
        engine.tick(0.05);
        assert!(!instance.is_active());
        assert_eq!(handle.statistics().real_voices, 0);
    }

    #[test]
    fn test_event_registration_resolves_names() {
        let (handle, _engine) = new_engine();
        handle.register_event(EventDefinition::new(3, "Play_Door"));
        assert_eq!(handle.event_id("Play_Door"), Some(3));
        assert_eq!(handle.event_id("Play_Window"), None);
    }

    #[test]
    fn test_control_commands_reach_the_plane() {
        let (handle, mut engine) = new_engine();
        handle.register_rtpc(RtpcDefinition::normalized("Intensity"));
        engine.tick(0.01);
        handle.set_rtpc("Intensity", 0.6);
        handle.set_switch("Surface", "Gravel");
        engine.tick(0.01);

        assert_eq!(engine.rtpc("Intensity"), Some(0.6));
        assert_eq!(engine.switch("Surface"), Some("Gravel"));
    }
}

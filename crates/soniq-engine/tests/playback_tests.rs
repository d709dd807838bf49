//! AudioEngine Integration Tests
//!
//! Tests for:
//! - Posting events and channel creation through a recording backend
//! - Voice stealing under pool exhaustion and per-event instance caps
//! - Virtualization: demotion, promotion and resume-from-tracked-time
//! - Cooldowns and delayed actions
//! - Stop fades, pause/resume and per-instance volume
//! - Switch containers, ducking and crossfades driven end to end
//! - Blend containers re-weighting live channels as the RTPC moves
//! - Occlusion raycasts and the configured layer mask
//! - Lifecycle callbacks (started / finished)

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use soniq_containers::{
    BlendContainer, BlendCurve, ClipEntry, Container, FadeCurve, RoutingContainer, SwitchContainer,
};
use soniq_core::{ClipId, ContainerId, Position, NO_SOURCE};
use soniq_engine::{
    create_engine, Action, AudioEngine, ChannelId, ChannelParams, EngineConfig, EngineHandle,
    EventDefinition, NullAssets, OutputBackend, RtpcDefinition, SpatialQuery, StealPolicy,
};
use soniq_mix::{BusDefinition, DuckSettings};

// ═══════════════════════════════════════════════════════════════════════════════
// HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Default)]
struct BackendLog {
    next_channel: ChannelId,
    created: Vec<(ChannelId, ChannelParams)>,
    stopped: Vec<ChannelId>,
    paused: Vec<ChannelId>,
    resumed: Vec<ChannelId>,
    gains: HashMap<ChannelId, f32>,
    finished: HashSet<ChannelId>,
}

/// Backend that records every call; the test keeps a shared view of the log
#[derive(Clone)]
struct RecordingBackend {
    log: Arc<Mutex<BackendLog>>,
}

impl RecordingBackend {
    fn new() -> (Self, Arc<Mutex<BackendLog>>) {
        let log = Arc::new(Mutex::new(BackendLog::default()));
        (Self { log: Arc::clone(&log) }, log)
    }
}

impl OutputBackend for RecordingBackend {
    fn create_channel(&mut self, params: &ChannelParams) -> Option<ChannelId> {
        let mut log = self.log.lock();
        log.next_channel += 1;
        let id = log.next_channel;
        log.created.push((id, params.clone()));
        log.gains.insert(id, params.gain);
        Some(id)
    }

    fn set_channel_gain(&mut self, channel: ChannelId, gain: f32) {
        self.log.lock().gains.insert(channel, gain);
    }

    fn set_channel_pitch(&mut self, _channel: ChannelId, _semitones: f32) {}

    fn pause_channel(&mut self, channel: ChannelId) {
        self.log.lock().paused.push(channel);
    }

    fn resume_channel(&mut self, channel: ChannelId) {
        self.log.lock().resumed.push(channel);
    }

    fn stop_channel(&mut self, channel: ChannelId) {
        self.log.lock().stopped.push(channel);
    }

    fn is_channel_finished(&self, channel: ChannelId) -> bool {
        self.log.lock().finished.contains(&channel)
    }
}

fn test_config() -> EngineConfig {
    EngineConfig {
        voice_update_interval_secs: 0.01,
        rng_seed: Some(7),
        ..Default::default()
    }
}

fn engine_with(
    config: EngineConfig,
) -> (
    EngineHandle,
    AudioEngine<RecordingBackend>,
    Arc<Mutex<BackendLog>>,
) {
    let _ = env_logger::builder().is_test(true).try_init();
    let (backend, log) = RecordingBackend::new();
    let (handle, engine) = create_engine(config, Box::new(NullAssets), backend);
    (handle, engine, log)
}

/// Routing container with a single one-shot clip
fn one_shot(id: ContainerId, clip: ClipId) -> Container {
    let mut routing = RoutingContainer::new(id, format!("Routing_{id}"));
    routing.add_clip(ClipEntry::new(clip));
    Container::Routing(routing)
}

/// Routing container with a single looping clip (never ends naturally)
fn looper(id: ContainerId, clip: ClipId) -> Container {
    let mut routing = RoutingContainer::new(id, format!("Loop_{id}"));
    routing.add_clip(ClipEntry::new(clip).looping());
    Container::Routing(routing)
}

// ═══════════════════════════════════════════════════════════════════════════════
// POSTING AND CHANNEL CREATION
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_post_creates_channel_on_next_tick() {
    let (handle, mut engine, log) = engine_with(test_config());
    handle.register_container(one_shot(10, 100));
    handle.register_event(EventDefinition::simple_play(1, "Play_Thing", 10));

    let instance = handle.post(1, NO_SOURCE, None);
    assert!(!instance.is_active(), "no voices before the tick runs");

    engine.tick(0.01);

    let log = log.lock();
    assert_eq!(log.created.len(), 1);
    let (_, params) = &log.created[0];
    assert_eq!(params.clip, 100);
    assert_eq!(params.bus, 0);
    assert_eq!(params.start_secs, 0.0);
    assert!(instance.is_active());
    assert_eq!(handle.statistics().real_voices, 1);
}

#[test]
fn test_post_by_name_matches_post_by_id() {
    let (handle, mut engine, log) = engine_with(test_config());
    handle.register_container(one_shot(10, 100));
    handle.register_event(EventDefinition::simple_play(1, "Play_Thing", 10));

    handle.post_by_name("Play_Thing", NO_SOURCE, None);
    handle.post_by_name("Play_Unknown", NO_SOURCE, None);
    engine.tick(0.01);

    assert_eq!(log.lock().created.len(), 1);
}

#[test]
fn test_stop_source_only_hits_that_emitter() {
    let (handle, mut engine, log) = engine_with(test_config());
    handle.register_container(looper(10, 100));
    handle.register_event(EventDefinition::simple_play(1, "Play_Loop", 10));

    handle.post(1, 41, None);
    handle.post(1, 42, None);
    engine.tick(0.05);
    assert_eq!(handle.statistics().real_voices, 2);

    handle.stop_source(41, 0.0);
    engine.tick(0.05);

    assert_eq!(handle.statistics().real_voices, 1);
    assert_eq!(log.lock().stopped.len(), 1);
}

// ═══════════════════════════════════════════════════════════════════════════════
// STEALING
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_lowest_priority_steal_evicts_low_voice() {
    let config = EngineConfig {
        max_real_voices: 2,
        max_virtual_voices: 0,
        ..test_config()
    };
    let (handle, mut engine, log) = engine_with(config);
    handle.register_container(looper(10, 100));
    handle.register_container(looper(11, 101));
    handle.register_container(looper(12, 102));
    handle.register_event(EventDefinition::simple_play(1, "Play_Low", 10).with_priority(64));
    handle.register_event(EventDefinition::simple_play(2, "Play_High", 11).with_priority(192));
    handle.register_event(
        EventDefinition::simple_play(3, "Play_Mid", 12)
            .with_priority(128)
            .with_max_instances(0, StealPolicy::LowestPriority),
    );

    let low = handle.post(1, NO_SOURCE, None);
    engine.tick(0.01);
    handle.post(2, NO_SOURCE, None);
    engine.tick(0.01);
    handle.post(3, NO_SOURCE, None);
    engine.tick(0.01);

    let log = log.lock();
    assert_eq!(log.created.len(), 3);
    // The low-priority voice lost its slot, not the high one
    let low_channel = log.created[0].0;
    assert!(log.stopped.contains(&low_channel));
    assert!(!low.is_active());
    assert_eq!(handle.statistics().real_voices, 2);
}

#[test]
fn test_steal_refused_when_nothing_qualifies() {
    let config = EngineConfig {
        max_real_voices: 1,
        max_virtual_voices: 0,
        ..test_config()
    };
    let (handle, mut engine, log) = engine_with(config);
    handle.register_container(looper(10, 100));
    handle.register_container(looper(11, 101));
    handle.register_event(EventDefinition::simple_play(1, "Play_Critical", 10).with_priority(255));
    handle.register_event(
        EventDefinition::simple_play(2, "Play_Normal", 11)
            .with_priority(128)
            .with_max_instances(0, StealPolicy::LowestPriority),
    );

    handle.post(1, NO_SOURCE, None);
    engine.tick(0.01);
    handle.post(2, NO_SOURCE, None);
    engine.tick(0.01);

    assert_eq!(log.lock().created.len(), 1);
    let stats = handle.statistics();
    assert_eq!(stats.real_voices, 1);
    assert_eq!(stats.dropped_plays, 1);
}

#[test]
fn test_instance_cap_steals_within_the_event() {
    let (handle, mut engine, log) = engine_with(test_config());
    handle.register_container(looper(10, 100));
    handle.register_event(
        EventDefinition::simple_play(1, "Play_Capped", 10)
            .with_max_instances(1, StealPolicy::Oldest),
    );

    handle.post(1, NO_SOURCE, None);
    engine.tick(0.01);
    handle.post(1, NO_SOURCE, None);
    engine.tick(0.01);

    let log = log.lock();
    assert_eq!(log.created.len(), 2);
    assert!(log.stopped.contains(&log.created[0].0));
    assert_eq!(handle.statistics().real_voices, 1);
}

#[test]
fn test_instance_cap_counts_posts_and_evicts_whole_instance() {
    let (handle, mut engine, log) = engine_with(test_config());
    let mut layered = RoutingContainer::new(10, "Layered");
    layered.add_clip(ClipEntry::new(100).looping());
    layered.add_clip(ClipEntry::new(101).looping());
    handle.register_container(Container::Routing(layered));
    handle.register_event(
        EventDefinition::simple_play(1, "Play_Layered", 10)
            .with_max_instances(2, StealPolicy::Oldest),
    );

    // Each post is one instance even though it holds two voices
    handle.post(1, NO_SOURCE, None);
    engine.tick(0.01);
    handle.post(1, NO_SOURCE, None);
    engine.tick(0.01);
    {
        let log = log.lock();
        assert_eq!(log.created.len(), 4);
        assert!(log.stopped.is_empty(), "a post within the cap stole a voice");
        assert_eq!(handle.statistics().real_voices, 4);
    }

    // Crossing the cap evicts every voice of the oldest instance
    handle.post(1, NO_SOURCE, None);
    engine.tick(0.01);
    let log = log.lock();
    let first_post: Vec<ChannelId> = log.created[..2].iter().map(|(c, _)| *c).collect();
    assert!(first_post.iter().all(|c| log.stopped.contains(c)));
    assert_eq!(handle.statistics().real_voices, 4);
}

// ═══════════════════════════════════════════════════════════════════════════════
// VIRTUALIZATION
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_over_budget_voice_starts_virtual() {
    let config = EngineConfig {
        max_real_voices: 1,
        max_virtual_voices: 4,
        ..test_config()
    };
    let (handle, mut engine, log) = engine_with(config);
    handle.register_container(looper(10, 100));
    handle.register_container(looper(11, 101));
    handle.register_event(EventDefinition::simple_play(1, "Play_A", 10));
    handle.register_event(EventDefinition::simple_play(2, "Play_B", 11));

    handle.post(1, NO_SOURCE, None);
    engine.tick(0.1);
    handle.post(2, NO_SOURCE, None);
    engine.tick(0.1);

    assert_eq!(log.lock().created.len(), 1, "second voice gets no channel");
    let stats = handle.statistics();
    assert_eq!(stats.real_voices, 1);
    assert_eq!(stats.virtual_voices, 1);
}

#[test]
fn test_promotion_resumes_from_tracked_time() {
    let config = EngineConfig {
        max_real_voices: 1,
        max_virtual_voices: 4,
        ..test_config()
    };
    let (handle, mut engine, log) = engine_with(config);
    handle.register_container(looper(10, 100));
    handle.register_container(looper(11, 101));
    handle.register_event(EventDefinition::simple_play(1, "Play_A", 10));
    handle.register_event(EventDefinition::simple_play(2, "Play_B", 11));

    let first = handle.post(1, NO_SOURCE, None);
    engine.tick(0.1);
    handle.post(2, NO_SOURCE, None);
    engine.tick(0.1); // B virtual, clock at 0.1
    engine.tick(0.1); // clock at 0.2

    first.stop(0.0);
    engine.tick(0.1); // A freed, B promoted at 0.3

    let log = log.lock();
    assert_eq!(log.created.len(), 2);
    let (_, params) = &log.created[1];
    assert_eq!(params.clip, 101);
    assert!(
        (params.start_secs - 0.3).abs() < 1e-3,
        "resumed at {} instead of the tracked 0.3",
        params.start_secs
    );
    let stats = handle.statistics();
    assert_eq!(stats.real_voices, 1);
    assert_eq!(stats.virtual_voices, 0);
}

// ═══════════════════════════════════════════════════════════════════════════════
// ADMISSION TIMING
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_cooldown_rejects_rapid_reposts() {
    let (handle, mut engine, log) = engine_with(test_config());
    handle.register_container(one_shot(10, 100));
    handle.register_event(
        EventDefinition::simple_play(1, "Play_Gated", 10).with_cooldown(1.0),
    );

    handle.post(1, NO_SOURCE, None);
    engine.tick(0.05);
    handle.post(1, NO_SOURCE, None);
    engine.tick(0.05);
    assert_eq!(log.lock().created.len(), 1, "second post inside cooldown");

    engine.tick(1.0);
    handle.post(1, NO_SOURCE, None);
    engine.tick(0.05);
    assert_eq!(log.lock().created.len(), 2);
}

#[test]
fn test_delayed_play_waits_for_its_due_time() {
    let (handle, mut engine, log) = engine_with(test_config());
    handle.register_container(one_shot(10, 100));
    handle.register_event(
        EventDefinition::new(1, "Play_Later").with_action(Action::play(10, 0).with_delay(0.5)),
    );

    handle.post(1, NO_SOURCE, None);
    engine.tick(0.1);
    assert!(log.lock().created.is_empty());
    engine.tick(0.3);
    assert!(log.lock().created.is_empty(), "still before the due time");
    engine.tick(0.2);
    assert_eq!(log.lock().created.len(), 1);
}

// ═══════════════════════════════════════════════════════════════════════════════
// INSTANCE CONTROL
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_stop_fade_ramps_then_frees() {
    let (handle, mut engine, log) = engine_with(test_config());
    handle.register_container(looper(10, 100));
    handle.register_event(EventDefinition::simple_play(1, "Play_Loop", 10));

    let instance = handle.post(1, NO_SOURCE, None);
    engine.tick(0.05);
    let channel = log.lock().created[0].0;

    instance.stop(0.4);
    engine.tick(0.05);
    {
        let log = log.lock();
        let gain = log.gains[&channel];
        assert!(gain < 1.0 && gain > 0.0, "mid-fade gain was {gain}");
        assert_eq!(handle.statistics().stopping_voices, 1);
    }

    engine.tick(0.5);
    assert!(log.lock().stopped.contains(&channel));
    assert!(!instance.is_active());
    assert_eq!(handle.statistics().real_voices, 0);
}

#[test]
fn test_stop_fade_completes_while_paused() {
    let (handle, mut engine, log) = engine_with(test_config());
    handle.register_container(looper(10, 100));
    handle.register_event(EventDefinition::simple_play(1, "Play_Loop", 10));

    let instance = handle.post(1, NO_SOURCE, None);
    engine.tick(0.05);
    let channel = log.lock().created[0].0;

    instance.pause();
    engine.tick(0.05);
    instance.stop(0.2);
    engine.tick(0.05);
    assert_eq!(handle.statistics().stopping_voices, 1);

    // The fade keeps running under pause so the slot still frees
    engine.tick(0.3);
    assert!(log.lock().stopped.contains(&channel));
    assert!(!instance.is_active());
    assert_eq!(handle.statistics().stopping_voices, 0);
    assert_eq!(handle.statistics().free_voices, 32 + 96);
}

#[test]
fn test_pause_freezes_the_playback_clock() {
    let (handle, mut engine, log) = engine_with(test_config());
    handle.register_container(looper(10, 100));
    handle.register_event(EventDefinition::simple_play(1, "Play_Loop", 10));

    let instance = handle.post(1, NO_SOURCE, None);
    engine.tick(0.1);
    let position = engine.playback_position(instance.playing_id()).unwrap();

    instance.pause();
    engine.tick(0.1);
    engine.tick(0.1);
    assert_eq!(
        engine.playback_position(instance.playing_id()),
        Some(position)
    );
    assert_eq!(log.lock().paused.len(), 1);

    instance.resume();
    engine.tick(0.1);
    assert!(engine.playback_position(instance.playing_id()).unwrap() > position);
    assert_eq!(log.lock().resumed.len(), 1);
}

#[test]
fn test_instance_volume_rescales_the_base() {
    let (handle, mut engine, log) = engine_with(test_config());
    handle.register_container(looper(10, 100));
    handle.register_event(EventDefinition::simple_play(1, "Play_Loop", 10));

    let instance = handle.post(1, NO_SOURCE, None);
    engine.tick(0.05);
    let channel = log.lock().created[0].0;
    assert!((log.lock().gains[&channel] - 1.0).abs() < 1e-5);

    instance.set_volume(0.5);
    engine.tick(0.05);
    assert!((log.lock().gains[&channel] - 0.5).abs() < 1e-5);
}

// ═══════════════════════════════════════════════════════════════════════════════
// CALLBACKS
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_started_and_finished_callbacks() {
    let (handle, mut engine, log) = engine_with(test_config());
    handle.register_container(one_shot(10, 100));
    handle.register_event(EventDefinition::simple_play(1, "Play_Once", 10));

    let mut instance = handle.post(1, NO_SOURCE, None);
    let started = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicUsize::new(0));
    {
        let seen = Arc::clone(&started);
        instance.on_started(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        let seen = Arc::clone(&finished);
        instance.on_finished(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
    }

    engine.tick(0.05);
    assert_eq!(started.load(Ordering::SeqCst), 1);
    assert_eq!(finished.load(Ordering::SeqCst), 0);

    let channel = log.lock().created[0].0;
    log.lock().finished.insert(channel);
    engine.tick(0.05);
    assert_eq!(finished.load(Ordering::SeqCst), 1);
    assert!(!instance.is_active());

    // No double fire once the post is gone
    engine.tick(0.05);
    assert_eq!(finished.load(Ordering::SeqCst), 1);
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONTENT SELECTION THROUGH THE ENGINE
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_switch_container_follows_the_control_plane() {
    let (handle, mut engine, log) = engine_with(test_config());
    handle.register_container(one_shot(11, 111));
    handle.register_container(one_shot(12, 112));
    handle.register_container(Container::Switch(
        SwitchContainer::new(10, "Footstep_Surface", "Surface")
            .map("Grass", 11)
            .with_default(12),
    ));
    handle.register_event(EventDefinition::simple_play(1, "Play_Footstep", 10));

    // Unset switch group falls back to the default child
    handle.post(1, NO_SOURCE, None);
    engine.tick(0.01);
    assert_eq!(log.lock().created[0].1.clip, 112);

    handle.set_switch("Surface", "Grass");
    handle.post(1, NO_SOURCE, None);
    engine.tick(0.01);
    assert_eq!(log.lock().created[1].1.clip, 111);
}

// ═══════════════════════════════════════════════════════════════════════════════
// MIXING THROUGH EVENTS
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_trigger_ducking_attenuates_target_bus() {
    let (handle, mut engine, log) = engine_with(test_config());
    handle.add_bus(BusDefinition::new(1, "Music", 0));
    handle.add_bus(
        BusDefinition::new(2, "VO", 0)
            .with_ducking(DuckSettings::new([1], -12.0).with_times(0.1, 0.1, 0.2)),
    );
    handle.register_container(looper(10, 100));
    handle.register_event(
        EventDefinition::new(1, "Play_Music").with_action(Action::play(10, 1)),
    );
    handle.register_event(EventDefinition::new(2, "Duck_Music").with_action(
        Action::TriggerDucking {
            bus: 2,
            delay_secs: 0.0,
        },
    ));

    handle.post(1, NO_SOURCE, None);
    engine.tick(0.05);
    let channel = log.lock().created[0].0;
    assert!((log.lock().gains[&channel] - 1.0).abs() < 1e-5);

    handle.post(2, NO_SOURCE, None);
    engine.tick(0.05);
    let gain = log.lock().gains[&channel];
    let floor = soniq_core::db_to_linear(-12.0);
    assert!(
        gain < 1.0 && gain > floor,
        "mid-attack duck gain was {gain}"
    );
}

#[test]
fn test_crossfade_swaps_containers() {
    let (handle, mut engine, log) = engine_with(test_config());
    handle.register_container(looper(10, 100));
    handle.register_container(looper(11, 101));
    handle.register_event(EventDefinition::simple_play(1, "Play_Day", 10));
    handle.register_event(EventDefinition::new(2, "To_Night").with_action(
        Action::CrossFade {
            from: 10,
            to: 11,
            bus: 0,
            duration_secs: 0.2,
            curve: FadeCurve::EqualPower,
            delay_secs: 0.0,
        },
    ));

    handle.post(1, NO_SOURCE, None);
    engine.tick(0.05);
    let day_channel = log.lock().created[0].0;

    handle.post(2, NO_SOURCE, None);
    engine.tick(0.05);
    {
        let log = log.lock();
        assert_eq!(log.created.len(), 2);
        let night_channel = log.created[1].0;
        let day_gain = log.gains[&day_channel];
        let night_gain = log.gains[&night_channel];
        assert!(day_gain < 1.0 && day_gain > 0.0);
        assert!(night_gain > 0.0 && night_gain < 1.0);
    }

    engine.tick(0.3);
    let log = log.lock();
    let night_channel = log.created[1].0;
    assert!(log.stopped.contains(&day_channel));
    assert!((log.gains[&night_channel] - 1.0).abs() < 1e-3);
    assert_eq!(handle.statistics().real_voices, 1);
}

#[test]
fn test_crossfade_completion_spares_reused_slot() {
    let (handle, mut engine, log) = engine_with(test_config());
    handle.register_container(one_shot(10, 100));
    handle.register_container(looper(11, 101));
    handle.register_container(looper(12, 102));
    handle.register_event(EventDefinition::simple_play(1, "Play_Day", 10));
    handle.register_event(EventDefinition::new(2, "To_Night").with_action(
        Action::CrossFade {
            from: 10,
            to: 11,
            bus: 0,
            duration_secs: 0.4,
            curve: FadeCurve::EqualPower,
            delay_secs: 0.0,
        },
    ));
    handle.register_event(EventDefinition::simple_play(3, "Play_Other", 12));

    handle.post(1, NO_SOURCE, None);
    engine.tick(0.01);
    let day_channel = log.lock().created[0].0;

    handle.post(2, NO_SOURCE, None);
    engine.tick(0.01);

    // The outgoing one-shot ends naturally mid-fade, freeing its slot
    log.lock().finished.insert(day_channel);
    engine.tick(0.01);
    assert!(log.lock().stopped.contains(&day_channel));

    // An unrelated post reuses the freed slot while the fade still runs
    handle.post(3, NO_SOURCE, None);
    engine.tick(0.01);
    let other_channel = log.lock().created[2].0;

    engine.tick(0.5);
    let log = log.lock();
    assert!(
        !log.stopped.contains(&other_channel),
        "crossfade completion stopped a voice that reused the freed slot"
    );
    assert!((log.gains[&other_channel] - 1.0).abs() < 1e-3);
    assert_eq!(handle.statistics().real_voices, 2);
}

#[test]
fn test_blend_follows_rtpc_while_playing() {
    let (handle, mut engine, log) = engine_with(test_config());
    handle.register_container(looper(11, 101));
    handle.register_container(looper(12, 102));
    let mut blend = BlendContainer::new(10, "Wind", "Intensity");
    blend.add_child(11, BlendCurve::ramp_down(0.0, 1.0));
    blend.add_child(12, BlendCurve::ramp_up(0.0, 1.0));
    handle.register_container(Container::Blend(blend));
    handle.register_rtpc(RtpcDefinition::normalized("Intensity"));
    handle.register_event(EventDefinition::simple_play(1, "Play_Wind", 10));

    handle.post(1, NO_SOURCE, None);
    engine.tick(0.01);
    let (calm, intense) = {
        let log = log.lock();
        assert_eq!(log.created.len(), 2);
        let calm = log.created.iter().find(|(_, p)| p.clip == 101).unwrap().0;
        let intense = log.created.iter().find(|(_, p)| p.clip == 102).unwrap().0;
        assert!((log.gains[&calm] - 1.0).abs() < 1e-3);
        assert!(log.gains[&intense] < 1e-3);
        (calm, intense)
    };

    // Moving the RTPC after the post re-weights the live channels
    handle.set_rtpc("Intensity", 0.75);
    engine.tick(0.01);
    let log = log.lock();
    assert!((log.gains[&calm] - 0.25).abs() < 1e-3);
    assert!((log.gains[&intense] - 0.75).abs() < 1e-3);
}

// ═══════════════════════════════════════════════════════════════════════════════
// OCCLUSION
// ═══════════════════════════════════════════════════════════════════════════════

/// World where every ray is blocked; records the masks it was asked about
struct BlockingWorld {
    masks: Arc<Mutex<Vec<u32>>>,
}

impl SpatialQuery for BlockingWorld {
    fn raycast(&self, _from: Position, _to: Position, mask: u32) -> bool {
        self.masks.lock().push(mask);
        true
    }
}

#[test]
fn test_occlusion_raycast_carries_the_layer_mask() {
    let config = EngineConfig {
        occlusion_interval_secs: 0.01,
        occlusion_mask: 0b0100,
        ..test_config()
    };
    let (handle, mut engine, log) = engine_with(config);
    let masks = Arc::new(Mutex::new(Vec::new()));
    engine.set_spatial_query(Box::new(BlockingWorld {
        masks: Arc::clone(&masks),
    }));
    handle.register_container(looper(10, 100));
    handle.register_event(EventDefinition::simple_play(1, "Play_Spatial", 10));

    handle.post(1, NO_SOURCE, Some(Position::new(4.0, 0.0, 0.0)));
    engine.tick(0.05);
    engine.tick(0.05);

    assert!(!masks.lock().is_empty());
    assert!(masks.lock().iter().all(|&m| m == 0b0100));
    let log = log.lock();
    let channel = log.created[0].0;
    let gain = log.gains[&channel];
    assert!((gain - 0.35).abs() < 1e-3, "occluded gain was {gain}");
}

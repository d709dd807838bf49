//! Caller-facing instance handle and voice callbacks
//!
//! A handle is a lightweight reference to the voices spawned by one
//! `post()` call. It owns no voices — they can end, be stolen, or outlive
//! the handle — and none of its operations block: every control call is
//! queued and applied at the start of the next tick.
//!
//! Callbacks are invoked synchronously during the tick that triggers
//! them. Dropping the handle detaches the callbacks it registered, but
//! does not stop its voices; `stop()` does that.

use soniq_core::PlayingId;
use std::sync::Arc;

use crate::engine::{EngineCommand, EngineShared};

// ═══════════════════════════════════════════════════════════════════════════════
// CALLBACKS
// ═══════════════════════════════════════════════════════════════════════════════

/// Which playback moment a callback observes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceCallbackKind {
    /// First voice of the post became audible
    Started,
    /// A looping voice wrapped
    Loop,
    /// The post's last voice ended (naturally, stopped, or stolen)
    Finished,
}

pub type CallbackId = u64;

/// Unsubscribe token returned by `on_started`/`on_loop`/`on_finished`
#[derive(Debug, PartialEq, Eq)]
pub struct CallbackToken {
    pub(crate) id: CallbackId,
}

type VoiceCallback = Box<dyn FnMut(PlayingId) + Send>;

struct CallbackEntry {
    id: CallbackId,
    playing_id: PlayingId,
    kind: VoiceCallbackKind,
    callback: VoiceCallback,
}

/// Ids stay unique even when the registry is swapped out of its mutex
/// while the tick invokes callbacks
static NEXT_CALLBACK_ID: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(1);

/// Observer table shared between handles (registration) and the engine
/// tick (invocation)
pub(crate) struct CallbackRegistry {
    entries: Vec<CallbackEntry>,
}

impl CallbackRegistry {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub(crate) fn subscribe(
        &mut self,
        playing_id: PlayingId,
        kind: VoiceCallbackKind,
        callback: VoiceCallback,
    ) -> CallbackId {
        let id = NEXT_CALLBACK_ID.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.entries.push(CallbackEntry {
            id,
            playing_id,
            kind,
            callback,
        });
        id
    }

    pub(crate) fn unsubscribe(&mut self, id: CallbackId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        self.entries.len() != before
    }

    /// Invoke every observer of (playing_id, kind)
    pub(crate) fn fire(&mut self, playing_id: PlayingId, kind: VoiceCallbackKind) {
        for entry in &mut self.entries {
            if entry.playing_id == playing_id && entry.kind == kind {
                (entry.callback)(playing_id);
            }
        }
    }

    /// Drop observers of posts that have fully finished
    pub(crate) fn remove_for(&mut self, playing_id: PlayingId) {
        self.entries.retain(|e| e.playing_id != playing_id);
    }

    /// Prepend `older` entries, keeping subscriptions made while the
    /// registry was swapped out during a firing pass
    pub(crate) fn absorb_older(&mut self, mut older: CallbackRegistry) {
        std::mem::swap(&mut self.entries, &mut older.entries);
        self.entries.append(&mut older.entries);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// INSTANCE HANDLE
// ═══════════════════════════════════════════════════════════════════════════════

/// Reference to the voices spawned by one `post()` call
pub struct InstanceHandle {
    playing_id: PlayingId,
    shared: Arc<EngineShared>,
    /// Callback ids this handle registered, detached on drop
    tokens: Vec<CallbackId>,
}

impl InstanceHandle {
    pub(crate) fn new(playing_id: PlayingId, shared: Arc<EngineShared>) -> Self {
        Self {
            playing_id,
            shared,
            tokens: Vec::new(),
        }
    }

    #[inline]
    pub fn playing_id(&self) -> PlayingId {
        self.playing_id
    }

    /// True while at least one voice of this post is live. A post that
    /// was rejected or dropped never becomes active.
    pub fn is_active(&self) -> bool {
        self.shared.active_playing.read().contains(&self.playing_id)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // CONTROL (queued, applied on the next tick)
    // ═══════════════════════════════════════════════════════════════════════════

    /// Rescale this post's voices; 1.0 restores the authored gain
    pub fn set_volume(&self, gain: f32) {
        self.shared.push_command(EngineCommand::SetVoiceVolume {
            playing_id: self.playing_id,
            gain: gain.max(0.0),
        });
    }

    pub fn set_pitch(&self, semitones: f32) {
        self.shared.push_command(EngineCommand::SetVoicePitch {
            playing_id: self.playing_id,
            semitones,
        });
    }

    pub fn stop(&self, fade_secs: f32) {
        self.shared.push_command(EngineCommand::StopPlaying {
            playing_id: self.playing_id,
            fade_secs: fade_secs.max(0.0),
        });
    }

    pub fn pause(&self) {
        self.shared.push_command(EngineCommand::PausePlaying {
            playing_id: self.playing_id,
        });
    }

    pub fn resume(&self) {
        self.shared.push_command(EngineCommand::ResumePlaying {
            playing_id: self.playing_id,
        });
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // OBSERVERS
    // ═══════════════════════════════════════════════════════════════════════════

    fn subscribe(
        &mut self,
        kind: VoiceCallbackKind,
        callback: impl FnMut(PlayingId) + Send + 'static,
    ) -> CallbackToken {
        let id = self
            .shared
            .callbacks
            .lock()
            .subscribe(self.playing_id, kind, Box::new(callback));
        self.tokens.push(id);
        CallbackToken { id }
    }

    pub fn on_started(&mut self, callback: impl FnMut(PlayingId) + Send + 'static) -> CallbackToken {
        self.subscribe(VoiceCallbackKind::Started, callback)
    }

    pub fn on_loop(&mut self, callback: impl FnMut(PlayingId) + Send + 'static) -> CallbackToken {
        self.subscribe(VoiceCallbackKind::Loop, callback)
    }

    pub fn on_finished(&mut self, callback: impl FnMut(PlayingId) + Send + 'static) -> CallbackToken {
        self.subscribe(VoiceCallbackKind::Finished, callback)
    }

    pub fn unsubscribe(&mut self, token: CallbackToken) -> bool {
        self.tokens.retain(|id| *id != token.id);
        self.shared.callbacks.lock().unsubscribe(token.id)
    }
}

impl Drop for InstanceHandle {
    fn drop(&mut self) {
        if self.tokens.is_empty() {
            return;
        }
        let mut callbacks = self.shared.callbacks.lock();
        for id in self.tokens.drain(..) {
            callbacks.unsubscribe(id);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_registry_fires_matching_kind_only() {
        let mut registry = CallbackRegistry::new();
        let started = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicUsize::new(0));

        let s = Arc::clone(&started);
        registry.subscribe(
            1,
            VoiceCallbackKind::Started,
            Box::new(move |_| {
                s.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let f = Arc::clone(&finished);
        registry.subscribe(
            1,
            VoiceCallbackKind::Finished,
            Box::new(move |_| {
                f.fetch_add(1, Ordering::SeqCst);
            }),
        );

        registry.fire(1, VoiceCallbackKind::Started);
        registry.fire(2, VoiceCallbackKind::Started);
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_registry_unsubscribe() {
        let mut registry = CallbackRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let id = registry.subscribe(
            1,
            VoiceCallbackKind::Loop,
            Box::new(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        );

        registry.fire(1, VoiceCallbackKind::Loop);
        assert!(registry.unsubscribe(id));
        assert!(!registry.unsubscribe(id));
        registry.fire(1, VoiceCallbackKind::Loop);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}

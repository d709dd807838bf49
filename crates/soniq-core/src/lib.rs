//! Soniq Core — shared vocabulary for the event/mixing runtime
//!
//! Identifier aliases, priority scale, decibel math and the `GainStack`
//! used by every other crate in the workspace.

pub mod error;
pub mod gain;

pub use error::{EngineError, EngineResult};
pub use gain::{Decibels, GainStack, db_to_linear, linear_to_db};

use std::sync::atomic::{AtomicU64, Ordering};

// ═══════════════════════════════════════════════════════════════════════════════
// IDENTIFIERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Event definition identifier
pub type EventId = u32;

/// Container definition identifier
pub type ContainerId = u32;

/// Audio clip (asset) identifier
pub type ClipId = u32;

/// Bus identifier — index into the bus graph arena
pub type BusId = u32;

/// Voice slot identifier — index into the voice pool
pub type VoiceId = u32;

/// State definition identifier
pub type StateId = u32;

/// Unique identifier for one `post()` call and the voices it spawned
pub type PlayingId = u64;

/// Emitter (sound source) identifier supplied by the caller
pub type SourceId = u64;

/// The root bus — always present, has no parent
pub const MASTER_BUS: BusId = 0;

/// Source id meaning "no emitter / global scope"
pub const NO_SOURCE: SourceId = 0;

/// Invalid playing id (returned for rejected posts before any id is minted)
pub const INVALID_PLAYING_ID: PlayingId = 0;

// ═══════════════════════════════════════════════════════════════════════════════
// PLAYING ID GENERATION
// ═══════════════════════════════════════════════════════════════════════════════

static NEXT_PLAYING_ID: AtomicU64 = AtomicU64::new(1);

/// Generate a process-unique playing id
#[inline]
pub fn generate_playing_id() -> PlayingId {
    NEXT_PLAYING_ID.fetch_add(1, Ordering::Relaxed)
}

// ═══════════════════════════════════════════════════════════════════════════════
// PRIORITY
// ═══════════════════════════════════════════════════════════════════════════════

/// Voice priority, 0 (first to steal) to 255 (never stolen)
pub type Priority = u8;

/// Default priority for voices that do not specify one
pub const PRIORITY_DEFAULT: Priority = 128;

/// Critical priority — voices at this level are exempt from stealing
pub const PRIORITY_CRITICAL: Priority = 255;

/// 3D position used for distance/occlusion queries
#[derive(Debug, Clone, Copy, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Position {
    pub const ORIGIN: Self = Self { x: 0.0, y: 0.0, z: 0.0 };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Euclidean distance to another position
    #[inline]
    pub fn distance_to(&self, other: &Position) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

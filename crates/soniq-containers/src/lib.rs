//! Soniq Containers — polymorphic content selection
//!
//! A container describes how clips are organized and picked. The five
//! variants are a tagged union dispatched by pattern matching in the
//! resolver:
//! - **Routing** — play every assigned clip (layers)
//! - **Random** — weighted sampling, avoiding the last *k* picks
//! - **Sequence** — stateful index with four advance policies
//! - **Switch** — exact-match lookup on a switch group, with default
//! - **Blend** — all children at once, gains driven by an RTPC curve
//!
//! Selection state (random history, sequence position) lives outside the
//! definitions so the definitions stay immutable and shareable.

pub mod container;
pub mod curve;
pub mod resolver;

pub use container::{
    BlendChild, BlendContainer, ClipEntry, Container, ContainerState, RandomClip, RandomContainer,
    RandomState, RoutingContainer, SequenceContainer, SequenceMode, SequenceState, SwitchContainer,
};
pub use curve::{BlendCurve, CurvePoint, FadeCurve, equal_power_gains};
pub use resolver::{ContainerStore, ControlView, PlayIntent, RtpcLink, resolve};

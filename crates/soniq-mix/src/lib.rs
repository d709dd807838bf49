//! Soniq Mix — hierarchical bus graph
//!
//! Buses live in an arena indexed by `BusId`; the parent relationship is
//! an index, so cycles are rejected at insertion and traversal needs no
//! ownership gymnastics. Effective gain is resolved by walking to the
//! root, with mute short-circuit, the global solo rule, and scheduler-
//! driven decibel-space volume transitions. Ducking envelopes are owned
//! by the graph and ticked alongside it.

pub mod ducking;
pub mod graph;

pub use ducking::{DuckEnvelope, DuckPhase, DuckSettings};
pub use graph::{BusDefinition, BusGraph, EffectSend};

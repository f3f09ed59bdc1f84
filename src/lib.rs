//! Object Detection Event (ODE) engine.
//!
//! This crate implements a per-frame evaluation engine for video analytics
//! pipelines. The host delivers inferred object metadata once per frame; the
//! engine applies a family of detection predicates (Triggers) against
//! declared spatial regions (Areas) and dispatches matches to user-supplied
//! effects (Actions). A companion heat mapper accumulates spatial occurrence
//! statistics onto a discrete grid.
//!
//! # Architecture
//!
//! - `geometry`: point/rectangle distance, overlap, and polygon tests
//! - `display`: shape records appended for the host's overlay layer
//! - `area`: inclusion/exclusion polygons and cross-detection lines
//! - `tracking`: per-(source, object) trajectory history with purge
//! - `trigger`: the trigger family and its shared filter pipeline
//! - `heat_mapper`: grid occurrence accumulation and rendering
//! - `engine`: the registration-ordered per-frame dispatch driver
//! - `action`: the effect dispatch contract and minimal built-ins
//! - `scheduler`: single-shot timer facility behind a trait
//! - `config`: JSON engine configuration
//!
//! Every frame runs the same three-phase protocol: `pre_process_frame` on
//! all triggers, `check_for_occurrence` for every object on all triggers,
//! then `post_process_frame` on all triggers. Triggers run in registration
//! order; a trigger's children run in insertion order.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub mod action;
pub mod area;
pub mod config;
pub mod display;
pub mod engine;
pub mod geometry;
pub mod heat_mapper;
pub mod scheduler;
pub mod tracking;
pub mod trigger;

pub use action::{
    action_ref, ActionRef, CaptureAction, CapturedEvent, FormatBboxAction, LogAction, OdeAction,
    OdeOccurrence,
};
pub use area::{AreaKind, OdeArea};
pub use config::EngineConfig;
pub use display::{ColorPalette, DisplayMeta, PolylineDisplay, RectangleDisplay, RgbaColor};
pub use engine::{OdeContext, OdeEngine};
pub use geometry::{BboxTestPoint, Point, Rectangle};
pub use heat_mapper::OdeHeatMapper;
pub use scheduler::{ManualScheduler, Scheduler, ThreadScheduler, TimerId};
pub use tracking::{TraceTestMethod, TrackedObject, TrackedObjectsStore};
pub use trigger::{DistanceMethod, LimitEvent, ListenerId, OdeTrigger, When};

/// Class-id wildcard: the trigger matches objects of every class.
pub const ANY_CLASS: u32 = u32::MAX;

// -------------------- Frame & object metadata --------------------

/// Writable side-table the engine stamps onto an object for downstream
/// actions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    /// Variant-defined metric: occurrence ordinal, extremum area, pair
    /// ordinal, or persistence seconds, depending on the trigger.
    pub primary_metric: u64,
    /// Tracked duration in whole seconds, for persistence-style triggers.
    pub persistence: u64,
}

/// Writable side-table the engine stamps onto a frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameInfo {
    /// Occurrence count reported by counting triggers this frame.
    pub occurrences: u64,
}

/// Read-only view of one inferred object, plus its writable side-table.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub class_id: u32,
    /// Tracker-assigned id, unique and monotonic per (source, class).
    pub object_id: u64,
    /// Id of the inference component that produced this object.
    pub unique_component_id: u32,
    /// Detector confidence; zero means unspecified.
    pub confidence: f32,
    pub rect_params: geometry::Rectangle,
    pub misc_obj_info: ObjectInfo,
}

/// Read-only view of one frame's metadata, plus its writable side-table.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FrameMeta {
    pub source_id: u32,
    pub frame_num: u64,
    pub source_frame_width: u32,
    pub source_frame_height: u32,
    /// True when the inference stage ran on this frame (vs. tracker-only).
    pub infer_done: bool,
    /// Stream wall-clock of the frame in milliseconds.
    pub ntp_timestamp_ms: u64,
    pub misc_frame_info: FrameInfo,
}

// -------------------- Name resolution --------------------

/// Host-supplied name-to-id resolution for source and inference-component
/// filters.
///
/// Resolution is lazy and one-shot: a trigger asks at most once per
/// configured name, then caches the answer until the name is reassigned. A
/// `None` answer leaves the filter permanently unmatched (and is logged);
/// it is not a fatal error.
pub trait NameResolver: Send + Sync {
    fn source_id_get(&self, name: &str) -> Option<u32>;
    fn infer_id_get(&self, name: &str) -> Option<u32>;
}

/// Fixed-table resolver for hosts with a static component layout, and for
/// tests.
#[derive(Debug, Default)]
pub struct StaticNameResolver {
    sources: HashMap<String, u32>,
    infers: HashMap<String, u32>,
}

impl StaticNameResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, name: &str, id: u32) -> Self {
        self.sources.insert(name.to_string(), id);
        self
    }

    pub fn with_infer(mut self, name: &str, id: u32) -> Self {
        self.infers.insert(name.to_string(), id);
        self
    }
}

impl NameResolver for StaticNameResolver {
    fn source_id_get(&self, name: &str) -> Option<u32> {
        self.sources.get(name).copied()
    }

    fn infer_id_get(&self, name: &str) -> Option<u32> {
        self.infers.get(name).copied()
    }
}

//! Per-object trajectory tracking.
//!
//! Tracking triggers (persistence, cross, earliest/latest) keep one
//! [`TrackedObject`] per `(source_id, object_id)` pair, holding a bounded
//! history of observed bounding boxes. Entries not seen in the current
//! frame are purged at post-process.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::geometry::{BboxTestPoint, Point, Rectangle};
use crate::{FrameMeta, ObjectMeta};

/// Endpoint convention for a trace handed to a cross test.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceTestMethod {
    /// Only the first and last recorded points.
    EndPoints,
    /// Every recorded point, in observation order.
    AllPoints,
}

/// One object's trajectory history.
#[derive(Clone, Debug)]
pub struct TrackedObject {
    source_id: u32,
    object_id: u64,
    creation_ms: u64,
    last_ms: u64,
    last_seen_frame: u64,
    triggered: bool,
    max_history: usize,
    /// One entry per observed frame: (frame number, bounding box).
    points: VecDeque<(u64, Rectangle)>,
}

impl TrackedObject {
    fn new(frame: &FrameMeta, object: &ObjectMeta, max_history: usize) -> Self {
        let mut points = VecDeque::new();
        points.push_back((frame.frame_num, object.rect_params));
        Self {
            source_id: frame.source_id,
            object_id: object.object_id,
            creation_ms: frame.ntp_timestamp_ms,
            last_ms: frame.ntp_timestamp_ms,
            last_seen_frame: frame.frame_num,
            triggered: false,
            max_history,
            points,
        }
    }

    /// Append the bbox observed this frame, dropping the oldest entry once
    /// the history bound is exceeded. A zero bound means unbounded.
    pub fn update(&mut self, frame: &FrameMeta, rect: Rectangle) {
        self.points.push_back((frame.frame_num, rect));
        if self.max_history > 0 && self.points.len() > self.max_history {
            self.points.pop_front();
        }
        self.last_seen_frame = frame.frame_num;
        self.last_ms = frame.ntp_timestamp_ms;
    }

    pub fn source_id(&self) -> u32 {
        self.source_id
    }

    pub fn object_id(&self) -> u64 {
        self.object_id
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn last_seen_frame(&self) -> u64 {
        self.last_seen_frame
    }

    /// Wall-clock delta between the first and last track point, in ms.
    pub fn duration_ms(&self) -> u64 {
        self.last_ms.saturating_sub(self.creation_ms)
    }

    /// Single-shot latch for triggers that must fire at most once per track.
    pub fn triggered(&self) -> bool {
        self.triggered
    }

    pub fn set_triggered(&mut self) {
        self.triggered = true;
    }

    /// The trace of test-point coordinates in observation order.
    ///
    /// `Any` falls back to the bbox center, since a trace needs a concrete
    /// coordinate per frame.
    pub fn trace(&self, test_point: BboxTestPoint, method: TraceTestMethod) -> Vec<Point> {
        let point = match test_point {
            BboxTestPoint::Any => BboxTestPoint::Center,
            other => other,
        };
        let coord = |rect: &Rectangle| rect.test_point(point).expect("concrete test point");
        match method {
            TraceTestMethod::AllPoints => self.points.iter().map(|(_, r)| coord(r)).collect(),
            TraceTestMethod::EndPoints => {
                if self.points.len() < 2 {
                    return self.points.iter().map(|(_, r)| coord(r)).collect();
                }
                let first = self.points.front().expect("non-empty trace");
                let last = self.points.back().expect("non-empty trace");
                vec![coord(&first.1), coord(&last.1)]
            }
        }
    }
}

/// All tracked objects for one trigger, keyed by `(source_id, object_id)`.
#[derive(Clone, Debug)]
pub struct TrackedObjectsStore {
    max_history: usize,
    objects: HashMap<(u32, u64), TrackedObject>,
}

impl TrackedObjectsStore {
    /// `max_history` bounds each object's trace length; zero is unbounded.
    pub fn new(max_history: usize) -> Self {
        Self {
            max_history,
            objects: HashMap::new(),
        }
    }

    pub fn is_tracked(&self, source_id: u32, object_id: u64) -> bool {
        self.objects.contains_key(&(source_id, object_id))
    }

    /// Begin tracking a newly seen object with a single initial trace point.
    pub fn track(&mut self, frame: &FrameMeta, object: &ObjectMeta) {
        self.objects.insert(
            (frame.source_id, object.object_id),
            TrackedObject::new(frame, object, self.max_history),
        );
    }

    pub fn get(&self, source_id: u32, object_id: u64) -> Option<&TrackedObject> {
        self.objects.get(&(source_id, object_id))
    }

    pub fn get_mut(&mut self, source_id: u32, object_id: u64) -> Option<&mut TrackedObject> {
        self.objects.get_mut(&(source_id, object_id))
    }

    /// Drop every entry not seen in the current frame.
    pub fn purge(&mut self, current_frame_num: u64) {
        self.objects
            .retain(|_, tracked| tracked.last_seen_frame() == current_frame_num);
    }

    pub fn clear(&mut self) {
        self.objects.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Applies to objects tracked from now on; existing traces keep their
    /// bound.
    pub fn set_max_history(&mut self, max_history: usize) {
        self.max_history = max_history;
    }
}

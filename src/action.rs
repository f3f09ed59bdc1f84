//! Action dispatch contract.
//!
//! Actions are user-supplied effects invoked when a trigger fires. The
//! engine only specifies the dispatch contract: an action receives the
//! occurrence context and the frame's display meta, and cannot fail the
//! frame; errors are caught by the dispatching trigger and logged.
//!
//! A few minimal built-ins are provided for hosts and tests; anything
//! heavier (capture, messaging, recording control) belongs to the host.

use std::sync::{Arc, Mutex};

use anyhow::Result;

use crate::display::{DisplayMeta, RectangleDisplay, RgbaColor};
use crate::{FrameMeta, ObjectMeta};

/// Context handed to an action for a single event.
#[derive(Clone, Copy, Debug)]
pub struct OdeOccurrence<'a> {
    /// Name of the trigger that fired.
    pub trigger_name: &'a str,
    /// Process-wide event ordinal at dispatch time.
    pub event_count: u64,
    pub frame: &'a FrameMeta,
    /// The matched object; `None` for frame-level events (absence,
    /// summation, and similar).
    pub object: Option<&'a ObjectMeta>,
}

/// User-supplied effect. Implementations are shared between triggers and
/// invoked in child-insertion order.
pub trait OdeAction: Send {
    fn name(&self) -> &str;

    /// Handle one event. Errors are logged by the dispatching trigger;
    /// remaining actions still run.
    fn handle_occurrence(
        &mut self,
        occurrence: &OdeOccurrence<'_>,
        display: &mut DisplayMeta,
    ) -> Result<()>;
}

/// Shared handle type for actions owned by one or more triggers.
pub type ActionRef = Arc<Mutex<dyn OdeAction>>;

/// Wrap an action for sharing between triggers.
pub fn action_ref<A: OdeAction + 'static>(action: A) -> ActionRef {
    Arc::new(Mutex::new(action))
}

// -------------------- Built-in actions --------------------

/// Logs each event through the `log` facade.
pub struct LogAction {
    name: String,
}

impl LogAction {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl OdeAction for LogAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn handle_occurrence(
        &mut self,
        occurrence: &OdeOccurrence<'_>,
        _display: &mut DisplayMeta,
    ) -> Result<()> {
        match occurrence.object {
            Some(object) => log::info!(
                "trigger '{}' event {} source {} frame {} object {} class {} metric {}",
                occurrence.trigger_name,
                occurrence.event_count,
                occurrence.frame.source_id,
                occurrence.frame.frame_num,
                object.object_id,
                object.class_id,
                object.misc_obj_info.primary_metric,
            ),
            None => log::info!(
                "trigger '{}' event {} source {} frame {} occurrences {}",
                occurrence.trigger_name,
                occurrence.event_count,
                occurrence.frame.source_id,
                occurrence.frame.frame_num,
                occurrence.frame.misc_frame_info.occurrences,
            ),
        }
        Ok(())
    }
}

/// Redraws the matched object's bounding box into display meta.
pub struct FormatBboxAction {
    name: String,
    border_width: u32,
    border_color: RgbaColor,
    bg_color: Option<RgbaColor>,
}

impl FormatBboxAction {
    pub fn new(
        name: &str,
        border_width: u32,
        border_color: RgbaColor,
        bg_color: Option<RgbaColor>,
    ) -> Self {
        Self {
            name: name.to_string(),
            border_width,
            border_color,
            bg_color,
        }
    }
}

impl OdeAction for FormatBboxAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn handle_occurrence(
        &mut self,
        occurrence: &OdeOccurrence<'_>,
        display: &mut DisplayMeta,
    ) -> Result<()> {
        let Some(object) = occurrence.object else {
            return Ok(());
        };
        let rect = object.rect_params;
        display.add_rectangle(RectangleDisplay {
            left: rect.left,
            top: rect.top,
            width: rect.width,
            height: rect.height,
            border_width: self.border_width,
            border_color: self.border_color,
            has_bg_color: self.bg_color.is_some(),
            bg_color: self
                .bg_color
                .unwrap_or(RgbaColor::new(0.0, 0.0, 0.0, 0.0)),
        });
        Ok(())
    }
}

/// One recorded event, as seen by [`CaptureAction`].
#[derive(Clone, Debug)]
pub struct CapturedEvent {
    pub trigger: String,
    pub event_count: u64,
    pub source_id: u32,
    pub frame_num: u64,
    pub frame_occurrences: u64,
    pub object_id: Option<u64>,
    pub class_id: Option<u32>,
    pub primary_metric: Option<u64>,
    pub persistence: Option<u64>,
}

/// Records every event into a shared vector. The workhorse of the test
/// suite, also handy for host-side polling.
pub struct CaptureAction {
    name: String,
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl CaptureAction {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Shared handle to the recorded events.
    pub fn events(&self) -> Arc<Mutex<Vec<CapturedEvent>>> {
        self.events.clone()
    }
}

impl OdeAction for CaptureAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn handle_occurrence(
        &mut self,
        occurrence: &OdeOccurrence<'_>,
        _display: &mut DisplayMeta,
    ) -> Result<()> {
        let mut events = self
            .events
            .lock()
            .map_err(|_| anyhow::anyhow!("capture event store poisoned"))?;
        events.push(CapturedEvent {
            trigger: occurrence.trigger_name.to_string(),
            event_count: occurrence.event_count,
            source_id: occurrence.frame.source_id,
            frame_num: occurrence.frame.frame_num,
            frame_occurrences: occurrence.frame.misc_frame_info.occurrences,
            object_id: occurrence.object.map(|o| o.object_id),
            class_id: occurrence.object.map(|o| o.class_id),
            primary_metric: occurrence.object.map(|o| o.misc_obj_info.primary_metric),
            persistence: occurrence.object.map(|o| o.misc_obj_info.persistence),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Rectangle;

    fn occurrence<'a>(frame: &'a FrameMeta, object: Option<&'a ObjectMeta>) -> OdeOccurrence<'a> {
        OdeOccurrence {
            trigger_name: "test-trigger",
            event_count: 1,
            frame,
            object,
        }
    }

    #[test]
    fn capture_action_records_object_fields() {
        let frame = FrameMeta {
            source_id: 3,
            frame_num: 12,
            ..Default::default()
        };
        let object = ObjectMeta {
            object_id: 42,
            class_id: 2,
            ..Default::default()
        };
        let mut action = CaptureAction::new("capture");
        let events = action.events();
        let mut display = DisplayMeta::new();

        action
            .handle_occurrence(&occurrence(&frame, Some(&object)), &mut display)
            .unwrap();
        action
            .handle_occurrence(&occurrence(&frame, None), &mut display)
            .unwrap();

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].object_id, Some(42));
        assert_eq!(events[0].class_id, Some(2));
        assert_eq!(events[1].object_id, None);
    }

    #[test]
    fn format_bbox_action_draws_matched_object_only() {
        let frame = FrameMeta::default();
        let object = ObjectMeta {
            rect_params: Rectangle::new(5.0, 6.0, 7.0, 8.0),
            ..Default::default()
        };
        let mut action = FormatBboxAction::new(
            "format",
            2,
            RgbaColor::new(1.0, 0.0, 0.0, 1.0),
            None,
        );
        let mut display = DisplayMeta::new();

        action
            .handle_occurrence(&occurrence(&frame, None), &mut display)
            .unwrap();
        assert!(display.rectangles.is_empty());

        action
            .handle_occurrence(&occurrence(&frame, Some(&object)), &mut display)
            .unwrap();
        assert_eq!(display.rectangles.len(), 1);
        assert_eq!(display.rectangles[0].left, 5.0);
    }
}

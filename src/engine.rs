//! Per-frame dispatch orchestration.
//!
//! [`OdeContext`] bundles the services every trigger shares: the timer
//! facility, the name resolver, and the process-wide event counter.
//! [`OdeEngine`] drives registered triggers through the three-phase
//! protocol, in registration order, once per frame.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use crate::display::DisplayMeta;
use crate::scheduler::{Scheduler, ThreadScheduler};
use crate::trigger::OdeTrigger;
use crate::{FrameMeta, NameResolver, ObjectMeta, StaticNameResolver};

/// Shared services handed to every trigger at construction.
///
/// The event counter is the only cross-trigger shared mutable state; it is
/// passed in explicitly rather than living in a hidden global.
#[derive(Clone)]
pub struct OdeContext {
    scheduler: Arc<dyn Scheduler>,
    resolver: Arc<dyn NameResolver>,
    event_count: Arc<AtomicU64>,
}

impl OdeContext {
    pub fn new(scheduler: Arc<dyn Scheduler>, resolver: Arc<dyn NameResolver>) -> Self {
        Self {
            scheduler,
            resolver,
            event_count: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Thread-backed scheduler and an empty static resolver.
    pub fn with_defaults() -> Self {
        Self::new(
            Arc::new(ThreadScheduler::new()),
            Arc::new(StaticNameResolver::new()),
        )
    }

    pub fn scheduler(&self) -> Arc<dyn Scheduler> {
        self.scheduler.clone()
    }

    pub fn resolver(&self) -> Arc<dyn NameResolver> {
        self.resolver.clone()
    }

    pub fn event_count(&self) -> Arc<AtomicU64> {
        self.event_count.clone()
    }

    /// Total events dispatched by all triggers sharing this context.
    pub fn events_total(&self) -> u64 {
        self.event_count.load(Ordering::SeqCst)
    }
}

struct TriggerList {
    triggers: Vec<Arc<OdeTrigger>>,
    next_index: u32,
}

/// Registration-ordered trigger driver.
pub struct OdeEngine {
    context: OdeContext,
    triggers: Mutex<TriggerList>,
}

impl OdeEngine {
    pub fn new(context: OdeContext) -> Self {
        Self {
            context,
            triggers: Mutex::new(TriggerList {
                triggers: Vec::new(),
                next_index: 0,
            }),
        }
    }

    pub fn context(&self) -> &OdeContext {
        &self.context
    }

    fn lock_triggers(&self) -> Result<std::sync::MutexGuard<'_, TriggerList>> {
        self.triggers
            .lock()
            .map_err(|_| anyhow!("engine trigger list lock poisoned"))
    }

    /// Register a trigger; names must be unique within the engine.
    pub fn add_trigger(&self, trigger: Arc<OdeTrigger>) -> Result<()> {
        let mut list = self.lock_triggers()?;
        if list.triggers.iter().any(|t| t.name() == trigger.name()) {
            return Err(anyhow!(
                "trigger '{}' is already registered",
                trigger.name()
            ));
        }
        list.next_index += 1;
        trigger.set_index(list.next_index);
        list.triggers.push(trigger);
        Ok(())
    }

    /// Remove a trigger, cancelling its reset timer.
    pub fn remove_trigger(&self, name: &str) -> Result<()> {
        let mut list = self.lock_triggers()?;
        let position = list
            .triggers
            .iter()
            .position(|t| t.name() == name)
            .ok_or_else(|| anyhow!("trigger '{}' is not registered", name))?;
        let trigger = list.triggers.remove(position);
        trigger.cancel_reset_timer();
        Ok(())
    }

    pub fn trigger(&self, name: &str) -> Option<Arc<OdeTrigger>> {
        self.lock_triggers()
            .ok()?
            .triggers
            .iter()
            .find(|t| t.name() == name)
            .cloned()
    }

    pub fn trigger_count(&self) -> usize {
        self.lock_triggers().map(|l| l.triggers.len()).unwrap_or(0)
    }

    /// Run one frame through all triggers: pre-process, then the
    /// per-object pass, then post-process. Returns the number of events
    /// emitted by the post phase.
    pub fn process_frame(
        &self,
        frame: &mut FrameMeta,
        objects: &mut [ObjectMeta],
        display: &mut DisplayMeta,
    ) -> u32 {
        let triggers: Vec<Arc<OdeTrigger>> = match self.lock_triggers() {
            Ok(list) => list.triggers.clone(),
            Err(_) => return 0,
        };

        for trigger in &triggers {
            trigger.pre_process_frame(frame, display);
        }
        for index in 0..objects.len() {
            for trigger in &triggers {
                trigger.check_for_occurrence(frame, objects, index, display);
            }
        }
        let mut events = 0;
        for trigger in &triggers {
            events += trigger.post_process_frame(frame, objects, display);
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{action_ref, CaptureAction};
    use crate::geometry::Rectangle;
    use crate::scheduler::ManualScheduler;

    fn test_context() -> OdeContext {
        OdeContext::new(
            Arc::new(ManualScheduler::new()),
            Arc::new(StaticNameResolver::new()),
        )
    }

    fn frame(frame_num: u64) -> FrameMeta {
        FrameMeta {
            source_id: 0,
            frame_num,
            source_frame_width: 1280,
            source_frame_height: 720,
            infer_done: true,
            ntp_timestamp_ms: frame_num * 33,
            ..Default::default()
        }
    }

    fn object(object_id: u64, class_id: u32) -> ObjectMeta {
        ObjectMeta {
            object_id,
            class_id,
            confidence: 0.9,
            rect_params: Rectangle::new(10.0, 10.0, 50.0, 80.0),
            ..Default::default()
        }
    }

    #[test]
    fn duplicate_trigger_names_are_rejected() {
        let engine = OdeEngine::new(test_context());
        let first = OdeTrigger::occurrence(engine.context(), "person", None, 2, 0);
        let second = OdeTrigger::occurrence(engine.context(), "person", None, 3, 0);
        engine.add_trigger(first).unwrap();
        assert!(engine.add_trigger(second).is_err());
        assert_eq!(engine.trigger_count(), 1);
    }

    #[test]
    fn remove_trigger_by_name() {
        let engine = OdeEngine::new(test_context());
        let trigger = OdeTrigger::occurrence(engine.context(), "person", None, 2, 0);
        engine.add_trigger(trigger).unwrap();
        assert!(engine.remove_trigger("person").is_ok());
        assert!(engine.remove_trigger("person").is_err());
        assert_eq!(engine.trigger_count(), 0);
    }

    #[test]
    fn process_frame_dispatches_matching_objects() {
        let engine = OdeEngine::new(test_context());
        let trigger = OdeTrigger::occurrence(engine.context(), "person", None, 2, 0);
        let capture = CaptureAction::new("capture");
        let events = capture.events();
        trigger.add_action(action_ref(capture)).unwrap();
        engine.add_trigger(trigger).unwrap();

        let mut frame = frame(1);
        let mut objects = vec![object(1, 2), object(2, 3), object(3, 2)];
        let mut display = DisplayMeta::new();
        engine.process_frame(&mut frame, &mut objects, &mut display);

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.class_id == Some(2)));
        assert_eq!(engine.context().events_total(), 2);
    }
}

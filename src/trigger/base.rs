//! Shared trigger state and the per-frame protocol driver.
//!
//! Every trigger owns two locks: the property lock guarding all mutable
//! filter state and children, and the reset-timer lock guarding the timer
//! handle. Lock order is property then timer; the timer callback releases
//! the timer lock before calling `reset()`, so the inverse order never
//! occurs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::action::{ActionRef, OdeOccurrence};
use crate::area::{AreaKind, OdeArea};
use crate::display::DisplayMeta;
use crate::engine::OdeContext;
use crate::heat_mapper::OdeHeatMapper;
use crate::scheduler::{Scheduler, TimerId};
use crate::trigger::ab::{DistanceState, IntersectionState};
use crate::trigger::tracked::{CrossState, DurationSelectState, PersistenceState};
use crate::trigger::variants::{CustomState, InstanceMap};
use crate::{FrameMeta, NameResolver, ObjectMeta};

/// Rate-limit state changes announced to listeners.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LimitEvent {
    LimitReached,
    CountReset,
    LimitChanged,
}

/// When the always-trigger fires relative to the per-object pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum When {
    PreOccurrenceCheck,
    PostOccurrenceCheck,
}

/// Identity of a registered limit-event listener.
pub type ListenerId = u64;

/// Callback receiving `(event, current limit)`. Errors are logged; other
/// listeners still run.
pub type LimitEventListener = Box<dyn FnMut(LimitEvent, u32) -> Result<()> + Send>;

/// Custom-trigger per-object predicate.
pub type CheckOccurrenceCallback = Box<dyn FnMut(&FrameMeta, &ObjectMeta) -> Result<bool> + Send>;

/// Custom-trigger frame-level predicate.
pub type PostProcessCallback = Box<dyn FnMut(&FrameMeta) -> Result<bool> + Send>;

/// Ordered child collection: insertion order defines dispatch order, names
/// are unique within the parent, and the parent owns the index metadata.
pub(crate) struct ChildList<T> {
    entries: Vec<(String, u32, T)>,
    next_index: u32,
}

impl<T: Clone> ChildList<T> {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_index: 0,
        }
    }

    pub(crate) fn add(&mut self, name: &str, child: T) -> Result<()> {
        if self.entries.iter().any(|(n, _, _)| n == name) {
            return Err(anyhow!("'{}' is already a child of this trigger", name));
        }
        self.next_index += 1;
        self.entries.push((name.to_string(), self.next_index, child));
        Ok(())
    }

    pub(crate) fn remove(&mut self, name: &str) -> Result<()> {
        let before = self.entries.len();
        self.entries.retain(|(n, _, _)| n != name);
        if self.entries.len() == before {
            return Err(anyhow!("'{}' is not a child of this trigger", name));
        }
        Ok(())
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().map(|(_, _, child)| child)
    }

    pub(crate) fn names(&self) -> Vec<String> {
        self.entries.iter().map(|(n, _, _)| n.clone()).collect()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Variant-specific state of the trigger family.
pub(crate) enum TriggerKind {
    Always {
        when: When,
    },
    Occurrence,
    Absence,
    Instance {
        instances: InstanceMap,
    },
    Accumulation {
        instances: InstanceMap,
        accumulative: u32,
    },
    Summation,
    Count {
        minimum: u32,
        maximum: u32,
    },
    NewHigh {
        preset: u32,
        current_high: u32,
    },
    NewLow {
        preset: u32,
        current_low: u32,
    },
    Smallest {
        queued: Vec<usize>,
    },
    Largest {
        queued: Vec<usize>,
    },
    Earliest(DurationSelectState),
    Latest(DurationSelectState),
    Persistence(PersistenceState),
    Cross(CrossState),
    Distance(DistanceState),
    Intersection(IntersectionState),
    Custom(CustomState),
}

pub(crate) struct TriggerState {
    pub(crate) enabled: bool,
    pub(crate) index: u32,
    pub(crate) source: Option<String>,
    /// `None` = not yet resolved; `Some(None)` = resolution missed.
    pub(crate) source_id: Option<Option<u32>>,
    pub(crate) infer: Option<String>,
    pub(crate) infer_id: Option<Option<u32>>,
    pub(crate) class_id: u32,
    pub(crate) limit: u32,
    pub(crate) triggered: u32,
    pub(crate) occurrences: u32,
    pub(crate) min_confidence: f32,
    pub(crate) min_width: f32,
    pub(crate) min_height: f32,
    pub(crate) max_width: f32,
    pub(crate) max_height: f32,
    pub(crate) min_frame_count: (u32, u32),
    pub(crate) infer_done_only: bool,
    pub(crate) interval: u32,
    pub(crate) interval_counter: u32,
    pub(crate) skip_frame: bool,
    pub(crate) actions: ChildList<ActionRef>,
    pub(crate) areas: ChildList<Arc<OdeArea>>,
    pub(crate) heat_mapper: Option<Arc<Mutex<OdeHeatMapper>>>,
    pub(crate) listeners: Vec<(ListenerId, LimitEventListener)>,
    next_listener_id: ListenerId,
    /// Set by the rate limiter when the limit is reached; consumed by the
    /// outer phase method to arm the reset timer.
    pub(crate) limit_reached_pending: bool,
    pub(crate) kind: TriggerKind,
}

struct ResetTimer {
    timeout_secs: u32,
    handle: Option<TimerId>,
}

/// One trigger of any variant.
///
/// Shared between the host's configuration threads and the pipeline's
/// frame thread; all public methods are safe to call from either.
pub struct OdeTrigger {
    name: String,
    scheduler: Arc<dyn Scheduler>,
    resolver: Arc<dyn NameResolver>,
    event_count: Arc<AtomicU64>,
    state: Mutex<TriggerState>,
    reset_timer: Mutex<ResetTimer>,
}

/// Per-object check context handed to variant logic.
pub(crate) struct CheckCtx<'a> {
    pub trigger_name: &'a str,
    pub resolver: &'a dyn NameResolver,
    pub event_count: &'a AtomicU64,
    pub frame: &'a FrameMeta,
    pub objects: &'a mut [ObjectMeta],
    pub index: usize,
    pub display: &'a mut DisplayMeta,
}

/// Post-process context handed to variant logic.
pub(crate) struct PostCtx<'a> {
    pub trigger_name: &'a str,
    pub event_count: &'a AtomicU64,
    pub frame: &'a mut FrameMeta,
    pub objects: &'a mut [ObjectMeta],
    pub display: &'a mut DisplayMeta,
}

impl OdeTrigger {
    pub(crate) fn with_kind(
        ctx: &OdeContext,
        name: &str,
        source: Option<&str>,
        class_id: u32,
        limit: u32,
        kind: TriggerKind,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            scheduler: ctx.scheduler(),
            resolver: ctx.resolver(),
            event_count: ctx.event_count(),
            state: Mutex::new(TriggerState {
                enabled: true,
                index: 0,
                source: source.map(|s| s.to_string()),
                source_id: None,
                infer: None,
                infer_id: None,
                class_id,
                limit,
                triggered: 0,
                occurrences: 0,
                min_confidence: 0.0,
                min_width: 0.0,
                min_height: 0.0,
                max_width: 0.0,
                max_height: 0.0,
                min_frame_count: (1, 1),
                infer_done_only: false,
                interval: 0,
                interval_counter: 0,
                skip_frame: false,
                actions: ChildList::new(),
                areas: ChildList::new(),
                heat_mapper: None,
                listeners: Vec::new(),
                next_listener_id: 0,
                limit_reached_pending: false,
                kind,
            }),
            reset_timer: Mutex::new(ResetTimer {
                timeout_secs: 0,
                handle: None,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    // -------------------- Property access --------------------

    pub(crate) fn lock_state(&self) -> Result<std::sync::MutexGuard<'_, TriggerState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("trigger '{}' property lock poisoned", self.name))
    }

    pub fn enabled(&self) -> bool {
        self.lock_state().map(|s| s.enabled).unwrap_or(false)
    }

    pub fn set_enabled(&self, enabled: bool) {
        if let Ok(mut state) = self.lock_state() {
            state.enabled = enabled;
        }
    }

    pub fn source(&self) -> Option<String> {
        self.lock_state().ok().and_then(|s| s.source.clone())
    }

    /// Reassigning the source name discards the cached id resolution.
    pub fn set_source(&self, source: Option<&str>) {
        if let Ok(mut state) = self.lock_state() {
            state.source = source.map(|s| s.to_string());
            state.source_id = None;
        }
    }

    pub fn infer(&self) -> Option<String> {
        self.lock_state().ok().and_then(|s| s.infer.clone())
    }

    pub fn set_infer(&self, infer: Option<&str>) {
        if let Ok(mut state) = self.lock_state() {
            state.infer = infer.map(|s| s.to_string());
            state.infer_id = None;
        }
    }

    pub fn class_id(&self) -> u32 {
        self.lock_state().map(|s| s.class_id).unwrap_or(0)
    }

    pub fn set_class_id(&self, class_id: u32) {
        if let Ok(mut state) = self.lock_state() {
            state.class_id = class_id;
        }
    }

    pub fn limit(&self) -> u32 {
        self.lock_state().map(|s| s.limit).unwrap_or(0)
    }

    /// Change the event limit and announce it to listeners.
    pub fn set_limit(&self, limit: u32) {
        if let Ok(mut state) = self.lock_state() {
            state.limit = limit;
            state.notify_listeners(LimitEvent::LimitChanged);
        }
    }

    pub fn triggered(&self) -> u32 {
        self.lock_state().map(|s| s.triggered).unwrap_or(0)
    }

    /// Occurrence count of the current (or just-completed) frame.
    pub fn occurrences(&self) -> u32 {
        self.lock_state().map(|s| s.occurrences).unwrap_or(0)
    }

    pub fn set_min_confidence(&self, min_confidence: f32) {
        if let Ok(mut state) = self.lock_state() {
            state.min_confidence = min_confidence;
        }
    }

    pub fn set_min_dimensions(&self, min_width: f32, min_height: f32) {
        if let Ok(mut state) = self.lock_state() {
            state.min_width = min_width;
            state.min_height = min_height;
        }
    }

    pub fn set_max_dimensions(&self, max_width: f32, max_height: f32) {
        if let Ok(mut state) = self.lock_state() {
            state.max_width = max_width;
            state.max_height = max_height;
        }
    }

    pub fn set_min_frame_count(&self, numerator: u32, denominator: u32) {
        if let Ok(mut state) = self.lock_state() {
            state.min_frame_count = (numerator, denominator);
        }
    }

    pub fn set_infer_done_only(&self, infer_done_only: bool) {
        if let Ok(mut state) = self.lock_state() {
            state.infer_done_only = infer_done_only;
        }
    }

    /// Process every `interval`-th frame; zero disables skipping.
    pub fn set_interval(&self, interval: u32) {
        if let Ok(mut state) = self.lock_state() {
            state.interval = interval;
            state.interval_counter = 0;
        }
    }

    pub(crate) fn set_index(&self, index: u32) {
        if let Ok(mut state) = self.lock_state() {
            state.index = index;
        }
    }

    /// Registration index assigned by the owning engine; zero when
    /// unregistered.
    pub fn index(&self) -> u32 {
        self.lock_state().map(|s| s.index).unwrap_or(0)
    }

    pub fn min_frame_count(&self) -> (u32, u32) {
        self.lock_state().map(|s| s.min_frame_count).unwrap_or((1, 1))
    }

    // -------------------- Children --------------------

    pub fn add_action(&self, action: ActionRef) -> Result<()> {
        let name = action
            .lock()
            .map_err(|_| anyhow!("action lock poisoned"))?
            .name()
            .to_string();
        self.lock_state()?.actions.add(&name, action)
    }

    pub fn remove_action(&self, name: &str) -> Result<()> {
        self.lock_state()?.actions.remove(name)
    }

    pub fn remove_all_actions(&self) {
        if let Ok(mut state) = self.lock_state() {
            state.actions.clear();
        }
    }

    pub fn action_names(&self) -> Vec<String> {
        self.lock_state()
            .map(|s| s.actions.names())
            .unwrap_or_default()
    }

    pub fn add_area(&self, area: Arc<OdeArea>) -> Result<()> {
        let name = area.name().to_string();
        self.lock_state()?.areas.add(&name, area)
    }

    pub fn remove_area(&self, name: &str) -> Result<()> {
        self.lock_state()?.areas.remove(name)
    }

    pub fn remove_all_areas(&self) {
        if let Ok(mut state) = self.lock_state() {
            state.areas.clear();
        }
    }

    /// Attach the trigger's heat mapper; at most one per trigger.
    pub fn add_heat_mapper(&self, heat_mapper: Arc<Mutex<OdeHeatMapper>>) -> Result<()> {
        let mut state = self.lock_state()?;
        if state.heat_mapper.is_some() {
            return Err(anyhow!(
                "trigger '{}' already has a heat mapper",
                self.name
            ));
        }
        state.heat_mapper = Some(heat_mapper);
        Ok(())
    }

    pub fn remove_heat_mapper(&self) -> Result<()> {
        let mut state = self.lock_state()?;
        if state.heat_mapper.take().is_none() {
            return Err(anyhow!("trigger '{}' has no heat mapper", self.name));
        }
        Ok(())
    }

    // -------------------- Listeners --------------------

    pub fn add_limit_event_listener(&self, listener: LimitEventListener) -> ListenerId {
        match self.lock_state() {
            Ok(mut state) => {
                state.next_listener_id += 1;
                let id = state.next_listener_id;
                state.listeners.push((id, listener));
                id
            }
            Err(_) => 0,
        }
    }

    pub fn remove_limit_event_listener(&self, id: ListenerId) -> Result<()> {
        let mut state = self.lock_state()?;
        let before = state.listeners.len();
        state.listeners.retain(|(listener_id, _)| *listener_id != id);
        if state.listeners.len() == before {
            return Err(anyhow!("limit-event listener was not found"));
        }
        Ok(())
    }

    // -------------------- Reset & reset timer --------------------

    /// Zero the triggered count and variant state, then announce the reset.
    pub fn reset(&self) {
        let Ok(mut state) = self.lock_state() else {
            return;
        };
        state.triggered = 0;
        match &mut state.kind {
            TriggerKind::Instance { instances } => instances.clear(),
            TriggerKind::Accumulation {
                instances,
                accumulative,
            } => {
                instances.clear();
                *accumulative = 0;
            }
            TriggerKind::NewHigh {
                preset,
                current_high,
            } => *current_high = *preset,
            TriggerKind::NewLow {
                preset,
                current_low,
            } => *current_low = *preset,
            TriggerKind::Smallest { queued } | TriggerKind::Largest { queued } => queued.clear(),
            TriggerKind::Earliest(select) | TriggerKind::Latest(select) => {
                select.store.clear();
                select.selected = None;
            }
            TriggerKind::Persistence(persistence) => persistence.store.clear(),
            TriggerKind::Cross(cross) => cross.store.clear(),
            TriggerKind::Distance(distance) => {
                distance.ab.list_a.clear();
                distance.ab.list_b.clear();
            }
            TriggerKind::Intersection(intersection) => {
                intersection.ab.list_a.clear();
                intersection.ab.list_b.clear();
            }
            TriggerKind::Always { .. }
            | TriggerKind::Occurrence
            | TriggerKind::Absence
            | TriggerKind::Summation
            | TriggerKind::Count { .. }
            | TriggerKind::Custom(_) => {}
        }
        state.notify_listeners(LimitEvent::CountReset);
    }

    pub fn reset_timeout(&self) -> u32 {
        self.reset_timer
            .lock()
            .map(|t| t.timeout_secs)
            .unwrap_or(0)
    }

    /// Reconfigure the automatic reset timeout.
    ///
    /// Zero cancels a live timer; a non-zero value restarts a live timer
    /// with the new duration, and starts one immediately when the limit is
    /// already reached.
    pub fn set_reset_timeout(self: &Arc<Self>, timeout_secs: u32) {
        let limit_reached = self
            .lock_state()
            .map(|s| s.limit > 0 && s.triggered >= s.limit)
            .unwrap_or(false);
        let Ok(mut timer) = self.reset_timer.lock() else {
            return;
        };
        if let Some(handle) = timer.handle.take() {
            self.scheduler.cancel(handle);
            if timeout_secs > 0 {
                timer.handle = Some(self.schedule_reset(timeout_secs));
            }
        } else if timeout_secs > 0 && limit_reached {
            timer.handle = Some(self.schedule_reset(timeout_secs));
        }
        timer.timeout_secs = timeout_secs;
    }

    pub fn is_reset_timer_running(&self) -> bool {
        self.reset_timer
            .lock()
            .map(|t| t.handle.is_some())
            .unwrap_or(false)
    }

    /// Cancel any live reset timer. Called on removal from the engine and
    /// on drop.
    pub fn cancel_reset_timer(&self) {
        if let Ok(mut timer) = self.reset_timer.lock() {
            if let Some(handle) = timer.handle.take() {
                self.scheduler.cancel(handle);
            }
        }
    }

    fn schedule_reset(self: &Arc<Self>, timeout_secs: u32) -> TimerId {
        let weak = Arc::downgrade(self);
        self.scheduler.schedule_once(
            Duration::from_secs(timeout_secs as u64),
            Box::new(move || {
                if let Some(trigger) = weak.upgrade() {
                    trigger.handle_reset_timeout();
                }
            }),
        )
    }

    fn handle_reset_timeout(&self) {
        // Take the timer lock only to clear the handle; reset() acquires
        // the property lock after it is released.
        if let Ok(mut timer) = self.reset_timer.lock() {
            timer.handle = None;
        }
        self.reset();
    }

    /// Arm the reset timer when the rate limiter just hit its limit.
    fn service_reset_timer(self: &Arc<Self>, state: &mut TriggerState) {
        if !state.limit_reached_pending {
            return;
        }
        state.limit_reached_pending = false;
        let Ok(mut timer) = self.reset_timer.lock() else {
            return;
        };
        if timer.timeout_secs > 0 && timer.handle.is_none() {
            timer.handle = Some(self.schedule_reset(timer.timeout_secs));
        }
    }

    // -------------------- Per-frame protocol --------------------

    /// Phase 1: reset per-frame scratch, render areas, advance skip-frame.
    pub fn pre_process_frame(&self, frame: &FrameMeta, display: &mut DisplayMeta) {
        let Ok(mut state) = self.lock_state() else {
            return;
        };

        if let TriggerKind::Always { when } = state.kind {
            if state.enabled
                && state.check_for_source_id(&*self.resolver, frame.source_id)
                && when == When::PreOccurrenceCheck
            {
                let event_count = self.event_count.load(Ordering::SeqCst);
                state.dispatch_actions(&self.name, event_count, frame, None, display);
            }
            return;
        }

        // occurrences reset even while disabled
        state.occurrences = 0;

        if !state.enabled || !state.check_for_source_id(&*self.resolver, frame.source_id) {
            return;
        }

        for area in state.areas.iter() {
            area.add_display_meta(display);
        }
        if let Some(heat_mapper) = &state.heat_mapper {
            if let Ok(mut heat_mapper) = heat_mapper.lock() {
                heat_mapper.add_display_meta(display);
            }
        }

        if state.interval > 0 {
            state.interval_counter = (state.interval_counter + 1) % state.interval;
            if state.interval_counter != 0 {
                state.skip_frame = true;
                return;
            }
        }
        state.skip_frame = false;
    }

    /// Phase 2: evaluate one object. Returns true when the object matched
    /// this trigger's criteria.
    pub fn check_for_occurrence(
        self: &Arc<Self>,
        frame: &FrameMeta,
        objects: &mut [ObjectMeta],
        index: usize,
        display: &mut DisplayMeta,
    ) -> bool {
        if index >= objects.len() {
            return false;
        }
        let Ok(mut state) = self.lock_state() else {
            return false;
        };
        let ctx = CheckCtx {
            trigger_name: &self.name,
            resolver: &*self.resolver,
            event_count: &self.event_count,
            frame,
            objects,
            index,
            display,
        };
        let matched = state.check_occurrence(ctx);
        self.service_reset_timer(&mut state);
        matched
    }

    /// Phase 3: frame-level evaluation. Returns the number of events
    /// emitted this frame.
    pub fn post_process_frame(
        self: &Arc<Self>,
        frame: &mut FrameMeta,
        objects: &mut [ObjectMeta],
        display: &mut DisplayMeta,
    ) -> u32 {
        let Ok(mut state) = self.lock_state() else {
            return 0;
        };
        let ctx = PostCtx {
            trigger_name: &self.name,
            event_count: &self.event_count,
            frame,
            objects,
            display,
        };
        let events = state.post_process(ctx);
        self.service_reset_timer(&mut state);
        events
    }
}

impl Drop for OdeTrigger {
    fn drop(&mut self) {
        self.cancel_reset_timer();
    }
}

// -------------------- Shared gates & dispatch --------------------

impl TriggerState {
    /// Filter on the frame's source id, resolving the configured name at
    /// most once.
    pub(crate) fn check_for_source_id(
        &mut self,
        resolver: &dyn NameResolver,
        source_id: u32,
    ) -> bool {
        let Some(name) = &self.source else {
            return true;
        };
        let resolved = match self.source_id {
            Some(resolved) => resolved,
            None => {
                let resolved = resolver.source_id_get(name);
                if resolved.is_none() {
                    log::warn!(
                        "source '{}' cannot be resolved; the filter will not match",
                        name
                    );
                }
                self.source_id = Some(resolved);
                resolved
            }
        };
        resolved == Some(source_id)
    }

    /// Filter on the object's inference-component id, analogous to
    /// [`TriggerState::check_for_source_id`].
    pub(crate) fn check_for_infer_id(
        &mut self,
        resolver: &dyn NameResolver,
        infer_id: u32,
    ) -> bool {
        let Some(name) = &self.infer else {
            return true;
        };
        let resolved = match self.infer_id {
            Some(resolved) => resolved,
            None => {
                let resolved = resolver.infer_id_get(name);
                if resolved.is_none() {
                    log::warn!(
                        "inference component '{}' cannot be resolved; the filter will not match",
                        name
                    );
                }
                self.infer_id = Some(resolved);
                resolved
            }
        };
        resolved == Some(infer_id)
    }

    /// The shared minimum-criteria gate, applied in a strict order with
    /// short-circuit on the first failure.
    pub(crate) fn check_for_min_criteria(
        &mut self,
        resolver: &dyn NameResolver,
        frame: &FrameMeta,
        object: &ObjectMeta,
        class_id: u32,
    ) -> bool {
        if self.skip_frame {
            return false;
        }
        if self.limit > 0 && self.triggered >= self.limit {
            return false;
        }
        if !self.check_for_source_id(resolver, frame.source_id)
            || !self.check_for_infer_id(resolver, object.unique_component_id)
        {
            return false;
        }
        if class_id != crate::ANY_CLASS && class_id != object.class_id {
            return false;
        }
        // zero confidence means unspecified and always passes
        if object.confidence > 0.0 && object.confidence < self.min_confidence {
            return false;
        }
        if (self.min_width > 0.0 && object.rect_params.width < self.min_width)
            || (self.min_height > 0.0 && object.rect_params.height < self.min_height)
        {
            return false;
        }
        if (self.max_width > 0.0 && object.rect_params.width > self.max_width)
            || (self.max_height > 0.0 && object.rect_params.height > self.max_height)
        {
            return false;
        }
        if self.infer_done_only && !frame.infer_done {
            return false;
        }
        true
    }

    /// Area gate: the first area containing the object decides.
    pub(crate) fn check_for_within(&self, rect: &crate::geometry::Rectangle) -> bool {
        if self.areas.is_empty() {
            return true;
        }
        for area in self.areas.iter() {
            if area.check_for_within(rect) {
                return area.kind() != AreaKind::Exclusion;
            }
        }
        false
    }

    /// Increment the triggered count; on reaching the limit, notify
    /// listeners and flag the reset timer for arming.
    pub(crate) fn increment_and_check_trigger_count(&mut self) {
        self.triggered += 1;
        if self.limit > 0 && self.triggered >= self.limit {
            self.notify_listeners(LimitEvent::LimitReached);
            self.limit_reached_pending = true;
        }
    }

    pub(crate) fn limit_exhausted(&self) -> bool {
        self.limit > 0 && self.triggered >= self.limit
    }

    /// Deliver an event to every listener in insertion order; a failing
    /// listener is logged and does not stop the others.
    pub(crate) fn notify_listeners(&mut self, event: LimitEvent) {
        let limit = self.limit;
        for (id, listener) in self.listeners.iter_mut() {
            if let Err(err) = listener(event, limit) {
                log::error!("limit-event listener {} failed: {:#}", id, err);
            }
        }
    }

    /// Invoke every action in insertion order; a failing action is logged
    /// and does not stop the others.
    pub(crate) fn dispatch_actions(
        &self,
        trigger_name: &str,
        event_count: u64,
        frame: &FrameMeta,
        object: Option<&ObjectMeta>,
        display: &mut DisplayMeta,
    ) {
        let occurrence = OdeOccurrence {
            trigger_name,
            event_count,
            frame,
            object,
        };
        for action in self.actions.iter() {
            let Ok(mut action) = action.lock() else {
                log::error!("trigger '{}': action lock poisoned", trigger_name);
                continue;
            };
            if let Err(err) = action.handle_occurrence(&occurrence, display) {
                log::error!(
                    "trigger '{}' => action '{}' failed: {:#}",
                    trigger_name,
                    action.name(),
                    err
                );
            }
        }
    }

    /// Feed the attached heat mapper with one per-object occurrence.
    pub(crate) fn feed_heat_mapper(&self, frame: &FrameMeta, object: &ObjectMeta) {
        if let Some(heat_mapper) = &self.heat_mapper {
            if let Ok(mut heat_mapper) = heat_mapper.lock() {
                heat_mapper.handle_occurrence(frame, object);
            }
        }
    }
}

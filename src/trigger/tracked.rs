//! Trajectory-backed trigger variants.
//!
//! Persistence, cross, and earliest/latest all maintain a
//! [`TrackedObjectsStore`] keyed by `(source_id, object_id)`. Objects keep
//! being tracked while the trigger is disabled; only action dispatch is
//! gated on the enabled flag.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::area::OdeArea;
use crate::display::{PolylineDisplay, RgbaColor};
use crate::engine::OdeContext;
use crate::tracking::{TraceTestMethod, TrackedObjectsStore};
use crate::trigger::base::{CheckCtx, OdeTrigger, PostCtx, TriggerKind, TriggerState};

pub(crate) struct PersistenceState {
    pub(crate) store: TrackedObjectsStore,
    pub(crate) minimum_ms: u64,
    pub(crate) maximum_ms: u64,
}

pub(crate) struct DurationSelectState {
    pub(crate) store: TrackedObjectsStore,
    /// (object index this frame, tracked duration in ms)
    pub(crate) selected: Option<(usize, u64)>,
    /// Earliest selects the longest-tracked object, latest the shortest.
    pub(crate) pick_longest: bool,
}

pub(crate) struct CrossState {
    pub(crate) store: TrackedObjectsStore,
    pub(crate) min_trace_points: usize,
    pub(crate) max_trace_points: usize,
    pub(crate) test_method: TraceTestMethod,
    pub(crate) trace_enabled: bool,
    pub(crate) trace_color: RgbaColor,
    pub(crate) trace_line_width: u32,
}

// -------------------- Constructors & settings --------------------

impl OdeTrigger {
    /// Fires for every frame an object has been tracked between `minimum`
    /// and `maximum` seconds.
    pub fn persistence(
        ctx: &OdeContext,
        name: &str,
        source: Option<&str>,
        class_id: u32,
        limit: u32,
        minimum_secs: u32,
        maximum_secs: u32,
    ) -> Arc<Self> {
        Self::with_kind(
            ctx,
            name,
            source,
            class_id,
            limit,
            TriggerKind::Persistence(PersistenceState {
                store: TrackedObjectsStore::new(0),
                minimum_ms: minimum_secs as u64 * 1000,
                maximum_ms: maximum_secs as u64 * 1000,
            }),
        )
    }

    /// Fires once per frame for the longest-tracked object.
    pub fn earliest(
        ctx: &OdeContext,
        name: &str,
        source: Option<&str>,
        class_id: u32,
        limit: u32,
    ) -> Arc<Self> {
        Self::with_kind(
            ctx,
            name,
            source,
            class_id,
            limit,
            TriggerKind::Earliest(DurationSelectState {
                store: TrackedObjectsStore::new(0),
                selected: None,
                pick_longest: true,
            }),
        )
    }

    /// Fires once per frame for the shortest-tracked object.
    pub fn latest(
        ctx: &OdeContext,
        name: &str,
        source: Option<&str>,
        class_id: u32,
        limit: u32,
    ) -> Arc<Self> {
        Self::with_kind(
            ctx,
            name,
            source,
            class_id,
            limit,
            TriggerKind::Latest(DurationSelectState {
                store: TrackedObjectsStore::new(0),
                selected: None,
                pick_longest: false,
            }),
        )
    }

    /// Fires once per tracked object whose trace crosses one of the
    /// trigger's areas; requires at least one area.
    pub fn cross(
        ctx: &OdeContext,
        name: &str,
        source: Option<&str>,
        class_id: u32,
        limit: u32,
        min_trace_points: usize,
        max_trace_points: usize,
        test_method: TraceTestMethod,
    ) -> Arc<Self> {
        Self::with_kind(
            ctx,
            name,
            source,
            class_id,
            limit,
            TriggerKind::Cross(CrossState {
                store: TrackedObjectsStore::new(max_trace_points),
                min_trace_points,
                max_trace_points,
                test_method,
                trace_enabled: false,
                trace_color: RgbaColor::new(1.0, 1.0, 1.0, 1.0),
                trace_line_width: 0,
            }),
        )
    }

    /// Current trace bounds and endpoint convention of a cross trigger.
    pub fn trace_point_settings(&self) -> Result<(usize, usize, TraceTestMethod)> {
        let state = self.lock_state()?;
        match &state.kind {
            TriggerKind::Cross(cross) => Ok((
                cross.min_trace_points,
                cross.max_trace_points,
                cross.test_method,
            )),
            _ => Err(anyhow!("trigger '{}' is not a cross trigger", self.name())),
        }
    }

    /// Reconfigure a cross trigger's trace bounds and endpoint convention.
    pub fn set_trace_point_settings(
        &self,
        min_trace_points: usize,
        max_trace_points: usize,
        test_method: TraceTestMethod,
    ) -> Result<()> {
        let mut state = self.lock_state()?;
        match &mut state.kind {
            TriggerKind::Cross(cross) => {
                cross.min_trace_points = min_trace_points;
                cross.max_trace_points = max_trace_points;
                cross.test_method = test_method;
                cross.store.set_max_history(max_trace_points);
                Ok(())
            }
            _ => Err(anyhow!("trigger '{}' is not a cross trigger", self.name())),
        }
    }

    /// Enable or disable rendering of object traces into display meta.
    pub fn set_trace_view_settings(
        &self,
        enabled: bool,
        color: RgbaColor,
        line_width: u32,
    ) -> Result<()> {
        let mut state = self.lock_state()?;
        match &mut state.kind {
            TriggerKind::Cross(cross) => {
                cross.trace_enabled = enabled;
                cross.trace_color = color;
                cross.trace_line_width = line_width;
                Ok(())
            }
            _ => Err(anyhow!("trigger '{}' is not a cross trigger", self.name())),
        }
    }
}

// -------------------- Phase logic --------------------

impl TriggerState {
    pub(crate) fn check_persistence(&mut self, ctx: &mut CheckCtx<'_>) -> bool {
        let class_id = self.class_id;
        if !self.passes_object_gates(ctx, class_id) {
            return false;
        }
        let enabled = self.enabled;
        let source_id = ctx.frame.source_id;
        let object_id = ctx.objects[ctx.index].object_id;

        let fire = {
            let TriggerKind::Persistence(persistence) = &mut self.kind else {
                return false;
            };
            if !persistence.store.is_tracked(source_id, object_id) {
                persistence.store.track(ctx.frame, &ctx.objects[ctx.index]);
                None
            } else {
                let rect = ctx.objects[ctx.index].rect_params;
                let tracked = persistence
                    .store
                    .get_mut(source_id, object_id)
                    .expect("object is tracked");
                tracked.update(ctx.frame, rect);
                let duration_ms = tracked.duration_ms();
                log::debug!(
                    "persistence for object {} source {} is {} ms",
                    object_id,
                    source_id,
                    duration_ms
                );
                (enabled
                    && duration_ms >= persistence.minimum_ms
                    && duration_ms <= persistence.maximum_ms)
                    .then_some(duration_ms)
            }
        };

        if let Some(duration_ms) = fire {
            self.increment_and_check_trigger_count();
            self.occurrences += 1;
            let event_count = ctx.event_count.fetch_add(1, Ordering::SeqCst) + 1;
            let seconds = duration_ms / 1000;
            ctx.objects[ctx.index].misc_obj_info.persistence = seconds;
            ctx.objects[ctx.index].misc_obj_info.primary_metric = seconds;
            let object = &ctx.objects[ctx.index];
            self.feed_heat_mapper(ctx.frame, object);
            self.dispatch_actions(
                ctx.trigger_name,
                event_count,
                ctx.frame,
                Some(object),
                ctx.display,
            );
        }
        true
    }

    pub(crate) fn post_persistence(&mut self, ctx: &mut PostCtx<'_>) -> u32 {
        let frame_num = ctx.frame.frame_num;
        if let TriggerKind::Persistence(persistence) = &mut self.kind {
            if persistence.store.is_empty() {
                return 0;
            }
            persistence.store.purge(frame_num);
        }
        self.occurrences
    }

    pub(crate) fn check_duration_select(&mut self, ctx: &mut CheckCtx<'_>) -> bool {
        let class_id = self.class_id;
        if !self.passes_object_gates(ctx, class_id) {
            return false;
        }
        let source_id = ctx.frame.source_id;
        let object_id = ctx.objects[ctx.index].object_id;

        let (TriggerKind::Earliest(select) | TriggerKind::Latest(select)) = &mut self.kind else {
            return false;
        };
        if !select.store.is_tracked(source_id, object_id) {
            select.store.track(ctx.frame, &ctx.objects[ctx.index]);
        } else {
            let rect = ctx.objects[ctx.index].rect_params;
            let tracked = select
                .store
                .get_mut(source_id, object_id)
                .expect("object is tracked");
            tracked.update(ctx.frame, rect);
            let duration_ms = tracked.duration_ms();
            let better = match select.selected {
                None => true,
                Some((_, current)) => {
                    if select.pick_longest {
                        duration_ms > current
                    } else {
                        duration_ms < current
                    }
                }
            };
            if better {
                select.selected = Some((ctx.index, duration_ms));
            }
        }
        true
    }

    pub(crate) fn post_duration_select(&mut self, ctx: &mut PostCtx<'_>) -> u32 {
        let frame_num = ctx.frame.frame_num;
        let enabled = self.enabled;

        let selection = {
            let (TriggerKind::Earliest(select) | TriggerKind::Latest(select)) = &mut self.kind
            else {
                return 0;
            };
            if select.store.is_empty() {
                return 0;
            }
            select.selected.take()
        };

        if enabled {
            if let Some((index, duration_ms)) = selection {
                if index < ctx.objects.len() {
                    self.increment_and_check_trigger_count();
                    self.occurrences += 1;
                    let event_count = ctx.event_count.fetch_add(1, Ordering::SeqCst) + 1;
                    let seconds = duration_ms / 1000;
                    ctx.objects[index].misc_obj_info.persistence = seconds;
                    ctx.objects[index].misc_obj_info.primary_metric = seconds;
                    let object = &ctx.objects[index];
                    self.dispatch_actions(
                        ctx.trigger_name,
                        event_count,
                        ctx.frame,
                        Some(object),
                        ctx.display,
                    );
                }
            }
        }

        if let TriggerKind::Earliest(select) | TriggerKind::Latest(select) = &mut self.kind {
            select.store.purge(frame_num);
        }
        u32::from(self.occurrences > 0)
    }

    pub(crate) fn check_cross(&mut self, ctx: &mut CheckCtx<'_>) -> bool {
        if self.areas.is_empty() {
            log::error!(
                "at least one area is required for cross trigger '{}'",
                ctx.trigger_name
            );
            return false;
        }
        if !self.enabled {
            return false;
        }
        // the within gate is skipped: crossing is decided from the trace
        let class_id = self.class_id;
        {
            let object = &ctx.objects[ctx.index];
            if !self.check_for_min_criteria(ctx.resolver, ctx.frame, object, class_id) {
                return false;
            }
        }
        let source_id = ctx.frame.source_id;
        let object_id = ctx.objects[ctx.index].object_id;
        let areas: Vec<Arc<OdeArea>> = self.areas.iter().cloned().collect();

        let mut polylines: Vec<PolylineDisplay> = Vec::new();
        let crossed = {
            let TriggerKind::Cross(cross) = &mut self.kind else {
                return false;
            };
            if !cross.store.is_tracked(source_id, object_id) {
                cross.store.track(ctx.frame, &ctx.objects[ctx.index]);
                false
            } else {
                let rect = ctx.objects[ctx.index].rect_params;
                let tracked = cross
                    .store
                    .get_mut(source_id, object_id)
                    .expect("object is tracked");
                tracked.update(ctx.frame, rect);

                let mut crossed = false;
                for area in &areas {
                    let trace = tracked.trace(area.bbox_test_point(), cross.test_method);
                    if cross.trace_enabled {
                        polylines.push(PolylineDisplay {
                            coordinates: trace.clone(),
                            line_width: cross.trace_line_width,
                            color: cross.trace_color,
                        });
                    }
                    if tracked.len() >= cross.min_trace_points
                        && !tracked.triggered()
                        && area.check_for_cross(&trace)
                    {
                        tracked.set_triggered();
                        crossed = true;
                        break;
                    }
                }
                crossed
            }
        };

        for polyline in polylines {
            ctx.display.add_polyline(polyline);
        }
        if !crossed {
            return false;
        }

        self.increment_and_check_trigger_count();
        self.occurrences += 1;
        let event_count = ctx.event_count.fetch_add(1, Ordering::SeqCst) + 1;
        let object = &ctx.objects[ctx.index];
        self.feed_heat_mapper(ctx.frame, object);
        self.dispatch_actions(ctx.trigger_name, event_count, ctx.frame, Some(object), ctx.display);
        true
    }

    pub(crate) fn post_cross(&mut self, ctx: &mut PostCtx<'_>) -> u32 {
        if self.skip_frame {
            return 0;
        }
        let frame_num = ctx.frame.frame_num;
        if let TriggerKind::Cross(cross) = &mut self.kind {
            if cross.store.is_empty() {
                return 0;
            }
            cross.store.purge(frame_num);
        }
        self.occurrences
    }
}

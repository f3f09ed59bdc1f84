//! Counting and per-object trigger variants, and the phase dispatch.
//!
//! The per-variant rules follow one shape: the check phase applies the
//! shared gates and gathers evidence (a count, a queue, an instance map),
//! and the post phase decides whether the frame produced an event.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::engine::OdeContext;
use crate::trigger::base::{
    CheckCtx, CheckOccurrenceCallback, OdeTrigger, PostCtx, PostProcessCallback, TriggerKind,
    TriggerState, When,
};
use crate::ANY_CLASS;

/// Last object id seen per `(source_id, class_id)`; ids are monotonic per
/// tracker, so a strictly greater id is a new instance.
pub(crate) type InstanceMap = HashMap<(u32, u32), u64>;

pub(crate) struct CustomState {
    pub(crate) checker: Option<CheckOccurrenceCallback>,
    pub(crate) post_processor: Option<PostProcessCallback>,
}

fn instance_gate(instances: &mut InstanceMap, key: (u32, u32), object_id: u64) -> bool {
    let last = instances.entry(key).or_insert(0);
    if *last < object_id {
        *last = object_id;
        true
    } else {
        false
    }
}

// -------------------- Constructors --------------------

impl OdeTrigger {
    /// Fires its actions once per frame, before or after the per-object
    /// pass. Does not consume the rate limit.
    pub fn always(ctx: &OdeContext, name: &str, source: Option<&str>, when: When) -> Arc<Self> {
        Self::with_kind(ctx, name, source, ANY_CLASS, 0, TriggerKind::Always { when })
    }

    /// Fires once per object that passes every filter.
    pub fn occurrence(
        ctx: &OdeContext,
        name: &str,
        source: Option<&str>,
        class_id: u32,
        limit: u32,
    ) -> Arc<Self> {
        Self::with_kind(ctx, name, source, class_id, limit, TriggerKind::Occurrence)
    }

    /// Fires once per frame with no matching object.
    pub fn absence(
        ctx: &OdeContext,
        name: &str,
        source: Option<&str>,
        class_id: u32,
        limit: u32,
    ) -> Arc<Self> {
        Self::with_kind(ctx, name, source, class_id, limit, TriggerKind::Absence)
    }

    /// Fires once per newly seen object instance per (source, class).
    pub fn instance(
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
            TriggerKind::Instance {
                instances: InstanceMap::new(),
            },
        )
    }

    /// Reports the running count of unique instances once per frame.
    pub fn accumulation(
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
            TriggerKind::Accumulation {
                instances: InstanceMap::new(),
                accumulative: 0,
            },
        )
    }

    /// Reports the per-frame match count once per frame.
    pub fn summation(
        ctx: &OdeContext,
        name: &str,
        source: Option<&str>,
        class_id: u32,
        limit: u32,
    ) -> Arc<Self> {
        Self::with_kind(ctx, name, source, class_id, limit, TriggerKind::Summation)
    }

    /// Fires when the per-frame match count falls within `[minimum, maximum]`.
    pub fn count(
        ctx: &OdeContext,
        name: &str,
        source: Option<&str>,
        class_id: u32,
        limit: u32,
        minimum: u32,
        maximum: u32,
    ) -> Arc<Self> {
        Self::with_kind(
            ctx,
            name,
            source,
            class_id,
            limit,
            TriggerKind::Count { minimum, maximum },
        )
    }

    /// Fires when the per-frame match count exceeds the running high.
    pub fn new_high(
        ctx: &OdeContext,
        name: &str,
        source: Option<&str>,
        class_id: u32,
        limit: u32,
        preset: u32,
    ) -> Arc<Self> {
        Self::with_kind(
            ctx,
            name,
            source,
            class_id,
            limit,
            TriggerKind::NewHigh {
                preset,
                current_high: preset,
            },
        )
    }

    /// Fires when the per-frame match count drops below the running low.
    pub fn new_low(
        ctx: &OdeContext,
        name: &str,
        source: Option<&str>,
        class_id: u32,
        limit: u32,
        preset: u32,
    ) -> Arc<Self> {
        Self::with_kind(
            ctx,
            name,
            source,
            class_id,
            limit,
            TriggerKind::NewLow {
                preset,
                current_low: preset,
            },
        )
    }

    /// Fires once per frame for the smallest matching object by bbox area.
    pub fn smallest(
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
            TriggerKind::Smallest { queued: Vec::new() },
        )
    }

    /// Fires once per frame for the largest matching object by bbox area.
    pub fn largest(
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
            TriggerKind::Largest { queued: Vec::new() },
        )
    }

    /// Delegates the per-object and per-frame decisions to client
    /// callbacks. Callback errors are caught and logged.
    pub fn custom(
        ctx: &OdeContext,
        name: &str,
        source: Option<&str>,
        class_id: u32,
        limit: u32,
        checker: Option<CheckOccurrenceCallback>,
        post_processor: Option<PostProcessCallback>,
    ) -> Arc<Self> {
        Self::with_kind(
            ctx,
            name,
            source,
            class_id,
            limit,
            TriggerKind::Custom(CustomState {
                checker,
                post_processor,
            }),
        )
    }

    /// Reconfigure the range of a count, persistence, or distance trigger.
    pub fn set_range(&self, minimum: u32, maximum: u32) -> Result<()> {
        let mut state = self.lock_state()?;
        match &mut state.kind {
            TriggerKind::Count {
                minimum: min,
                maximum: max,
            } => {
                *min = minimum;
                *max = maximum;
                Ok(())
            }
            TriggerKind::Persistence(persistence) => {
                persistence.minimum_ms = minimum as u64 * 1000;
                persistence.maximum_ms = maximum as u64 * 1000;
                Ok(())
            }
            TriggerKind::Distance(distance) => {
                distance.minimum = minimum;
                distance.maximum = maximum;
                Ok(())
            }
            _ => Err(anyhow!(
                "trigger '{}' does not have a configurable range",
                self.name()
            )),
        }
    }
}

// -------------------- Phase dispatch --------------------

impl TriggerState {
    pub(crate) fn check_occurrence(&mut self, mut ctx: CheckCtx<'_>) -> bool {
        match self.kind {
            TriggerKind::Always { .. } => false,
            TriggerKind::Occurrence => self.check_occurrence_event(&mut ctx),
            TriggerKind::Absence
            | TriggerKind::Summation
            | TriggerKind::Count { .. }
            | TriggerKind::NewHigh { .. }
            | TriggerKind::NewLow { .. } => self.check_counting(&mut ctx),
            TriggerKind::Instance { .. } | TriggerKind::Accumulation { .. } => {
                self.check_instance(&mut ctx)
            }
            TriggerKind::Smallest { .. } | TriggerKind::Largest { .. } => {
                self.check_extremum(&mut ctx)
            }
            TriggerKind::Custom(_) => self.check_custom(&mut ctx),
            TriggerKind::Earliest(_) | TriggerKind::Latest(_) => {
                self.check_duration_select(&mut ctx)
            }
            TriggerKind::Persistence(_) => self.check_persistence(&mut ctx),
            TriggerKind::Cross(_) => self.check_cross(&mut ctx),
            TriggerKind::Distance(_) | TriggerKind::Intersection(_) => self.check_ab(&mut ctx),
        }
    }

    pub(crate) fn post_process(&mut self, mut ctx: PostCtx<'_>) -> u32 {
        match self.kind {
            TriggerKind::Always { .. } => self.post_always(&mut ctx),
            TriggerKind::Occurrence | TriggerKind::Instance { .. } => 0,
            TriggerKind::Absence => self.post_absence(&mut ctx),
            TriggerKind::Accumulation { .. } => self.post_accumulation(&mut ctx),
            TriggerKind::Summation => self.post_summation(&mut ctx),
            TriggerKind::Count { .. } => self.post_count(&mut ctx),
            TriggerKind::NewHigh { .. } | TriggerKind::NewLow { .. } => {
                self.post_new_extreme(&mut ctx)
            }
            TriggerKind::Smallest { .. } | TriggerKind::Largest { .. } => {
                self.post_extremum(&mut ctx)
            }
            TriggerKind::Custom(_) => self.post_custom(&mut ctx),
            TriggerKind::Earliest(_) | TriggerKind::Latest(_) => self.post_duration_select(&mut ctx),
            TriggerKind::Persistence(_) => self.post_persistence(&mut ctx),
            TriggerKind::Cross(_) => self.post_cross(&mut ctx),
            TriggerKind::Distance(_) | TriggerKind::Intersection(_) => self.post_ab(&mut ctx),
        }
    }

    /// The common per-object gate: minimum criteria then the area gate.
    pub(crate) fn passes_object_gates(&mut self, ctx: &CheckCtx<'_>, class_id: u32) -> bool {
        let object = &ctx.objects[ctx.index];
        if !self.check_for_min_criteria(ctx.resolver, ctx.frame, object, class_id) {
            return false;
        }
        let rect = object.rect_params;
        self.check_for_within(&rect)
    }

    // -------------------- Occurrence --------------------

    fn check_occurrence_event(&mut self, ctx: &mut CheckCtx<'_>) -> bool {
        if !self.enabled {
            return false;
        }
        let class_id = self.class_id;
        if !self.passes_object_gates(ctx, class_id) {
            return false;
        }

        self.increment_and_check_trigger_count();
        self.occurrences += 1;
        let event_count = ctx.event_count.fetch_add(1, Ordering::SeqCst) + 1;

        ctx.objects[ctx.index].misc_obj_info.primary_metric = self.occurrences as u64;
        let object = &ctx.objects[ctx.index];
        self.feed_heat_mapper(ctx.frame, object);
        self.dispatch_actions(ctx.trigger_name, event_count, ctx.frame, Some(object), ctx.display);
        true
    }

    // -------------------- Counting family --------------------

    fn check_counting(&mut self, ctx: &mut CheckCtx<'_>) -> bool {
        // Absence and Count keep counting while disabled so a chained
        // trigger can enable them before post-process; the others are
        // inert when disabled.
        let counts_while_disabled =
            matches!(self.kind, TriggerKind::Absence | TriggerKind::Count { .. });
        if !counts_while_disabled && !self.enabled {
            return false;
        }
        let class_id = self.class_id;
        if !self.passes_object_gates(ctx, class_id) {
            return false;
        }
        self.occurrences += 1;
        true
    }

    fn post_absence(&mut self, ctx: &mut PostCtx<'_>) -> u32 {
        if !self.enabled || self.limit_exhausted() || self.occurrences > 0 {
            return 0;
        }
        self.increment_and_check_trigger_count();
        let event_count = ctx.event_count.fetch_add(1, Ordering::SeqCst) + 1;
        self.dispatch_actions(ctx.trigger_name, event_count, ctx.frame, None, ctx.display);
        1
    }

    fn post_summation(&mut self, ctx: &mut PostCtx<'_>) -> u32 {
        if !self.enabled || self.skip_frame || self.limit_exhausted() {
            return 0;
        }
        self.increment_and_check_trigger_count();
        let event_count = ctx.event_count.fetch_add(1, Ordering::SeqCst) + 1;
        ctx.frame.misc_frame_info.occurrences = self.occurrences as u64;
        self.dispatch_actions(ctx.trigger_name, event_count, ctx.frame, None, ctx.display);
        1
    }

    fn post_count(&mut self, ctx: &mut PostCtx<'_>) -> u32 {
        let TriggerKind::Count { minimum, maximum } = self.kind else {
            return 0;
        };
        if !self.enabled || self.occurrences < minimum || self.occurrences > maximum {
            return 0;
        }
        self.increment_and_check_trigger_count();
        let event_count = ctx.event_count.fetch_add(1, Ordering::SeqCst) + 1;
        self.dispatch_actions(ctx.trigger_name, event_count, ctx.frame, None, ctx.display);
        self.occurrences
    }

    fn post_new_extreme(&mut self, ctx: &mut PostCtx<'_>) -> u32 {
        if !self.enabled {
            return 0;
        }
        let occurrences = self.occurrences;
        let fire = match &mut self.kind {
            TriggerKind::NewHigh { current_high, .. } => {
                if occurrences > *current_high {
                    *current_high = occurrences;
                    true
                } else {
                    false
                }
            }
            TriggerKind::NewLow { current_low, .. } => {
                if occurrences < *current_low {
                    *current_low = occurrences;
                    true
                } else {
                    false
                }
            }
            _ => false,
        };
        if !fire {
            return 0;
        }
        self.increment_and_check_trigger_count();
        let event_count = ctx.event_count.fetch_add(1, Ordering::SeqCst) + 1;
        ctx.frame.misc_frame_info.occurrences = occurrences as u64;
        self.dispatch_actions(ctx.trigger_name, event_count, ctx.frame, None, ctx.display);
        1
    }

    // -------------------- Instance & accumulation --------------------

    fn check_instance(&mut self, ctx: &mut CheckCtx<'_>) -> bool {
        if !self.enabled {
            return false;
        }
        let class_id = self.class_id;
        if !self.passes_object_gates(ctx, class_id) {
            return false;
        }

        let key = (ctx.frame.source_id, ctx.objects[ctx.index].class_id);
        let object_id = ctx.objects[ctx.index].object_id;

        enum Outcome {
            Stale,
            NewInstance,
            Accumulated { total: u32, is_new: bool },
        }
        let outcome = match &mut self.kind {
            TriggerKind::Instance { instances } => {
                if instance_gate(instances, key, object_id) {
                    Outcome::NewInstance
                } else {
                    Outcome::Stale
                }
            }
            TriggerKind::Accumulation {
                instances,
                accumulative,
            } => {
                let is_new = instance_gate(instances, key, object_id);
                if is_new {
                    *accumulative += 1;
                }
                Outcome::Accumulated {
                    total: *accumulative,
                    is_new,
                }
            }
            _ => Outcome::Stale,
        };

        match outcome {
            Outcome::Stale => false,
            Outcome::Accumulated { total, is_new } => {
                // occurrences always reflects the running total; it is
                // cleared again at the next pre-process.
                self.occurrences = total;
                is_new
            }
            Outcome::NewInstance => {
                self.increment_and_check_trigger_count();
                self.occurrences += 1;
                let event_count = ctx.event_count.fetch_add(1, Ordering::SeqCst) + 1;
                ctx.objects[ctx.index].misc_obj_info.primary_metric = self.occurrences as u64;
                let object = &ctx.objects[ctx.index];
                self.feed_heat_mapper(ctx.frame, object);
                self.dispatch_actions(
                    ctx.trigger_name,
                    event_count,
                    ctx.frame,
                    Some(object),
                    ctx.display,
                );
                true
            }
        }
    }

    fn post_accumulation(&mut self, ctx: &mut PostCtx<'_>) -> u32 {
        if !self.enabled || self.skip_frame || self.limit_exhausted() {
            return 0;
        }
        self.increment_and_check_trigger_count();
        let event_count = ctx.event_count.fetch_add(1, Ordering::SeqCst) + 1;
        ctx.frame.misc_frame_info.occurrences = self.occurrences as u64;
        self.dispatch_actions(ctx.trigger_name, event_count, ctx.frame, None, ctx.display);
        match self.kind {
            TriggerKind::Accumulation { accumulative, .. } => accumulative,
            _ => 0,
        }
    }

    // -------------------- Smallest / largest --------------------

    fn check_extremum(&mut self, ctx: &mut CheckCtx<'_>) -> bool {
        let class_id = self.class_id;
        if !self.passes_object_gates(ctx, class_id) {
            return false;
        }
        if let TriggerKind::Smallest { queued } | TriggerKind::Largest { queued } = &mut self.kind {
            queued.push(ctx.index);
        }
        true
    }

    fn post_extremum(&mut self, ctx: &mut PostCtx<'_>) -> u32 {
        self.occurrences = 0;
        let smallest = matches!(self.kind, TriggerKind::Smallest { .. });
        let queued = match &mut self.kind {
            TriggerKind::Smallest { queued } | TriggerKind::Largest { queued } => {
                std::mem::take(queued)
            }
            _ => return 0,
        };
        if !self.enabled || queued.is_empty() {
            return 0;
        }

        self.occurrences = 1;
        self.increment_and_check_trigger_count();
        let event_count = ctx.event_count.fetch_add(1, Ordering::SeqCst) + 1;

        // first object with the extreme value wins; ties are ignored
        let mut best: Option<(usize, u64)> = None;
        for &index in &queued {
            if index >= ctx.objects.len() {
                continue;
            }
            let rect = ctx.objects[index].rect_params;
            let area = (rect.width as u64).saturating_mul(rect.height as u64);
            let replace = match best {
                None => true,
                Some((_, best_area)) => {
                    if smallest {
                        area < best_area
                    } else {
                        area > best_area
                    }
                }
            };
            if replace {
                best = Some((index, area));
            }
        }
        let Some((index, area)) = best else {
            return 0;
        };
        ctx.objects[index].misc_obj_info.primary_metric = area;
        let object = &ctx.objects[index];
        self.dispatch_actions(ctx.trigger_name, event_count, ctx.frame, Some(object), ctx.display);
        1
    }

    // -------------------- Always --------------------

    fn post_always(&mut self, ctx: &mut PostCtx<'_>) -> u32 {
        let TriggerKind::Always { when } = self.kind else {
            return 0;
        };
        if self.skip_frame || !self.enabled || when != When::PostOccurrenceCheck {
            return 0;
        }
        let event_count = ctx.event_count.load(Ordering::SeqCst);
        self.dispatch_actions(ctx.trigger_name, event_count, ctx.frame, None, ctx.display);
        1
    }

    // -------------------- Custom --------------------

    fn check_custom(&mut self, ctx: &mut CheckCtx<'_>) -> bool {
        if !self.enabled {
            return false;
        }
        let class_id = self.class_id;
        if !self.passes_object_gates(ctx, class_id) {
            return false;
        }
        let verdict = {
            let TriggerKind::Custom(custom) = &mut self.kind else {
                return false;
            };
            let Some(checker) = custom.checker.as_mut() else {
                return false;
            };
            match checker(ctx.frame, &ctx.objects[ctx.index]) {
                Ok(verdict) => verdict,
                Err(err) => {
                    log::error!(
                        "custom trigger '{}' check callback failed: {:#}",
                        ctx.trigger_name,
                        err
                    );
                    return false;
                }
            }
        };
        if !verdict {
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

    fn post_custom(&mut self, ctx: &mut PostCtx<'_>) -> u32 {
        if !self.enabled {
            return 0;
        }
        let verdict = {
            let TriggerKind::Custom(custom) = &mut self.kind else {
                return 0;
            };
            let Some(post_processor) = custom.post_processor.as_mut() else {
                return 0;
            };
            match post_processor(ctx.frame) {
                Ok(verdict) => verdict,
                Err(err) => {
                    log::error!(
                        "custom trigger '{}' post-process callback failed: {:#}",
                        ctx.trigger_name,
                        err
                    );
                    return 0;
                }
            }
        };
        if !verdict {
            return 0;
        }
        self.increment_and_check_trigger_count();
        let event_count = ctx.event_count.fetch_add(1, Ordering::SeqCst) + 1;
        self.dispatch_actions(ctx.trigger_name, event_count, ctx.frame, None, ctx.display);
        1
    }
}

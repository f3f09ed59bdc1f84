//! Pairwise class-A/class-B trigger variants.
//!
//! The check phase partitions matching objects into an A list and a B list
//! (one list when the classes are equal); the post phase tests every
//! eligible pair and fires each action once per object in a matching pair.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::engine::OdeContext;
use crate::geometry::{
    point_distance, rectangle_distance, rectangles_overlap, BboxTestPoint, Rectangle,
};
use crate::trigger::base::{CheckCtx, OdeTrigger, PostCtx, TriggerKind, TriggerState};

/// How the distance trigger's `[minimum, maximum]` range is interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMethod {
    FixedPixels,
    PercentWidthA,
    PercentWidthB,
    PercentHeightA,
    PercentHeightB,
}

pub(crate) struct AbState {
    pub(crate) class_id_a: u32,
    pub(crate) class_id_b: u32,
    pub(crate) list_a: Vec<usize>,
    pub(crate) list_b: Vec<usize>,
}

impl AbState {
    fn new(class_id_a: u32, class_id_b: u32) -> Self {
        Self {
            class_id_a,
            class_id_b,
            list_a: Vec::new(),
            list_b: Vec::new(),
        }
    }
}

pub(crate) struct DistanceState {
    pub(crate) ab: AbState,
    pub(crate) minimum: u32,
    pub(crate) maximum: u32,
    pub(crate) test_point: BboxTestPoint,
    pub(crate) test_method: DistanceMethod,
}

pub(crate) struct IntersectionState {
    pub(crate) ab: AbState,
}

// -------------------- Constructors & settings --------------------

impl OdeTrigger {
    /// Fires for every eligible pair whose distance falls *outside*
    /// `[minimum, maximum]`, as interpreted by `test_method`.
    #[allow(clippy::too_many_arguments)]
    pub fn distance(
        ctx: &OdeContext,
        name: &str,
        source: Option<&str>,
        class_id_a: u32,
        class_id_b: u32,
        limit: u32,
        minimum: u32,
        maximum: u32,
        test_point: BboxTestPoint,
        test_method: DistanceMethod,
    ) -> Arc<Self> {
        Self::with_kind(
            ctx,
            name,
            source,
            class_id_a,
            limit,
            TriggerKind::Distance(DistanceState {
                ab: AbState::new(class_id_a, class_id_b),
                minimum,
                maximum,
                test_point,
                test_method,
            }),
        )
    }

    /// Fires for every eligible pair of overlapping bounding boxes.
    pub fn intersection(
        ctx: &OdeContext,
        name: &str,
        source: Option<&str>,
        class_id_a: u32,
        class_id_b: u32,
        limit: u32,
    ) -> Arc<Self> {
        Self::with_kind(
            ctx,
            name,
            source,
            class_id_a,
            limit,
            TriggerKind::Intersection(IntersectionState {
                ab: AbState::new(class_id_a, class_id_b),
            }),
        )
    }

    pub fn class_id_ab(&self) -> Result<(u32, u32)> {
        let state = self.lock_state()?;
        match &state.kind {
            TriggerKind::Distance(distance) => {
                Ok((distance.ab.class_id_a, distance.ab.class_id_b))
            }
            TriggerKind::Intersection(intersection) => {
                Ok((intersection.ab.class_id_a, intersection.ab.class_id_b))
            }
            _ => Err(anyhow!("trigger '{}' is not an A-B trigger", self.name())),
        }
    }

    pub fn set_class_id_ab(&self, class_id_a: u32, class_id_b: u32) -> Result<()> {
        let mut state = self.lock_state()?;
        state.class_id = class_id_a;
        match &mut state.kind {
            TriggerKind::Distance(distance) => {
                distance.ab.class_id_a = class_id_a;
                distance.ab.class_id_b = class_id_b;
                Ok(())
            }
            TriggerKind::Intersection(intersection) => {
                intersection.ab.class_id_a = class_id_a;
                intersection.ab.class_id_b = class_id_b;
                Ok(())
            }
            _ => Err(anyhow!("trigger '{}' is not an A-B trigger", self.name())),
        }
    }

    /// Reconfigure the distance trigger's test point and method.
    pub fn set_test_params(
        &self,
        test_point: BboxTestPoint,
        test_method: DistanceMethod,
    ) -> Result<()> {
        let mut state = self.lock_state()?;
        match &mut state.kind {
            TriggerKind::Distance(distance) => {
                distance.test_point = test_point;
                distance.test_method = test_method;
                Ok(())
            }
            _ => Err(anyhow!("trigger '{}' is not a distance trigger", self.name())),
        }
    }
}

// -------------------- Phase logic --------------------

impl TriggerState {
    fn ab_mut(&mut self) -> Option<&mut AbState> {
        match &mut self.kind {
            TriggerKind::Distance(distance) => Some(&mut distance.ab),
            TriggerKind::Intersection(intersection) => Some(&mut intersection.ab),
            _ => None,
        }
    }

    pub(crate) fn check_ab(&mut self, ctx: &mut CheckCtx<'_>) -> bool {
        if !self.enabled {
            return false;
        }
        let Some((class_id_a, class_id_b)) = self
            .ab_mut()
            .map(|ab| (ab.class_id_a, ab.class_id_b))
        else {
            return false;
        };

        if self.passes_object_gates(ctx, class_id_a) {
            if let Some(ab) = self.ab_mut() {
                ab.list_a.push(ctx.index);
            }
            return true;
        }
        if class_id_a != class_id_b && self.passes_object_gates(ctx, class_id_b) {
            if let Some(ab) = self.ab_mut() {
                ab.list_b.push(ctx.index);
            }
            return true;
        }
        false
    }

    pub(crate) fn post_ab(&mut self, ctx: &mut PostCtx<'_>) -> u32 {
        self.occurrences = 0;

        #[derive(Clone, Copy)]
        enum PairTest {
            Distance {
                minimum: u32,
                maximum: u32,
                test_point: BboxTestPoint,
                test_method: DistanceMethod,
            },
            Overlap,
        }
        let (test, list_a, list_b, single_class) = match &mut self.kind {
            TriggerKind::Distance(distance) => (
                PairTest::Distance {
                    minimum: distance.minimum,
                    maximum: distance.maximum,
                    test_point: distance.test_point,
                    test_method: distance.test_method,
                },
                std::mem::take(&mut distance.ab.list_a),
                std::mem::take(&mut distance.ab.list_b),
                distance.ab.class_id_a == distance.ab.class_id_b,
            ),
            TriggerKind::Intersection(intersection) => (
                PairTest::Overlap,
                std::mem::take(&mut intersection.ab.list_a),
                std::mem::take(&mut intersection.ab.list_b),
                intersection.ab.class_id_a == intersection.ab.class_id_b,
            ),
            _ => return 0,
        };
        if !self.enabled {
            return 0;
        }

        let pairs: Vec<(usize, usize)> = if single_class {
            let mut pairs = Vec::new();
            for i in 0..list_a.len() {
                for j in (i + 1)..list_a.len() {
                    pairs.push((list_a[i], list_a[j]));
                }
            }
            pairs
        } else {
            let mut pairs = Vec::new();
            for &a in &list_a {
                for &b in &list_b {
                    if a != b {
                        pairs.push((a, b));
                    }
                }
            }
            pairs
        };

        for (index_a, index_b) in pairs {
            if index_a >= ctx.objects.len() || index_b >= ctx.objects.len() {
                continue;
            }
            let rect_a = ctx.objects[index_a].rect_params;
            let rect_b = ctx.objects[index_b].rect_params;
            let matched = match test {
                PairTest::Distance {
                    minimum,
                    maximum,
                    test_point,
                    test_method,
                } => outside_distance_range(
                    &rect_a,
                    &rect_b,
                    minimum,
                    maximum,
                    test_point,
                    test_method,
                ),
                PairTest::Overlap => rectangles_overlap(&rect_a, &rect_b),
            };
            if !matched {
                continue;
            }

            self.occurrences += 1;
            self.increment_and_check_trigger_count();
            let event_count = ctx.event_count.fetch_add(1, Ordering::SeqCst) + 1;

            ctx.objects[index_a].misc_obj_info.primary_metric = self.occurrences as u64;
            ctx.objects[index_b].misc_obj_info.primary_metric = self.occurrences as u64;

            // each action fires twice, once per object in the pair
            {
                let object = &ctx.objects[index_a];
                self.dispatch_actions(
                    ctx.trigger_name,
                    event_count,
                    ctx.frame,
                    Some(object),
                    ctx.display,
                );
            }
            {
                let object = &ctx.objects[index_b];
                self.dispatch_actions(
                    ctx.trigger_name,
                    event_count,
                    ctx.frame,
                    Some(object),
                    ctx.display,
                );
            }

            if self.limit_exhausted() {
                return self.occurrences;
            }
        }
        self.occurrences
    }
}

/// A pair matches when its distance falls outside `[minimum, maximum]`.
///
/// With a concrete test point the distance is point-to-point; with `Any`
/// it is the rectangle-to-rectangle distance. Percent methods scale the
/// range by the named rectangle's dimension.
fn outside_distance_range(
    rect_a: &Rectangle,
    rect_b: &Rectangle,
    minimum: u32,
    maximum: u32,
    test_point: BboxTestPoint,
    test_method: DistanceMethod,
) -> bool {
    let distance = match test_point {
        BboxTestPoint::Any => rectangle_distance(rect_a, rect_b),
        point => {
            let a = rect_a.test_point(point).expect("concrete test point");
            let b = rect_b.test_point(point).expect("concrete test point");
            point_distance(a, b)
        }
    };
    let (minimum, maximum) = (minimum as f64, maximum as f64);
    let (minimum, maximum) = match test_method {
        DistanceMethod::FixedPixels => (minimum, maximum),
        DistanceMethod::PercentWidthA => (
            minimum * rect_a.width as f64 / 100.0,
            maximum * rect_a.width as f64 / 100.0,
        ),
        DistanceMethod::PercentWidthB => (
            minimum * rect_b.width as f64 / 100.0,
            maximum * rect_b.width as f64 / 100.0,
        ),
        DistanceMethod::PercentHeightA => (
            minimum * rect_a.height as f64 / 100.0,
            maximum * rect_a.height as f64 / 100.0,
        ),
        DistanceMethod::PercentHeightB => (
            minimum * rect_b.height as f64 / 100.0,
            maximum * rect_b.height as f64 / 100.0,
        ),
    };
    minimum > distance || maximum < distance
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_range_is_inverted() {
        let a = Rectangle::new(0.0, 0.0, 10.0, 10.0);
        let b = Rectangle::new(40.0, 0.0, 10.0, 10.0);
        // center distance is 40 px
        let in_range = outside_distance_range(
            &a,
            &b,
            0,
            50,
            BboxTestPoint::Center,
            DistanceMethod::FixedPixels,
        );
        assert!(!in_range);
        let outside = outside_distance_range(
            &a,
            &b,
            0,
            30,
            BboxTestPoint::Center,
            DistanceMethod::FixedPixels,
        );
        assert!(outside);
    }

    #[test]
    fn percent_method_scales_by_named_rectangle() {
        let a = Rectangle::new(0.0, 0.0, 100.0, 10.0);
        let b = Rectangle::new(150.0, 0.0, 10.0, 10.0);
        // nearest-edge distance is 50 px; 40% of A-width = 40, 80% = 80
        let inside = outside_distance_range(
            &a,
            &b,
            40,
            80,
            BboxTestPoint::Any,
            DistanceMethod::PercentWidthA,
        );
        assert!(!inside);
        // 10%..=30% of A-width = 10..=30 px, 50 is outside
        let outside = outside_distance_range(
            &a,
            &b,
            10,
            30,
            BboxTestPoint::Any,
            DistanceMethod::PercentWidthA,
        );
        assert!(outside);
    }
}

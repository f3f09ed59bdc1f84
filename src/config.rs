//! Engine configuration.
//!
//! A JSON file declares areas and triggers so hosts can stand up an engine
//! without code. The config path may come from the `ODE_ENGINE_CONFIG`
//! environment variable; every entry is validated before the engine is
//! built.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use crate::area::OdeArea;
use crate::display::ColorPalette;
use crate::engine::{OdeContext, OdeEngine};
use crate::geometry::{BboxTestPoint, Point};
use crate::heat_mapper::OdeHeatMapper;
use crate::tracking::TraceTestMethod;
use crate::trigger::{DistanceMethod, OdeTrigger, When};
use crate::ANY_CLASS;

const DEFAULT_HEAT_MAP_ALPHA: f32 = 0.4;
const DEFAULT_MIN_TRACE_POINTS: usize = 2;
const DEFAULT_MAX_TRACE_POINTS: usize = 10;

#[derive(Debug, Deserialize, Default)]
struct EngineConfigFile {
    areas: Option<Vec<AreaEntry>>,
    triggers: Option<Vec<TriggerEntry>>,
}

#[derive(Debug, Deserialize)]
struct AreaEntry {
    name: String,
    kind: String,
    points: Vec<[f64; 2]>,
    test_point: Option<BboxTestPoint>,
}

#[derive(Debug, Deserialize)]
struct TriggerEntry {
    name: String,
    kind: String,
    source: Option<String>,
    class_id: Option<u32>,
    class_id_b: Option<u32>,
    limit: Option<u32>,
    interval: Option<u32>,
    min_confidence: Option<f32>,
    min_width: Option<f32>,
    min_height: Option<f32>,
    max_width: Option<f32>,
    max_height: Option<f32>,
    infer_done_only: Option<bool>,
    minimum: Option<u32>,
    maximum: Option<u32>,
    preset: Option<u32>,
    min_trace_points: Option<usize>,
    max_trace_points: Option<usize>,
    trace_method: Option<TraceTestMethod>,
    test_point: Option<BboxTestPoint>,
    test_method: Option<DistanceMethod>,
    when: Option<When>,
    areas: Option<Vec<String>>,
    reset_timeout: Option<u32>,
    heat_map: Option<HeatMapEntry>,
}

#[derive(Debug, Deserialize)]
struct HeatMapEntry {
    cols: usize,
    rows: usize,
    test_point: Option<BboxTestPoint>,
}

/// Parsed and validated engine configuration.
#[derive(Debug)]
pub struct EngineConfig {
    file: EngineConfigFile,
}

impl EngineConfig {
    /// Load from the path named by `ODE_ENGINE_CONFIG`; an empty
    /// configuration when the variable is unset.
    pub fn load_from_env() -> Result<Self> {
        match std::env::var("ODE_ENGINE_CONFIG") {
            Ok(path) if !path.trim().is_empty() => Self::load(Path::new(&path)),
            _ => Ok(Self {
                file: EngineConfigFile::default(),
            }),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let file: EngineConfigFile = serde_json::from_str(raw)?;
        let config = Self { file };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let mut area_names = std::collections::HashSet::new();
        for area in self.file.areas.as_deref().unwrap_or_default() {
            if !area_names.insert(area.name.as_str()) {
                return Err(anyhow!("duplicate area name '{}'", area.name));
            }
            match area.kind.as_str() {
                "inclusion" | "exclusion" => {
                    if area.points.len() < 3 {
                        return Err(anyhow!(
                            "area '{}' requires at least 3 points",
                            area.name
                        ));
                    }
                }
                "line" => {
                    if area.points.len() != 2 {
                        return Err(anyhow!("line area '{}' requires 2 points", area.name));
                    }
                }
                other => return Err(anyhow!("unknown area kind '{}'", other)),
            }
        }

        let mut trigger_names = std::collections::HashSet::new();
        for trigger in self.file.triggers.as_deref().unwrap_or_default() {
            if !trigger_names.insert(trigger.name.as_str()) {
                return Err(anyhow!("duplicate trigger name '{}'", trigger.name));
            }
            if let (Some(minimum), Some(maximum)) = (trigger.minimum, trigger.maximum) {
                if minimum > maximum {
                    return Err(anyhow!(
                        "trigger '{}': minimum {} exceeds maximum {}",
                        trigger.name,
                        minimum,
                        maximum
                    ));
                }
            }
            for area in trigger.areas.as_deref().unwrap_or_default() {
                if !area_names.contains(area.as_str()) {
                    return Err(anyhow!(
                        "trigger '{}' references unknown area '{}'",
                        trigger.name,
                        area
                    ));
                }
            }
            if trigger.kind == "cross" && trigger.areas.as_deref().unwrap_or_default().is_empty() {
                return Err(anyhow!(
                    "cross trigger '{}' requires at least one area",
                    trigger.name
                ));
            }
        }
        Ok(())
    }

    /// Build an engine with every configured area and trigger registered.
    pub fn build(&self, context: OdeContext) -> Result<OdeEngine> {
        let engine = OdeEngine::new(context);

        let mut areas: HashMap<&str, Arc<OdeArea>> = HashMap::new();
        for entry in self.file.areas.as_deref().unwrap_or_default() {
            let test_point = entry.test_point.unwrap_or(BboxTestPoint::South);
            let points: Vec<Point> = entry
                .points
                .iter()
                .map(|[x, y]| Point::new(*x, *y))
                .collect();
            let area = match entry.kind.as_str() {
                "inclusion" => OdeArea::inclusion(&entry.name, points, test_point)?,
                "exclusion" => OdeArea::exclusion(&entry.name, points, test_point)?,
                "line" => OdeArea::line(&entry.name, points[0], points[1], test_point)?,
                other => return Err(anyhow!("unknown area kind '{}'", other)),
            };
            areas.insert(entry.name.as_str(), Arc::new(area));
        }

        for entry in self.file.triggers.as_deref().unwrap_or_default() {
            let trigger = self.build_trigger(engine.context(), entry)?;
            for area_name in entry.areas.as_deref().unwrap_or_default() {
                let area = areas
                    .get(area_name.as_str())
                    .ok_or_else(|| anyhow!("unknown area '{}'", area_name))?;
                trigger.add_area(area.clone())?;
            }
            if let Some(heat_map) = &entry.heat_map {
                let mapper = OdeHeatMapper::new(
                    &format!("{}-heat-map", entry.name),
                    heat_map.cols,
                    heat_map.rows,
                    heat_map.test_point.unwrap_or(BboxTestPoint::South),
                    ColorPalette::spectral(DEFAULT_HEAT_MAP_ALPHA),
                )?;
                trigger.add_heat_mapper(Arc::new(std::sync::Mutex::new(mapper)))?;
            }
            self.apply_common_settings(&trigger, entry);
            engine.add_trigger(trigger)?;
        }
        Ok(engine)
    }

    fn build_trigger(&self, ctx: &OdeContext, entry: &TriggerEntry) -> Result<Arc<OdeTrigger>> {
        let name = entry.name.as_str();
        let source = entry.source.as_deref();
        let class_id = entry.class_id.unwrap_or(ANY_CLASS);
        let class_id_b = entry.class_id_b.unwrap_or(class_id);
        let limit = entry.limit.unwrap_or(0);
        let minimum = entry.minimum.unwrap_or(0);
        let maximum = entry.maximum.unwrap_or(0);

        let trigger = match entry.kind.as_str() {
            "always" => OdeTrigger::always(
                ctx,
                name,
                source,
                entry.when.unwrap_or(When::PreOccurrenceCheck),
            ),
            "occurrence" => OdeTrigger::occurrence(ctx, name, source, class_id, limit),
            "absence" => OdeTrigger::absence(ctx, name, source, class_id, limit),
            "instance" => OdeTrigger::instance(ctx, name, source, class_id, limit),
            "accumulation" => OdeTrigger::accumulation(ctx, name, source, class_id, limit),
            "summation" => OdeTrigger::summation(ctx, name, source, class_id, limit),
            "count" => OdeTrigger::count(ctx, name, source, class_id, limit, minimum, maximum),
            "new_high" => OdeTrigger::new_high(
                ctx,
                name,
                source,
                class_id,
                limit,
                entry.preset.unwrap_or(0),
            ),
            "new_low" => OdeTrigger::new_low(
                ctx,
                name,
                source,
                class_id,
                limit,
                entry.preset.unwrap_or(0),
            ),
            "smallest" => OdeTrigger::smallest(ctx, name, source, class_id, limit),
            "largest" => OdeTrigger::largest(ctx, name, source, class_id, limit),
            "earliest" => OdeTrigger::earliest(ctx, name, source, class_id, limit),
            "latest" => OdeTrigger::latest(ctx, name, source, class_id, limit),
            "persistence" => {
                OdeTrigger::persistence(ctx, name, source, class_id, limit, minimum, maximum)
            }
            "cross" => OdeTrigger::cross(
                ctx,
                name,
                source,
                class_id,
                limit,
                entry.min_trace_points.unwrap_or(DEFAULT_MIN_TRACE_POINTS),
                entry.max_trace_points.unwrap_or(DEFAULT_MAX_TRACE_POINTS),
                entry.trace_method.unwrap_or(TraceTestMethod::AllPoints),
            ),
            "distance" => OdeTrigger::distance(
                ctx,
                name,
                source,
                class_id,
                class_id_b,
                limit,
                minimum,
                maximum,
                entry.test_point.unwrap_or(BboxTestPoint::Any),
                entry.test_method.unwrap_or(DistanceMethod::FixedPixels),
            ),
            "intersection" => {
                OdeTrigger::intersection(ctx, name, source, class_id, class_id_b, limit)
            }
            other => return Err(anyhow!("unknown trigger kind '{}'", other)),
        };
        Ok(trigger)
    }

    fn apply_common_settings(&self, trigger: &Arc<OdeTrigger>, entry: &TriggerEntry) {
        if let Some(interval) = entry.interval {
            trigger.set_interval(interval);
        }
        if let Some(min_confidence) = entry.min_confidence {
            trigger.set_min_confidence(min_confidence);
        }
        if entry.min_width.is_some() || entry.min_height.is_some() {
            trigger.set_min_dimensions(
                entry.min_width.unwrap_or(0.0),
                entry.min_height.unwrap_or(0.0),
            );
        }
        if entry.max_width.is_some() || entry.max_height.is_some() {
            trigger.set_max_dimensions(
                entry.max_width.unwrap_or(0.0),
                entry.max_height.unwrap_or(0.0),
            );
        }
        if let Some(infer_done_only) = entry.infer_done_only {
            trigger.set_infer_done_only(infer_done_only);
        }
        if let Some(reset_timeout) = entry.reset_timeout {
            trigger.set_reset_timeout(reset_timeout);
        }
    }
}

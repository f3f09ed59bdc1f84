//! ode_demo - end-to-end synthetic run of the ODE engine.
//!
//! Synthesizes a stream of frames with objects drifting across the scene,
//! evaluates an occurrence trigger with an attached heat mapper plus a
//! line-cross trigger, and prints a summary.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use clap::Parser;
use rand::Rng;

use ode_engine::{
    action_ref, BboxTestPoint, CaptureAction, ColorPalette, DisplayMeta, FrameMeta, ObjectMeta,
    OdeArea, OdeContext, OdeEngine, OdeHeatMapper, OdeTrigger, Point, Rectangle, TraceTestMethod,
    ANY_CLASS,
};

const FRAME_WIDTH: u32 = 1280;
const FRAME_HEIGHT: u32 = 720;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Number of synthetic frames to process.
    #[arg(long, default_value_t = 300)]
    frames: u64,

    /// Frames per second of the synthetic stream.
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Number of synthetic objects drifting through the scene.
    #[arg(long, default_value_t = 4)]
    objects: usize,

    /// Heat map grid columns.
    #[arg(long, default_value_t = 16)]
    cols: usize,

    /// Heat map grid rows.
    #[arg(long, default_value_t = 9)]
    rows: usize,
}

struct DemoObject {
    id: u64,
    class_id: u32,
    x: f32,
    y: f32,
    dx: f32,
    dy: f32,
}

impl DemoObject {
    fn spawn(id: u64, rng: &mut impl Rng) -> Self {
        Self {
            id,
            class_id: rng.gen_range(0..3),
            x: rng.gen_range(0.0..(FRAME_WIDTH as f32 - 80.0)),
            y: rng.gen_range(0.0..(FRAME_HEIGHT as f32 - 120.0)),
            dx: rng.gen_range(-6.0..6.0),
            dy: rng.gen_range(-4.0..4.0),
        }
    }

    fn advance(&mut self) {
        self.x = (self.x + self.dx).clamp(0.0, FRAME_WIDTH as f32 - 80.0);
        self.y = (self.y + self.dy).clamp(0.0, FRAME_HEIGHT as f32 - 120.0);
        if self.x <= 0.0 || self.x >= FRAME_WIDTH as f32 - 80.0 {
            self.dx = -self.dx;
        }
        if self.y <= 0.0 || self.y >= FRAME_HEIGHT as f32 - 120.0 {
            self.dy = -self.dy;
        }
    }

    fn meta(&self, rng: &mut impl Rng) -> ObjectMeta {
        ObjectMeta {
            class_id: self.class_id,
            object_id: self.id,
            unique_component_id: 1,
            confidence: rng.gen_range(0.5..1.0),
            rect_params: Rectangle::new(self.x, self.y, 80.0, 120.0),
            ..Default::default()
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let mut rng = rand::thread_rng();

    let engine = OdeEngine::new(OdeContext::with_defaults());

    // every-occurrence trigger feeding the heat mapper
    let occurrence = OdeTrigger::occurrence(engine.context(), "every-occurrence", None, ANY_CLASS, 0);
    let heat_mapper = OdeHeatMapper::new(
        "occurrence-heat-map",
        args.cols,
        args.rows,
        BboxTestPoint::Center,
        ColorPalette::spectral(0.4),
    )?;
    let heat_mapper = Arc::new(Mutex::new(heat_mapper));
    occurrence.add_heat_mapper(heat_mapper.clone())?;
    engine.add_trigger(occurrence)?;

    // vertical mid-scene line with a cross trigger
    let gate = OdeArea::line(
        "mid-gate",
        Point::new(FRAME_WIDTH as f64 / 2.0, 0.0),
        Point::new(FRAME_WIDTH as f64 / 2.0, FRAME_HEIGHT as f64),
        BboxTestPoint::Center,
    )?;
    let cross = OdeTrigger::cross(
        engine.context(),
        "gate-cross",
        None,
        ANY_CLASS,
        0,
        3,
        30,
        TraceTestMethod::AllPoints,
    );
    cross.add_area(Arc::new(gate))?;
    let capture = CaptureAction::new("cross-capture");
    let crossings = capture.events();
    cross.add_action(action_ref(capture))?;
    engine.add_trigger(cross)?;

    let mut objects: Vec<DemoObject> = (0..args.objects)
        .map(|i| DemoObject::spawn(i as u64 + 1, &mut rng))
        .collect();

    let frame_interval_ms = 1000 / args.fps.max(1) as u64;
    let mut display = DisplayMeta::new();
    for frame_num in 0..args.frames {
        for object in objects.iter_mut() {
            object.advance();
        }
        let mut frame = FrameMeta {
            source_id: 0,
            frame_num,
            source_frame_width: FRAME_WIDTH,
            source_frame_height: FRAME_HEIGHT,
            infer_done: true,
            ntp_timestamp_ms: frame_num * frame_interval_ms,
            ..Default::default()
        };
        let mut metas: Vec<ObjectMeta> = objects.iter().map(|o| o.meta(&mut rng)).collect();
        display.clear();
        engine.process_frame(&mut frame, &mut metas, &mut display);
    }

    let crossings = crossings.lock().expect("capture store");
    log::info!(
        "processed {} frames, {} total events, {} gate crossings",
        args.frames,
        engine.context().events_total(),
        crossings.len()
    );
    let heat_mapper = heat_mapper.lock().expect("heat mapper");
    let (total, most) = heat_mapper.metrics();
    log::info!("heat map: {} occurrences, hottest cell {}", total, most);
    println!("{}", heat_mapper.dump());
    Ok(())
}

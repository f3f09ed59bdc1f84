//! Behavior of the remaining trigger variants through the engine.

use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use ode_engine::{
    action_ref, AreaKind, BboxTestPoint, CaptureAction, CapturedEvent, DisplayMeta, FrameMeta,
    ManualScheduler, ObjectMeta, OdeArea, OdeContext, OdeEngine, OdeHeatMapper, OdeTrigger,
    ColorPalette, Rectangle, StaticNameResolver, When, ANY_CLASS,
};

fn test_context() -> OdeContext {
    OdeContext::new(
        Arc::new(ManualScheduler::new()),
        Arc::new(StaticNameResolver::new()),
    )
}

fn frame(frame_num: u64) -> FrameMeta {
    FrameMeta {
        frame_num,
        source_frame_width: 1280,
        source_frame_height: 720,
        infer_done: true,
        ntp_timestamp_ms: frame_num * 100,
        ..Default::default()
    }
}

fn object(object_id: u64, class_id: u32, left: f32, width: f32, height: f32) -> ObjectMeta {
    ObjectMeta {
        object_id,
        class_id,
        confidence: 0.8,
        rect_params: Rectangle::new(left, 10.0, width, height),
        ..Default::default()
    }
}

fn run_frame(engine: &OdeEngine, frame_num: u64, objects: &mut Vec<ObjectMeta>) -> u32 {
    let mut frame = frame(frame_num);
    let mut display = DisplayMeta::new();
    engine.process_frame(&mut frame, objects, &mut display)
}

fn captured(events: &Arc<Mutex<Vec<CapturedEvent>>>) -> Vec<CapturedEvent> {
    events.lock().unwrap().clone()
}

#[test]
fn always_trigger_fires_every_frame_without_objects() {
    let engine = OdeEngine::new(test_context());
    let trigger = OdeTrigger::always(engine.context(), "heartbeat", None, When::PostOccurrenceCheck);
    let capture = CaptureAction::new("capture");
    let events = capture.events();
    trigger.add_action(action_ref(capture)).unwrap();
    engine.add_trigger(trigger).unwrap();

    let mut empty: Vec<ObjectMeta> = Vec::new();
    for frame_num in 0..3 {
        assert_eq!(run_frame(&engine, frame_num, &mut empty), 1);
    }
    assert_eq!(captured(&events).len(), 3);
    // always does not consume the process-wide event count
    assert_eq!(engine.context().events_total(), 0);
}

#[test]
fn always_pre_fires_before_the_object_pass() {
    let engine = OdeEngine::new(test_context());
    let trigger = OdeTrigger::always(engine.context(), "heartbeat", None, When::PreOccurrenceCheck);
    let capture = CaptureAction::new("capture");
    let events = capture.events();
    trigger.add_action(action_ref(capture)).unwrap();
    engine.add_trigger(trigger).unwrap();

    let mut empty: Vec<ObjectMeta> = Vec::new();
    // post-process emits nothing for a pre-check always trigger
    assert_eq!(run_frame(&engine, 0, &mut empty), 0);
    assert_eq!(captured(&events).len(), 1);
}

#[test]
fn summation_reports_match_count_once_per_frame() {
    let engine = OdeEngine::new(test_context());
    let trigger = OdeTrigger::summation(engine.context(), "sum", None, 1, 0);
    let capture = CaptureAction::new("capture");
    let events = capture.events();
    trigger.add_action(action_ref(capture)).unwrap();
    engine.add_trigger(trigger).unwrap();

    let mut objects = vec![
        object(1, 1, 0.0, 40.0, 60.0),
        object(2, 1, 50.0, 40.0, 60.0),
        object(3, 2, 100.0, 40.0, 60.0),
    ];
    assert_eq!(run_frame(&engine, 0, &mut objects), 1);
    let events = captured(&events);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].frame_occurrences, 2);
    assert_eq!(events[0].object_id, None);
}

#[test]
fn count_trigger_fires_inside_band_only() {
    let engine = OdeEngine::new(test_context());
    let trigger = OdeTrigger::count(engine.context(), "band", None, 1, 0, 2, 3);
    let capture = CaptureAction::new("capture");
    let events = capture.events();
    trigger.add_action(action_ref(capture)).unwrap();
    engine.add_trigger(trigger).unwrap();

    for (frame_num, count) in [1usize, 2, 3, 4].into_iter().enumerate() {
        let mut objects: Vec<ObjectMeta> = (0..count)
            .map(|i| object(i as u64 + 1, 1, i as f32 * 50.0, 40.0, 60.0))
            .collect();
        let emitted = run_frame(&engine, frame_num as u64, &mut objects);
        let expected = matches!(count, 2 | 3);
        assert_eq!(emitted > 0, expected, "count {}", count);
    }
    assert_eq!(captured(&events).len(), 2);
}

#[test]
fn instance_trigger_fires_only_for_new_ids() {
    let engine = OdeEngine::new(test_context());
    let trigger = OdeTrigger::instance(engine.context(), "inst", None, 1, 0);
    let capture = CaptureAction::new("capture");
    let events = capture.events();
    trigger.add_action(action_ref(capture)).unwrap();
    engine.add_trigger(trigger.clone()).unwrap();

    let mut first = vec![object(1, 1, 0.0, 40.0, 60.0)];
    run_frame(&engine, 0, &mut first);
    let mut repeat = vec![object(1, 1, 5.0, 40.0, 60.0)];
    run_frame(&engine, 1, &mut repeat);
    let mut newcomer = vec![object(1, 1, 10.0, 40.0, 60.0), object(2, 1, 60.0, 40.0, 60.0)];
    run_frame(&engine, 2, &mut newcomer);

    let snapshot = captured(&events);
    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot[0].object_id, Some(1));
    assert_eq!(snapshot[1].object_id, Some(2));

    // reset forgets seen instances
    trigger.reset();
    let mut again = vec![object(2, 1, 10.0, 40.0, 60.0)];
    run_frame(&engine, 3, &mut again);
    assert_eq!(captured(&events).len(), 3);
}

#[test]
fn accumulation_reports_running_unique_total() {
    let engine = OdeEngine::new(test_context());
    let trigger = OdeTrigger::accumulation(engine.context(), "accum", None, 1, 0);
    let capture = CaptureAction::new("capture");
    let events = capture.events();
    trigger.add_action(action_ref(capture)).unwrap();
    engine.add_trigger(trigger).unwrap();

    let mut first = vec![object(1, 1, 0.0, 40.0, 60.0)];
    let total = run_frame(&engine, 0, &mut first);
    assert_eq!(total, 1);
    let mut second = vec![object(1, 1, 5.0, 40.0, 60.0), object(2, 1, 60.0, 40.0, 60.0)];
    let total = run_frame(&engine, 1, &mut second);
    assert_eq!(total, 2);
    let mut third = vec![object(2, 1, 70.0, 40.0, 60.0)];
    let total = run_frame(&engine, 2, &mut third);
    assert_eq!(total, 2);

    let events = captured(&events);
    assert_eq!(events.len(), 3);
    assert_eq!(
        events.iter().map(|e| e.frame_occurrences).collect::<Vec<_>>(),
        vec![1, 2, 2]
    );
}

#[test]
fn smallest_and_largest_select_by_bbox_area() {
    let engine = OdeEngine::new(test_context());
    let smallest = OdeTrigger::smallest(engine.context(), "small", None, 1, 0);
    let largest = OdeTrigger::largest(engine.context(), "large", None, 1, 0);
    let small_capture = CaptureAction::new("small-capture");
    let large_capture = CaptureAction::new("large-capture");
    let small_events = small_capture.events();
    let large_events = large_capture.events();
    smallest.add_action(action_ref(small_capture)).unwrap();
    largest.add_action(action_ref(large_capture)).unwrap();
    engine.add_trigger(smallest).unwrap();
    engine.add_trigger(largest).unwrap();

    let mut objects = vec![
        object(1, 1, 0.0, 10.0, 10.0),   // area 100
        object(2, 1, 50.0, 20.0, 20.0),  // area 400
        object(3, 1, 100.0, 10.0, 10.0), // area 100, tie ignored
    ];
    run_frame(&engine, 0, &mut objects);

    let small_events = captured(&small_events);
    assert_eq!(small_events.len(), 1);
    assert_eq!(small_events[0].object_id, Some(1));
    assert_eq!(small_events[0].primary_metric, Some(100));

    let large_events = captured(&large_events);
    assert_eq!(large_events.len(), 1);
    assert_eq!(large_events[0].object_id, Some(2));
    assert_eq!(large_events[0].primary_metric, Some(400));
}

#[test]
fn earliest_and_latest_select_by_tracked_duration() {
    let engine = OdeEngine::new(test_context());
    let earliest = OdeTrigger::earliest(engine.context(), "earliest", None, 1, 0);
    let latest = OdeTrigger::latest(engine.context(), "latest", None, 1, 0);
    let early_capture = CaptureAction::new("early-capture");
    let late_capture = CaptureAction::new("late-capture");
    let early_events = early_capture.events();
    let late_events = late_capture.events();
    earliest.add_action(action_ref(early_capture)).unwrap();
    latest.add_action(action_ref(late_capture)).unwrap();
    engine.add_trigger(earliest).unwrap();
    engine.add_trigger(latest).unwrap();

    // object 1 appears at frame 0, object 2 at frame 1
    let mut f0 = vec![object(1, 1, 0.0, 40.0, 60.0)];
    run_frame(&engine, 0, &mut f0);
    let mut f1 = vec![object(1, 1, 5.0, 40.0, 60.0), object(2, 1, 60.0, 40.0, 60.0)];
    run_frame(&engine, 1, &mut f1);
    let mut f2 = vec![object(1, 1, 10.0, 40.0, 60.0), object(2, 1, 65.0, 40.0, 60.0)];
    run_frame(&engine, 2, &mut f2);

    // at frame 2: object 1 tracked 200 ms, object 2 tracked 100 ms
    let early_events = captured(&early_events);
    assert_eq!(early_events.last().unwrap().object_id, Some(1));
    let late_events = captured(&late_events);
    assert_eq!(late_events.last().unwrap().object_id, Some(2));
}

#[test]
fn intersection_fires_per_overlapping_pair() {
    let engine = OdeEngine::new(test_context());
    let trigger = OdeTrigger::intersection(engine.context(), "overlap", None, 1, 1, 0);
    let capture = CaptureAction::new("capture");
    let events = capture.events();
    trigger.add_action(action_ref(capture)).unwrap();
    engine.add_trigger(trigger).unwrap();

    let mut objects = vec![
        object(1, 1, 0.0, 50.0, 50.0),
        object(2, 1, 40.0, 50.0, 50.0),  // overlaps object 1
        object(3, 1, 200.0, 50.0, 50.0), // overlaps nothing
    ];
    let emitted = run_frame(&engine, 0, &mut objects);
    assert_eq!(emitted, 1);
    let events = captured(&events);
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].object_id, Some(1));
    assert_eq!(events[1].object_id, Some(2));
}

#[test]
fn custom_trigger_callbacks_decide_and_faults_are_contained() {
    let engine = OdeEngine::new(test_context());
    let trigger = OdeTrigger::custom(
        engine.context(),
        "custom",
        None,
        ANY_CLASS,
        0,
        Some(Box::new(|_frame, object| Ok(object.object_id % 2 == 0))),
        Some(Box::new(|frame| Ok(frame.frame_num == 0))),
    );
    let capture = CaptureAction::new("capture");
    let events = capture.events();
    trigger.add_action(action_ref(capture)).unwrap();
    engine.add_trigger(trigger).unwrap();

    let mut objects = vec![
        object(1, 1, 0.0, 40.0, 60.0),
        object(2, 1, 50.0, 40.0, 60.0),
        object(4, 1, 100.0, 40.0, 60.0),
    ];
    let emitted = run_frame(&engine, 0, &mut objects);
    // per-object events for ids 2 and 4, plus the frame-level event
    assert_eq!(emitted, 1);
    assert_eq!(captured(&events).len(), 3);

    // a failing checker suppresses events without breaking the frame
    let faulty = OdeTrigger::custom(
        engine.context(),
        "faulty",
        None,
        ANY_CLASS,
        0,
        Some(Box::new(|_, _| Err(anyhow!("client fault")))),
        None,
    );
    let faulty_capture = CaptureAction::new("faulty-capture");
    let faulty_events = faulty_capture.events();
    faulty.add_action(action_ref(faulty_capture)).unwrap();
    engine.add_trigger(faulty).unwrap();

    let mut objects = vec![object(2, 1, 0.0, 40.0, 60.0)];
    run_frame(&engine, 1, &mut objects);
    assert!(faulty_events.lock().unwrap().is_empty());
}

#[test]
fn exclusion_area_beats_later_inclusion() {
    let engine = OdeEngine::new(test_context());
    let trigger = OdeTrigger::occurrence(engine.context(), "occ", None, 1, 0);
    let exclusion = OdeArea::from_rectangle(
        "blocked",
        AreaKind::Exclusion,
        Rectangle::new(0.0, 0.0, 100.0, 200.0),
        BboxTestPoint::Center,
    )
    .unwrap();
    let inclusion = OdeArea::from_rectangle(
        "allowed",
        AreaKind::Inclusion,
        Rectangle::new(0.0, 0.0, 400.0, 200.0),
        BboxTestPoint::Center,
    )
    .unwrap();
    trigger.add_area(Arc::new(exclusion)).unwrap();
    trigger.add_area(Arc::new(inclusion)).unwrap();
    let capture = CaptureAction::new("capture");
    let events = capture.events();
    trigger.add_action(action_ref(capture)).unwrap();
    engine.add_trigger(trigger).unwrap();

    let mut objects = vec![
        object(1, 1, 20.0, 40.0, 60.0),  // center inside the exclusion zone
        object(2, 1, 200.0, 40.0, 60.0), // center in the inclusion zone only
        object(3, 1, 600.0, 40.0, 60.0), // outside every area
    ];
    run_frame(&engine, 0, &mut objects);
    let events = captured(&events);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].object_id, Some(2));
}

#[test]
fn attached_heat_mapper_accumulates_trigger_occurrences() {
    let engine = OdeEngine::new(test_context());
    let trigger = OdeTrigger::occurrence(engine.context(), "occ", None, 1, 0);
    let mapper = OdeHeatMapper::new(
        "heat",
        8,
        4,
        BboxTestPoint::Center,
        ColorPalette::spectral(0.4),
    )
    .unwrap();
    let mapper = Arc::new(Mutex::new(mapper));
    trigger.add_heat_mapper(mapper.clone()).unwrap();
    // a second mapper is rejected
    let second = OdeHeatMapper::new(
        "heat2",
        8,
        4,
        BboxTestPoint::Center,
        ColorPalette::spectral(0.4),
    )
    .unwrap();
    assert!(trigger
        .add_heat_mapper(Arc::new(Mutex::new(second)))
        .is_err());
    engine.add_trigger(trigger).unwrap();

    for frame_num in 0..4 {
        let mut objects = vec![object(1, 1, 10.0, 40.0, 60.0)];
        run_frame(&engine, frame_num, &mut objects);
    }
    let (total, most) = mapper.lock().unwrap().metrics();
    assert_eq!(total, 4);
    assert_eq!(most, 4);
}

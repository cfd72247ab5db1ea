//! End-to-end streaming scenarios over an in-memory directory-tiled
//! dataset. The dataset declares no CRS, so viewport coordinates double as
//! native units and decoded positions stay in the dataset's own space.

use std::cell::RefCell;
use std::io::Cursor;
use std::rc::Rc;
use std::time::{Duration, Instant};

use constants::coordinate_system::GROUND_RESOLUTION_Z0;
use constants::streaming::TARGET_SCREEN_SPACING_PX;
use futures::future::BoxFuture;
use point_cloud_streaming::{
    BinaryRangeSource, CameraState, MemoryRangeSource, SessionEvent, SessionState, SourceError,
    StreamConfig, StreamError, StreamingSession,
};

/// Source whose fetches suspend once before answering, so a caller can be
/// observed (or abandoned) while a fetch is in flight.
struct SlowSource(MemoryRangeSource);

impl BinaryRangeSource for SlowSource {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn fetch_range<'a>(
        &'a self,
        resource: &'a str,
        begin: u64,
        end: u64,
    ) -> BoxFuture<'a, Result<Vec<u8>, SourceError>> {
        Box::pin(async move {
            tokio::task::yield_now().await;
            self.0.fetch_range(resource, begin, end).await
        })
    }

    fn fetch_all<'a>(&'a self, resource: &'a str) -> BoxFuture<'a, Result<Vec<u8>, SourceError>> {
        Box::pin(async move {
            tokio::task::yield_now().await;
            self.0.fetch_all(resource).await
        })
    }
}

/// Serialize points into a standalone LAZ file the way a tiled-dataset
/// writer stores one node.
fn build_laz(points: &[(f64, f64, f64, u16)]) -> Vec<u8> {
    let mut builder = las::Builder::from((1, 2));
    builder.point_format = las::point::Format::new(3).unwrap();
    builder.point_format.is_compressed = true;
    builder.transforms = las::Vector {
        x: las::Transform { scale: 0.01, offset: 0.0 },
        y: las::Transform { scale: 0.01, offset: 0.0 },
        z: las::Transform { scale: 0.01, offset: 0.0 },
    };
    let header = builder.into_header().unwrap();

    let mut writer = las::Writer::new(Cursor::new(Vec::new()), header).unwrap();
    for &(x, y, z, intensity) in points {
        let point = las::Point {
            x,
            y,
            z,
            intensity,
            gps_time: Some(0.0),
            color: Some(las::Color::new(intensity, 0, 65535 - intensity)),
            ..Default::default()
        };
        writer.write_point(point).unwrap();
    }
    writer.into_inner().unwrap().into_inner()
}

/// Three-node dataset in a 100-unit cube: root, one depth-1 child, and one
/// depth-2 grandchild behind its own hierarchy page.
fn synthetic_dataset() -> MemoryRangeSource {
    let mut source = MemoryRangeSource::new("mem://tiled-test");
    source.insert(
        "ept.json",
        serde_json::json!({
            "bounds": [0.0, 0.0, 0.0, 100.0, 100.0, 100.0],
            "points": 9,
            "span": 100,
            "dataType": "laszip",
            "schema": [
                {"name": "X", "type": "signed", "size": 4, "scale": 0.01, "offset": 0.0},
                {"name": "Y", "type": "signed", "size": 4, "scale": 0.01, "offset": 0.0},
                {"name": "Z", "type": "signed", "size": 4, "scale": 0.01, "offset": 0.0},
                {"name": "Intensity", "type": "unsigned", "size": 2},
                {"name": "Red", "type": "unsigned", "size": 2},
                {"name": "Green", "type": "unsigned", "size": 2},
                {"name": "Blue", "type": "unsigned", "size": 2}
            ]
        })
        .to_string()
        .into_bytes(),
    );
    source.insert(
        "ept-hierarchy/0-0-0-0.json",
        serde_json::json!({
            "0-0-0-0": 4,
            "1-0-0-0": 3,
            "2-0-0-0": -1
        })
        .to_string()
        .into_bytes(),
    );
    source.insert(
        "ept-hierarchy/2-0-0-0.json",
        serde_json::json!({ "2-0-0-0": 2 }).to_string().into_bytes(),
    );
    source.insert(
        "ept-data/0-0-0-0.laz",
        build_laz(&[
            (10.0, 10.0, 1.0, 0),
            (40.0, 60.0, 2.0, 30000),
            (80.0, 20.0, 3.0, 60000),
            (55.0, 90.0, 4.0, 65535),
        ]),
    );
    source.insert(
        "ept-data/1-0-0-0.laz",
        build_laz(&[
            (5.0, 5.0, 0.5, 100),
            (20.0, 30.0, 1.5, 200),
            (45.0, 45.0, 2.5, 300),
        ]),
    );
    source.insert(
        "ept-data/2-0-0-0.laz",
        build_laz(&[(3.0, 4.0, 0.25, 400), (20.0, 22.0, 0.75, 500)]),
    );
    source
}

/// Zoom whose two-pixel ground spacing equals `target_spacing` at
/// `center_lat`, so node spacing 1.0 maps to a predictable depth.
fn zoom_for(target_spacing: f64, center_lat: f64) -> f64 {
    (TARGET_SCREEN_SPACING_PX * GROUND_RESOLUTION_Z0 * center_lat.to_radians().cos()
        / target_spacing)
        .log2()
}

fn full_view(target_spacing: f64) -> CameraState {
    CameraState {
        west: 0.0,
        south: 0.0,
        east: 100.0,
        north: 100.0,
        zoom: zoom_for(target_spacing, 50.0),
        pitch_deg: 0.0,
    }
}

fn config() -> StreamConfig {
    StreamConfig {
        max_points: 1000,
        max_concurrent_requests: 2,
        debounce: Duration::from_millis(250),
        ..StreamConfig::default()
    }
}

#[tokio::test]
async fn initialize_reports_the_dataset_summary() {
    let mut session = StreamingSession::new(synthetic_dataset(), config());
    assert_eq!(session.state(), SessionState::Created);

    let summary = session.initialize().await.unwrap();
    assert_eq!(session.state(), SessionState::Active);
    assert_eq!(summary.total_points, 9);
    assert_eq!(summary.spacing, Some(1.0));
    assert!(summary.has_color);
    assert!(summary.crs.is_none());
    assert!(summary.point_format.is_none());
    assert_eq!(summary.bounds.min.x, 0.0);
    assert_eq!(summary.bounds.max.z, 100.0);

    // Initializing again is a no-op returning the same facts.
    let again = session.initialize().await.unwrap();
    assert_eq!(again.total_points, 9);
}

#[tokio::test]
async fn coarse_viewport_streams_only_the_root() {
    let mut session = StreamingSession::new(synthetic_dataset(), config());
    session.initialize().await.unwrap();

    let batches = Rc::new(RefCell::new(Vec::new()));
    let sink = batches.clone();
    session.on_points_loaded(move |batch| sink.borrow_mut().push(batch));

    // Spacing 1.0 against a 1.9-unit target spacing resolves to depth 0.
    session.force_update(full_view(1.9)).await.unwrap();

    let batches = batches.borrow();
    assert_eq!(batches.len(), 1);
    let root = &batches[0];
    assert_eq!(root.key.to_string(), "0-0-0-0");
    assert_eq!(root.len(), 4);
    assert!(!root.origin.geographic);

    // Native origin anchors at the dataset center; positions widen back to
    // the written coordinates.
    assert_eq!(root.origin.position.x, 50.0);
    let x = root.origin.position.x + f64::from(root.positions[0][0]);
    let y = root.origin.position.y + f64::from(root.positions[0][1]);
    assert!((x - 10.0).abs() < 1e-3);
    assert!((y - 10.0).abs() < 1e-3);
    // Elevation stays absolute.
    assert!((f64::from(root.positions[0][2]) - 1.0).abs() < 1e-3);

    assert_eq!(root.intensity[0], 0.0);
    assert!((root.intensity[3] - 1.0).abs() < 1e-6);
    let color = root.color.as_ref().unwrap();
    assert_eq!(color[2], [60000, 0, 5535]);
}

#[tokio::test]
async fn deep_viewport_streams_the_whole_subtree_nearest_first() {
    let mut session = StreamingSession::new(synthetic_dataset(), config());
    session.initialize().await.unwrap();

    let batches = Rc::new(RefCell::new(Vec::new()));
    let sink = batches.clone();
    session.on_points_loaded(move |batch| sink.borrow_mut().push(batch));

    let events = Rc::new(RefCell::new(Vec::new()));
    let event_sink = events.clone();
    session.on_event(move |event| event_sink.borrow_mut().push(event));

    // Target spacing 0.2 puts the target depth past 2, deep enough for the
    // grandchild page to be fetched on demand.
    session.force_update(full_view(0.2)).await.unwrap();

    let batches = batches.borrow();
    let mut keys: Vec<String> = batches.iter().map(|b| b.key.to_string()).collect();
    keys.sort();
    assert_eq!(keys, vec!["0-0-0-0", "1-0-0-0", "2-0-0-0"]);

    let events = events.borrow();
    let final_progress = events
        .iter()
        .rev()
        .find_map(|event| match event {
            SessionEvent::Progress { loaded, failed, points_used, .. } => {
                Some((*loaded, *failed, *points_used))
            }
            _ => None,
        })
        .unwrap();
    assert_eq!(final_progress, (3, 0, 9));
}

#[tokio::test]
async fn budget_refusal_emits_one_event_and_keeps_coarse_data() {
    let mut session = StreamingSession::new(
        synthetic_dataset(),
        StreamConfig {
            max_points: 5,
            max_concurrent_requests: 1,
            ..config()
        },
    );
    session.initialize().await.unwrap();

    let batches = Rc::new(RefCell::new(Vec::new()));
    let sink = batches.clone();
    session.on_points_loaded(move |batch| sink.borrow_mut().push(batch));

    let events = Rc::new(RefCell::new(Vec::new()));
    let event_sink = events.clone();
    session.on_event(move |event| event_sink.borrow_mut().push(event));

    session.force_update(full_view(0.2)).await.unwrap();

    // Only the nearest admissible node fit under the five-point cap.
    assert_eq!(batches.borrow().len(), 1);

    let events = events.borrow();
    let budget_events: Vec<_> = events
        .iter()
        .filter(|event| matches!(event, SessionEvent::BudgetReached { .. }))
        .collect();
    assert_eq!(budget_events.len(), 1);
    assert!(matches!(
        budget_events[0],
        SessionEvent::BudgetReached { max: 5, .. }
    ));
}

#[tokio::test]
async fn missing_hierarchy_page_degrades_to_coarser_nodes() {
    let mut source = synthetic_dataset();
    source.remove("ept-hierarchy/2-0-0-0.json");
    let mut session = StreamingSession::new(source, config());
    session.initialize().await.unwrap();

    let batches = Rc::new(RefCell::new(Vec::new()));
    let sink = batches.clone();
    session.on_points_loaded(move |batch| sink.borrow_mut().push(batch));

    // Asking for deep detail must not fail; the lost subtree just never
    // refines past its parent.
    session.force_update(full_view(0.2)).await.unwrap();

    let mut keys: Vec<String> = batches.borrow().iter().map(|b| b.key.to_string()).collect();
    keys.sort();
    assert_eq!(keys, vec!["0-0-0-0", "1-0-0-0"]);
}

#[tokio::test]
async fn corrupt_node_fails_alone_and_is_retried_by_a_later_viewport() {
    let mut source = synthetic_dataset();
    source.insert("ept-data/1-0-0-0.laz", b"not a laz file".to_vec());
    let mut session = StreamingSession::new(source, config());
    session.initialize().await.unwrap();

    let batches = Rc::new(RefCell::new(Vec::new()));
    let sink = batches.clone();
    session.on_points_loaded(move |batch| sink.borrow_mut().push(batch));

    let events = Rc::new(RefCell::new(Vec::new()));
    let event_sink = events.clone();
    session.on_event(move |event| event_sink.borrow_mut().push(event));

    session.force_update(full_view(0.2)).await.unwrap();
    let first_pass = batches.borrow().len();
    assert_eq!(first_pass, 2);

    // The sibling failure never surfaced as an error, only as a counter.
    let failed_counts: Vec<u64> = events
        .borrow()
        .iter()
        .filter_map(|event| match event {
            SessionEvent::Progress { failed, .. } => Some(*failed),
            _ => None,
        })
        .collect();
    assert_eq!(failed_counts.last(), Some(&1));

    // A later viewport offers the failed node another attempt; loaded
    // nodes are not re-fetched.
    session.force_update(full_view(0.2)).await.unwrap();
    assert_eq!(batches.borrow().len(), first_pass);
    let failed_counts: Vec<u64> = events
        .borrow()
        .iter()
        .filter_map(|event| match event {
            SessionEvent::Progress { failed, .. } => Some(*failed),
            _ => None,
        })
        .collect();
    assert_eq!(failed_counts.last(), Some(&2));
}

#[tokio::test]
async fn debounce_defers_streaming_until_the_camera_settles() {
    let mut session = StreamingSession::new(synthetic_dataset(), config());
    session.initialize().await.unwrap();

    let batches = Rc::new(RefCell::new(Vec::new()));
    let sink = batches.clone();
    session.on_points_loaded(move |batch| sink.borrow_mut().push(batch));

    let t0 = Instant::now();
    session.update_viewport(full_view(1.9), t0).await.unwrap();
    assert!(batches.borrow().is_empty());

    session.tick(t0 + Duration::from_millis(100)).await.unwrap();
    assert!(batches.borrow().is_empty());

    session.tick(t0 + Duration::from_millis(300)).await.unwrap();
    assert_eq!(batches.borrow().len(), 1);
}

#[tokio::test]
async fn destroy_closes_the_session_for_good() {
    let mut session = StreamingSession::new(synthetic_dataset(), config());
    session.initialize().await.unwrap();
    session.force_update(full_view(1.9)).await.unwrap();

    session.destroy();
    assert_eq!(session.state(), SessionState::Destroyed);

    assert!(matches!(
        session.force_update(full_view(1.9)).await,
        Err(StreamError::SessionClosed)
    ));
    assert!(matches!(
        session.update_viewport(full_view(1.9), Instant::now()).await,
        Err(StreamError::SessionClosed)
    ));
    assert!(matches!(
        session.initialize().await,
        Err(StreamError::SessionClosed)
    ));
}

#[tokio::test]
async fn abandoned_initialization_can_be_restarted() {
    let mut session = StreamingSession::new(SlowSource(synthetic_dataset()), config());

    // Poll initialize once and drop it while its first fetch is pending.
    {
        let pending = session.initialize();
        futures::pin_mut!(pending);
        assert!(futures::poll!(pending).is_pending());
    }

    let summary = session.initialize().await.unwrap();
    assert_eq!(summary.total_points, 9);
    assert_eq!(session.state(), SessionState::Active);
}

#[tokio::test]
async fn initialization_failure_is_fatal_and_reported() {
    let source = MemoryRangeSource::new("mem://empty");
    let mut session = StreamingSession::new(source, config());
    assert!(session.initialize().await.is_err());
    assert_eq!(session.state(), SessionState::Created);
}

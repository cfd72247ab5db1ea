//! Session orchestration.
//!
//! A [`StreamingSession`] owns the whole pipeline: hierarchy index, decode
//! context, viewport tracker, scheduler, and budget. Everything runs on one
//! logical control flow; the only await points are the byte-range fetches,
//! which run concurrently through a `FuturesUnordered` capped by the
//! configured request limit. Node completions are processed as they land,
//! with a cooperative yield between them, so completion order is free to
//! differ from request order.

use std::task::Poll;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, info, warn};

use constants::streaming::{
    DEFAULT_DEBOUNCE_MS, DEFAULT_MAX_CONCURRENT_REQUESTS, DEFAULT_MAX_DEPTH, DEFAULT_MAX_POINTS,
    DEFAULT_MIN_DETAIL_ZOOM, TARGET_SCREEN_SPACING_PX,
};

use crate::budget::PointBudgetManager;
use crate::decode::{PointBatch, PointRecordDecoder};
use crate::error::{SourceError, StreamError};
use crate::events::SessionEvent;
use crate::hierarchy::{
    Aabb, DatasetDetails, DatasetLayout, EptDataset, HierarchyIndex, NodeDescriptor,
};
use crate::schedule::{FetchOutcome, FetchScheduler};
use crate::select::{NativeViewport, select_nodes};
use crate::source::BinaryRangeSource;
use crate::viewport::{CameraState, ViewportInfo, ViewportTracker};

/// Tuning surface. Defaults come from the shared constants crate.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub max_points: u64,
    pub max_concurrent_requests: usize,
    pub debounce: Duration,
    /// On-screen distance between points the depth mapping aims for, in
    /// device pixels.
    pub target_spacing_px: f64,
    /// Zoom below which the spacing-less fallback stays at depth 0.
    pub min_detail_zoom: f64,
    pub max_depth: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_points: DEFAULT_MAX_POINTS,
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            target_spacing_px: TARGET_SCREEN_SPACING_PX,
            min_detail_zoom: DEFAULT_MIN_DETAIL_ZOOM,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// What `initialize` reports about the dataset.
#[derive(Debug, Clone)]
pub struct DatasetSummary {
    /// Tight data bounds in native units.
    pub bounds: Aabb,
    pub total_points: u64,
    pub has_color: bool,
    /// Root-level point spacing in native units, when declared.
    pub spacing: Option<f64>,
    pub crs: Option<String>,
    /// LAS point record format code (cloud-optimized datasets only).
    pub point_format: Option<u8>,
    /// Names of declared extra-bytes dimensions.
    pub extra_dimensions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Initializing,
    Active,
    Destroyed,
}

type PointsCallback = Box<dyn FnMut(PointBatch)>;
type EventCallback = Box<dyn FnMut(SessionEvent)>;

pub struct StreamingSession<S: BinaryRangeSource> {
    source: S,
    config: StreamConfig,
    state: SessionState,
    index: Option<HierarchyIndex>,
    decoder: Option<PointRecordDecoder>,
    tracker: Option<ViewportTracker>,
    scheduler: FetchScheduler,
    budget: PointBudgetManager,
    summary: Option<DatasetSummary>,
    on_points: Option<PointsCallback>,
    on_event: Option<EventCallback>,
}

impl<S: BinaryRangeSource> StreamingSession<S> {
    pub fn new(source: S, config: StreamConfig) -> Self {
        let budget = PointBudgetManager::new(config.max_points);
        Self {
            source,
            config,
            state: SessionState::Created,
            index: None,
            decoder: None,
            tracker: None,
            scheduler: FetchScheduler::new(),
            budget,
            summary: None,
            on_points: None,
            on_event: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Register the sink for decoded point batches.
    pub fn on_points_loaded(&mut self, callback: impl FnMut(PointBatch) + 'static) {
        self.on_points = Some(Box::new(callback));
    }

    /// Register the sink for progress and budget events.
    pub fn on_event(&mut self, callback: impl FnMut(SessionEvent) + 'static) {
        self.on_event = Some(Box::new(callback));
    }

    /// Load the dataset header and root hierarchy. The layout is inferred
    /// from the source location (`.laz` file vs. tiled directory). Calling
    /// again on an active session returns the same summary without
    /// re-fetching.
    pub async fn initialize(&mut self) -> Result<DatasetSummary, StreamError> {
        match self.state {
            SessionState::Destroyed => return Err(StreamError::SessionClosed),
            SessionState::Active => {
                if let Some(summary) = &self.summary {
                    return Ok(summary.clone());
                }
            }
            // An initialize future dropped at an await point leaves
            // `Initializing` behind; with a single control flow there is no
            // true reentrancy, so start over.
            SessionState::Created | SessionState::Initializing => {}
        }

        self.state = SessionState::Initializing;
        let layout = DatasetLayout::infer(self.source.name());
        let index = match HierarchyIndex::load(&self.source, layout).await {
            Ok(index) => index,
            Err(err) => {
                self.state = SessionState::Created;
                return Err(err);
            }
        };

        let summary = summarize(&index);
        let decoder = PointRecordDecoder::new(&index.details, &index.data_bounds);
        self.tracker = Some(ViewportTracker::new(
            self.config.debounce,
            index.spacing,
            self.config.target_spacing_px,
            self.config.min_detail_zoom,
            self.config.max_depth,
        ));
        info!(
            dataset = self.source.name(),
            total_points = summary.total_points,
            nodes = index.nodes().len(),
            "session initialized"
        );

        self.index = Some(index);
        self.decoder = Some(decoder);
        self.summary = Some(summary.clone());
        self.state = SessionState::Active;
        Ok(summary)
    }

    /// Record a camera movement and run a streaming pass if the debounce
    /// window has elapsed. Call [`StreamingSession::tick`] afterwards to
    /// let a quiet camera flush the pending update.
    pub async fn update_viewport(
        &mut self,
        camera: CameraState,
        now: Instant,
    ) -> Result<(), StreamError> {
        self.require_active()?;
        if let Some(tracker) = self.tracker.as_mut() {
            tracker.update(camera, now);
        }
        self.tick(now).await
    }

    /// Flush a debounced viewport if its quiet period has elapsed.
    pub async fn tick(&mut self, now: Instant) -> Result<(), StreamError> {
        self.require_active()?;
        let emitted = self.tracker.as_mut().and_then(|tracker| tracker.poll(now));
        match emitted {
            Some(viewport) => self.run_viewport(viewport).await,
            None => Ok(()),
        }
    }

    /// Apply a viewport immediately, bypassing the debounce.
    pub async fn force_update(&mut self, camera: CameraState) -> Result<(), StreamError> {
        self.require_active()?;
        let viewport = self
            .tracker
            .as_mut()
            .map(|tracker| tracker.force(camera))
            .ok_or(StreamError::SessionClosed)?;
        self.run_viewport(viewport).await
    }

    /// Tear the session down. In-flight work is abandoned, state cleared,
    /// and callbacks dropped so nothing fires afterwards.
    pub fn destroy(&mut self) {
        debug!(dataset = self.source.name(), "session destroyed");
        self.state = SessionState::Destroyed;
        self.index = None;
        self.decoder = None;
        self.tracker = None;
        self.scheduler = FetchScheduler::new();
        self.budget = PointBudgetManager::new(self.config.max_points);
        self.on_points = None;
        self.on_event = None;
    }

    fn require_active(&self) -> Result<(), StreamError> {
        match self.state {
            SessionState::Active => Ok(()),
            _ => Err(StreamError::SessionClosed),
        }
    }

    /// One full streaming pass for an emitted viewport: resolve hierarchy
    /// depth, select and enqueue nodes, then drive fetches to completion.
    async fn run_viewport(&mut self, viewport: ViewportInfo) -> Result<(), StreamError> {
        let Self {
            source,
            config,
            index,
            decoder,
            scheduler,
            budget,
            on_points,
            on_event,
            ..
        } = self;
        let index = index.as_mut().ok_or(StreamError::SessionClosed)?;
        let decoder = decoder.as_ref().ok_or(StreamError::SessionClosed)?;

        index.ensure_depth(&*source, viewport.target_depth).await?;

        let native = NativeViewport::from_viewport(&viewport, decoder.crs())?;
        let selected = select_nodes(index, &native, viewport.target_depth, |key| {
            scheduler.is_handled(key)
        });
        debug!(
            dataset = source.name(),
            depth = viewport.target_depth,
            candidates = selected.len(),
            "viewport pass"
        );

        // A new viewport supersedes whatever was still queued; in-flight
        // fetches are left to finish and are admitted on completion.
        scheduler.clear_queue();
        for (node, distance_sq) in selected {
            scheduler.enqueue(node, distance_sq);
        }

        let max_concurrent = config.max_concurrent_requests.max(1);
        let mut in_flight: FuturesUnordered<NodeFetch<'_>> = FuturesUnordered::new();
        let mut budget_reported = false;

        loop {
            let batch = scheduler.next_batch(budget, max_concurrent);
            if batch.budget_exhausted && !budget_reported {
                budget_reported = true;
                emit_event(
                    on_event,
                    SessionEvent::BudgetReached {
                        used: budget.used(),
                        max: budget.max_points(),
                    },
                );
            }
            for node in batch.start {
                in_flight.push(fetch_node(&*source, &index.details, node));
            }

            let Some((node, result)) = in_flight.next().await else {
                break;
            };

            match result {
                Ok(bytes) => match decoder.decode(&bytes, &node, &index.details) {
                    Ok(points) => {
                        scheduler.complete(
                            node.key,
                            FetchOutcome::Loaded {
                                actual: points.len() as u64,
                            },
                            budget,
                        );
                        if let Some(callback) = on_points.as_mut() {
                            callback(points);
                        }
                    }
                    Err(err) => {
                        warn!(node = %node.key, error = %err, "node failed to decode");
                        scheduler.complete(node.key, FetchOutcome::DecodeFailed, budget);
                    }
                },
                Err(err) => {
                    warn!(node = %node.key, error = %err, "node fetch failed");
                    scheduler.complete(node.key, FetchOutcome::NetworkFailed, budget);
                }
            }

            emit_event(
                on_event,
                SessionEvent::Progress {
                    loaded: scheduler.loaded_count(),
                    failed: scheduler.failed_count(),
                    queued: scheduler.queued(),
                    in_flight: scheduler.in_flight(),
                    points_used: budget.used(),
                },
            );

            // Give a cooperative host a chance to run between completions.
            yield_now().await;
        }
        Ok(())
    }
}

type NodeFetch<'a> = BoxFuture<'a, (NodeDescriptor, Result<Vec<u8>, SourceError>)>;

/// Fetch one node's bytes: a byte range of the root resource for the
/// cloud-optimized layout, a whole per-node file for the tiled layout.
fn fetch_node<'a>(
    source: &'a dyn BinaryRangeSource,
    details: &DatasetDetails,
    node: NodeDescriptor,
) -> NodeFetch<'a> {
    let request = match details {
        DatasetDetails::Copc(_) => None,
        DatasetDetails::Ept(_) => Some(EptDataset::data_resource(node.key)),
    };
    Box::pin(async move {
        let result = match &request {
            None => {
                source
                    .fetch_range("", node.byte_offset, node.byte_offset + node.byte_len)
                    .await
            }
            Some(resource) => source.fetch_all(resource).await,
        };
        (node, result)
    })
}

fn summarize(index: &HierarchyIndex) -> DatasetSummary {
    let (point_format, extra_dimensions) = match &index.details {
        DatasetDetails::Copc(copc) => (
            Some(copc.point_format.to_u8().unwrap_or_default()),
            copc.extra_dims.iter().map(|d| d.name.clone()).collect(),
        ),
        DatasetDetails::Ept(ept) => (None, ept.extra_dimension_names()),
    };
    DatasetSummary {
        bounds: index.data_bounds,
        total_points: index.total_points,
        has_color: index.details.has_color(),
        spacing: index.spacing,
        crs: index.details.crs_description().map(str::to_string),
        point_format,
        extra_dimensions,
    }
}

fn emit_event(on_event: &mut Option<EventCallback>, event: SessionEvent) {
    if let Some(callback) = on_event.as_mut() {
        callback(event);
    }
}

/// Single cooperative yield.
async fn yield_now() {
    let mut yielded = false;
    futures::future::poll_fn(move |cx| {
        if yielded {
            Poll::Ready(())
        } else {
            yielded = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    })
    .await;
}

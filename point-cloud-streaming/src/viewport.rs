//! Viewport tracking and octree depth mapping.
//!
//! Camera movements arrive continuously; the tracker debounces them so a
//! pan emits one viewport after the camera settles, while `force` bypasses
//! the wait for programmatic jumps. Time is injected through `Instant`
//! arguments so the debounce is testable without sleeping.

use std::time::{Duration, Instant};

use constants::coordinate_system::ground_resolution;

/// Camera snapshot in geographic terms: the visible rectangle plus zoom and
/// pitch of the view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraState {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
    pub zoom: f64,
    /// Tilt from straight-down, in degrees.
    pub pitch_deg: f64,
}

/// An emitted viewport: the camera snapshot plus its derived target depth.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportInfo {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
    pub center_lon: f64,
    pub center_lat: f64,
    pub zoom: f64,
    pub pitch_deg: f64,
    pub target_depth: u32,
}

/// Deepest octree level whose node spacing still exceeds the wanted ground
/// spacing. Each level halves the spacing, hence the log2.
pub fn depth_from_spacing(spacing: f64, target_spacing: f64) -> u32 {
    if spacing <= 0.0 || target_spacing <= 0.0 {
        return 0;
    }
    let depth = (spacing / target_spacing).log2().floor();
    if depth.is_sign_negative() { 0 } else { depth as u32 }
}

pub struct ViewportTracker {
    debounce: Duration,
    /// Root-level node spacing in meters, when the dataset declares one.
    spacing: Option<f64>,
    /// Wanted on-screen distance between points, in device pixels.
    target_spacing_px: f64,
    min_detail_zoom: f64,
    max_depth: u32,
    pending: Option<(CameraState, Instant)>,
}

impl ViewportTracker {
    pub fn new(
        debounce: Duration,
        spacing: Option<f64>,
        target_spacing_px: f64,
        min_detail_zoom: f64,
        max_depth: u32,
    ) -> Self {
        Self {
            debounce,
            spacing,
            target_spacing_px,
            min_detail_zoom,
            max_depth,
            pending: None,
        }
    }

    /// Record a camera movement; the debounce window restarts.
    pub fn update(&mut self, camera: CameraState, now: Instant) {
        self.pending = Some((camera, now));
    }

    /// Emit the pending viewport once the debounce has elapsed with no
    /// further updates.
    pub fn poll(&mut self, now: Instant) -> Option<ViewportInfo> {
        let (_, at) = self.pending.as_ref()?;
        if now.duration_since(*at) < self.debounce {
            return None;
        }
        let (camera, _) = self.pending.take()?;
        Some(self.resolve(&camera))
    }

    /// Emit immediately, dropping any pending debounced update.
    pub fn force(&mut self, camera: CameraState) -> ViewportInfo {
        self.pending = None;
        self.resolve(&camera)
    }

    fn resolve(&self, camera: &CameraState) -> ViewportInfo {
        let center_lon = (camera.west + camera.east) * 0.5;
        let center_lat = (camera.south + camera.north) * 0.5;

        let base_depth = match self.spacing {
            Some(spacing) => {
                // Ground size of the wanted pixel gap at this zoom and
                // latitude.
                let target_spacing =
                    self.target_spacing_px * ground_resolution(center_lat, camera.zoom);
                depth_from_spacing(spacing, target_spacing)
            }
            None => {
                if camera.zoom < self.min_detail_zoom {
                    0
                } else {
                    (camera.zoom - self.min_detail_zoom).floor() as u32
                }
            }
        };

        // A tilted view covers far more ground, so back off detail as the
        // camera pitches toward the horizon.
        let pitch_drop = ((1.0 - camera.pitch_deg.to_radians().cos()) * 3.0).floor() as u32;
        let target_depth = base_depth.saturating_sub(pitch_drop).min(self.max_depth);

        ViewportInfo {
            west: camera.west,
            south: camera.south,
            east: camera.east,
            north: camera.north,
            center_lon,
            center_lat,
            zoom: camera.zoom,
            pitch_deg: camera.pitch_deg,
            target_depth,
        }
    }
}

/// Default ceiling on points resident in memory across all loaded nodes.
pub const DEFAULT_MAX_POINTS: u64 = 5_000_000;

/// Default cap on simultaneous byte-range fetches.
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 6;

/// Default viewport debounce window in milliseconds.
pub const DEFAULT_DEBOUNCE_MS: u64 = 250;

/// Zoom level below which only the octree root is requested.
pub const DEFAULT_MIN_DETAIL_ZOOM: f64 = 11.0;

/// Default ceiling on requested octree depth.
pub const DEFAULT_MAX_DEPTH: u32 = 10;

/// Target on-screen spacing between neighbouring points, in device pixels.
/// Finer octree levels are requested until node spacing projects to roughly
/// this many pixels.
pub const TARGET_SCREEN_SPACING_PX: f64 = 2.0;

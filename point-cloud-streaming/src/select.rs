//! Node selection for a viewport.
//!
//! Selection is purely geometric: every node at or above the target depth
//! whose bounds touch the viewport rectangle, plus all ancestors up to the
//! root so coarse data underlies the fine. The caller filters out nodes it
//! already has or is fetching; failed nodes are deliberately not filtered
//! here so a later viewport can retry them.

use std::collections::HashSet;

use crate::decode::CrsTransform;
use crate::error::StreamError;
use crate::hierarchy::{HierarchyIndex, NodeDescriptor, NodeKey};
use crate::viewport::ViewportInfo;

/// Viewport rectangle and center in the dataset's native units.
#[derive(Debug, Clone, Copy)]
pub struct NativeViewport {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
    pub center_x: f64,
    pub center_y: f64,
}

impl NativeViewport {
    /// Convert the geographic viewport corners into native units, once per
    /// selection. Without a CRS the dataset is taken to live in the
    /// viewport's own coordinate space.
    pub fn from_viewport(
        viewport: &ViewportInfo,
        crs: Option<&CrsTransform>,
    ) -> Result<NativeViewport, StreamError> {
        match crs {
            Some(crs) => {
                let (x0, y0) = crs.from_geographic(viewport.west, viewport.south)?;
                let (x1, y1) = crs.from_geographic(viewport.east, viewport.north)?;
                let (center_x, center_y) =
                    crs.from_geographic(viewport.center_lon, viewport.center_lat)?;
                Ok(NativeViewport {
                    min_x: x0.min(x1),
                    min_y: y0.min(y1),
                    max_x: x0.max(x1),
                    max_y: y0.max(y1),
                    center_x,
                    center_y,
                })
            }
            None => Ok(NativeViewport {
                min_x: viewport.west,
                min_y: viewport.south,
                max_x: viewport.east,
                max_y: viewport.north,
                center_x: viewport.center_lon,
                center_y: viewport.center_lat,
            }),
        }
    }
}

/// Visible nodes paired with their squared distance from the viewport
/// center, nearest first; ties break toward shallower depth so parents
/// precede children.
pub fn select_nodes<F>(
    index: &HierarchyIndex,
    viewport: &NativeViewport,
    target_depth: u32,
    mut already_handled: F,
) -> Vec<(NodeDescriptor, f64)>
where
    F: FnMut(&NodeKey) -> bool,
{
    let mut wanted: HashSet<NodeKey> = HashSet::new();
    for (key, node) in index.nodes() {
        if key.depth > target_depth {
            continue;
        }
        if !node
            .bounds
            .intersects_xy(viewport.min_x, viewport.min_y, viewport.max_x, viewport.max_y)
        {
            continue;
        }
        let mut current = *key;
        while wanted.insert(current) {
            let Some(parent) = current.parent() else { break };
            current = parent;
        }
    }

    let mut selected = Vec::with_capacity(wanted.len());
    for key in wanted {
        if already_handled(&key) {
            continue;
        }
        // An ancestor can be absent when its hierarchy page never loaded.
        let Some(node) = index.get(&key) else { continue };
        let center = node.bounds.center();
        let dx = center.x - viewport.center_x;
        let dy = center.y - viewport.center_y;
        selected.push((node.clone(), dx * dx + dy * dy));
    }

    selected.sort_by(|a, b| {
        a.1.total_cmp(&b.1)
            .then_with(|| a.0.key.depth.cmp(&b.0.key.depth))
    });
    selected
}

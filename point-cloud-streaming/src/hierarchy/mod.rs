//! Octree hierarchy metadata.
//!
//! Both supported layouts resolve into the same flat structure: a map from
//! [`NodeKey`] to [`NodeDescriptor`] plus the dataset's bounds, point count,
//! and node spacing. Paged (COPC) hierarchies are resolved fully at load
//! time with an explicit worklist; directory-tiled (EPT) hierarchies fetch
//! one level's pages at a time through [`HierarchyIndex::ensure_depth`].

pub mod copc;
pub mod ept;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use glam::DVec3;
use tracing::warn;

use crate::error::StreamError;
use crate::source::BinaryRangeSource;

pub use copc::CopcDataset;
pub use ept::EptDataset;

/// Octree node identity: depth plus grid coordinates at that depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey {
    pub depth: u32,
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl NodeKey {
    pub const ROOT: NodeKey = NodeKey {
        depth: 0,
        x: 0,
        y: 0,
        z: 0,
    };

    pub fn new(depth: u32, x: u32, y: u32, z: u32) -> Self {
        Self { depth, x, y, z }
    }

    /// The containing node one level up, or `None` at the root.
    pub fn parent(&self) -> Option<NodeKey> {
        if self.depth == 0 {
            return None;
        }
        Some(NodeKey {
            depth: self.depth - 1,
            x: self.x / 2,
            y: self.y / 2,
            z: self.z / 2,
        })
    }
}

/// Keys render as `depth-x-y-z`, the naming EPT uses for its resources.
impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}-{}", self.depth, self.x, self.y, self.z)
    }
}

impl FromStr for NodeKey {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('-').map(str::parse::<u32>);
        let mut next = |name: &str| {
            parts
                .next()
                .and_then(Result::ok)
                .ok_or_else(|| StreamError::Format(format!("bad node key '{s}': missing {name}")))
        };
        let key = NodeKey {
            depth: next("depth")?,
            x: next("x")?,
            y: next("y")?,
            z: next("z")?,
        };
        Ok(key)
    }
}

/// Axis-aligned bounding box in the dataset's native units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: DVec3,
    pub max: DVec3,
}

impl Aabb {
    pub fn new(min: DVec3, max: DVec3) -> Self {
        Self { min, max }
    }

    pub fn center(&self) -> DVec3 {
        (self.min + self.max) * 0.5
    }

    /// Horizontal intersection test against a viewport rectangle.
    pub fn intersects_xy(&self, min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> bool {
        self.min.x <= max_x && self.max.x >= min_x && self.min.y <= max_y && self.max.y >= min_y
    }

    /// Bounds of `key` within the octree rooted at `root`: the root cube
    /// halves along every axis per level.
    pub fn node_bounds(root: &Aabb, key: NodeKey) -> Aabb {
        let size = (root.max - root.min) / 2f64.powi(key.depth as i32);
        let min = root.min + size * DVec3::new(f64::from(key.x), f64::from(key.y), f64::from(key.z));
        Aabb {
            min,
            max: min + size,
        }
    }
}

/// One octree node as parsed from the hierarchy. Immutable after parse.
#[derive(Debug, Clone)]
pub struct NodeDescriptor {
    pub key: NodeKey,
    /// Number of point records stored in the node's block.
    pub point_count: u64,
    /// Byte offset of the block inside the root resource (paged layout only).
    pub byte_offset: u64,
    /// Byte length of the block inside the root resource (paged layout only).
    pub byte_len: u64,
    /// Node bounds in native units.
    pub bounds: Aabb,
}

/// Which on-disk/on-wire layout a dataset uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetLayout {
    /// Single cloud-optimized file with embedded hierarchy pages (COPC).
    Copc,
    /// Directory-tiled dataset with JSON metadata and per-node files (EPT).
    Ept,
}

impl DatasetLayout {
    /// Guess the layout from a URL or path. `ept.json` (or a bare directory)
    /// means directory-tiled, anything `.laz`-shaped means cloud-optimized.
    pub fn infer(location: &str) -> DatasetLayout {
        let trimmed = location.trim_end_matches('/');
        if trimmed.ends_with("ept.json") || !trimmed.ends_with(".laz") {
            DatasetLayout::Ept
        } else {
            DatasetLayout::Copc
        }
    }
}

/// Layout-specific facts the decoder needs beyond the flat node map.
pub enum DatasetDetails {
    Copc(CopcDataset),
    Ept(EptDataset),
}

impl DatasetDetails {
    pub fn crs_description(&self) -> Option<&str> {
        match self {
            DatasetDetails::Copc(copc) => copc.crs.as_deref(),
            DatasetDetails::Ept(ept) => ept.crs_description(),
        }
    }

    pub fn has_color(&self) -> bool {
        match self {
            DatasetDetails::Copc(copc) => copc.has_color(),
            DatasetDetails::Ept(ept) => ept.has_color(),
        }
    }
}

/// Flat, immutable view of a dataset's octree plus its summary facts.
///
/// For the directory-tiled layout, deeper hierarchy pages may still be
/// unfetched; `ensure_depth` resolves them on demand. Pages that fail to
/// load are logged and dropped, leaving that sub-tree without finer detail.
pub struct HierarchyIndex {
    nodes: HashMap<NodeKey, NodeDescriptor>,
    /// Unfetched page keys of the directory-tiled layout.
    pending_pages: HashSet<NodeKey>,
    pub root_cube: Aabb,
    /// Tight bounds of the stored points (may be smaller than the cube).
    pub data_bounds: Aabb,
    pub total_points: u64,
    /// Spacing between points at the root level, in native units.
    pub spacing: Option<f64>,
    pub details: DatasetDetails,
}

impl HierarchyIndex {
    /// Load a dataset's hierarchy from `source`. Header and root-page
    /// failures are fatal; failures of deeper pages are not.
    pub async fn load(
        source: &dyn BinaryRangeSource,
        layout: DatasetLayout,
    ) -> Result<HierarchyIndex, StreamError> {
        match layout {
            DatasetLayout::Copc => copc::load(source).await,
            DatasetLayout::Ept => ept::load(source).await,
        }
    }

    pub fn nodes(&self) -> &HashMap<NodeKey, NodeDescriptor> {
        &self.nodes
    }

    pub fn get(&self, key: &NodeKey) -> Option<&NodeDescriptor> {
        self.nodes.get(key)
    }

    /// Resolve pending hierarchy pages for all levels up to `depth`.
    ///
    /// Pages are fetched a level at a time so one viewport update never
    /// pulls the entire deep hierarchy. A page that fails to fetch is
    /// dropped with a warning; its sub-tree simply stays absent.
    pub async fn ensure_depth(
        &mut self,
        source: &dyn BinaryRangeSource,
        depth: u32,
    ) -> Result<(), StreamError> {
        loop {
            let mut due: Vec<NodeKey> = self
                .pending_pages
                .iter()
                .copied()
                .filter(|key| key.depth <= depth)
                .collect();
            if due.is_empty() {
                return Ok(());
            }
            due.sort();

            for page_key in due {
                self.pending_pages.remove(&page_key);
                match ept::load_page(source, self, page_key).await {
                    Ok(()) => {}
                    Err(err) => {
                        warn!(dataset = source.name(), page = %page_key, error = %err,
                              "hierarchy page unavailable, sub-tree dropped");
                    }
                }
            }
        }
    }

    pub(crate) fn insert_node(&mut self, descriptor: NodeDescriptor) {
        self.nodes.insert(descriptor.key, descriptor);
    }

    pub(crate) fn mark_pending_page(&mut self, key: NodeKey) {
        self.pending_pages.insert(key);
    }

    #[cfg(test)]
    pub(crate) fn pending_page_count(&self) -> usize {
        self.pending_pages.len()
    }

    #[cfg(test)]
    pub(crate) fn with_nodes(
        root_cube: Aabb,
        details: DatasetDetails,
        nodes: impl IntoIterator<Item = NodeDescriptor>,
    ) -> HierarchyIndex {
        let mut index = HierarchyIndex {
            nodes: HashMap::new(),
            pending_pages: HashSet::new(),
            root_cube,
            data_bounds: root_cube,
            total_points: 0,
            spacing: None,
            details,
        };
        for node in nodes {
            index.insert_node(node);
        }
        index
    }
}

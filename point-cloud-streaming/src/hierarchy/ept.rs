//! Directory-tiled (EPT) hierarchy loading.
//!
//! An EPT dataset splits metadata (`ept.json`), hierarchy
//! (`ept-hierarchy/<key>.json`), and point data (`ept-data/<key>.laz`) into
//! separately addressable resources. Hierarchy pages map node keys to point
//! counts, with `-1` marking a child page that is fetched only once the
//! viewport actually asks for that level.

use std::collections::HashMap;

use glam::DVec3;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::StreamError;
use crate::source::BinaryRangeSource;

use super::{Aabb, DatasetDetails, HierarchyIndex, NodeDescriptor, NodeKey};

/// Dimensions every LAS-derived dataset carries; anything else in the
/// schema is an extra dimension worth reporting to the consumer.
const STANDARD_DIMENSIONS: &[&str] = &[
    "X",
    "Y",
    "Z",
    "Intensity",
    "ReturnNumber",
    "NumberOfReturns",
    "ScanDirectionFlag",
    "EdgeOfFlightLine",
    "Classification",
    "ClassFlags",
    "ScannerChannel",
    "ScanAngle",
    "ScanAngleRank",
    "UserData",
    "PointSourceId",
    "GpsTime",
    "Red",
    "Green",
    "Blue",
    "Infrared",
];

/// `ept.json` metadata document.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EptMeta {
    /// Cubic bounds: min x/y/z then max x/y/z, in native units.
    pub bounds: [f64; 6],
    /// Tight bounds of the stored points.
    #[serde(default)]
    pub bounds_conforming: Option<[f64; 6]>,
    pub points: u64,
    /// Grid span of one node tile; spacing is cube width / span.
    pub span: u32,
    pub data_type: String,
    #[serde(default)]
    pub hierarchy_type: Option<String>,
    #[serde(default)]
    pub schema: Vec<EptDimension>,
    #[serde(default)]
    pub srs: Option<EptSrs>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EptDimension {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    pub size: u32,
    #[serde(default)]
    pub scale: Option<f64>,
    #[serde(default)]
    pub offset: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EptSrs {
    #[serde(default)]
    pub authority: Option<String>,
    #[serde(default)]
    pub horizontal: Option<String>,
    #[serde(default)]
    pub vertical: Option<String>,
    #[serde(default)]
    pub wkt: Option<String>,
}

/// Metadata facts the decoder needs for the directory-tiled layout.
pub struct EptDataset {
    pub meta: EptMeta,
}

impl EptDataset {
    pub fn crs_description(&self) -> Option<&str> {
        self.meta.srs.as_ref().and_then(|srs| srs.wkt.as_deref())
    }

    pub fn has_color(&self) -> bool {
        self.meta.schema.iter().any(|dim| dim.name == "Red")
    }

    /// Schema dimensions beyond the standard LAS set.
    pub fn extra_dimension_names(&self) -> Vec<String> {
        self.meta
            .schema
            .iter()
            .filter(|dim| !STANDARD_DIMENSIONS.contains(&dim.name.as_str()))
            .map(|dim| dim.name.clone())
            .collect()
    }

    pub fn data_resource(key: NodeKey) -> String {
        format!("ept-data/{key}.laz")
    }

    pub fn hierarchy_resource(key: NodeKey) -> String {
        format!("ept-hierarchy/{key}.json")
    }
}

pub(super) async fn load(source: &dyn BinaryRangeSource) -> Result<HierarchyIndex, StreamError> {
    let bytes = source
        .fetch_all("ept.json")
        .await
        .map_err(StreamError::Network)?;
    let meta: EptMeta = serde_json::from_slice(&bytes)
        .map_err(|e| StreamError::Format(format!("bad ept.json: {e}")))?;

    if meta.data_type != "laszip" {
        return Err(StreamError::Format(format!(
            "unsupported EPT data type '{}'",
            meta.data_type
        )));
    }

    // No bundled EPSG database, so a code without WKT cannot be resolved.
    if let Some(srs) = &meta.srs {
        if srs.wkt.is_none() && srs.horizontal.is_some() {
            warn!(
                dataset = source.name(),
                authority = srs.authority.as_deref().unwrap_or(""),
                code = srs.horizontal.as_deref().unwrap_or(""),
                "srs declares only an authority code, positions stay in native units"
            );
        }
    }

    let root_cube = Aabb::new(
        DVec3::new(meta.bounds[0], meta.bounds[1], meta.bounds[2]),
        DVec3::new(meta.bounds[3], meta.bounds[4], meta.bounds[5]),
    );
    let data_bounds = meta
        .bounds_conforming
        .map(|b| Aabb::new(DVec3::new(b[0], b[1], b[2]), DVec3::new(b[3], b[4], b[5])))
        .unwrap_or(root_cube);
    let cube_width = root_cube.max.x - root_cube.min.x;
    let spacing = (meta.span > 0).then(|| cube_width / f64::from(meta.span));

    let mut index = HierarchyIndex {
        nodes: Default::default(),
        pending_pages: Default::default(),
        root_cube,
        data_bounds,
        total_points: meta.points,
        spacing,
        details: DatasetDetails::Ept(EptDataset { meta }),
    };

    // The root page must be reachable; deeper pages are fetched on demand.
    load_page(source, &mut index, NodeKey::ROOT).await?;
    debug!(
        dataset = source.name(),
        nodes = index.nodes.len(),
        "EPT root hierarchy loaded"
    );
    Ok(index)
}

/// Fetch and merge one hierarchy page. Keys with a positive count become
/// node descriptors; `-1` marks a child page left pending until a viewport
/// needs its depth.
pub(super) async fn load_page(
    source: &dyn BinaryRangeSource,
    index: &mut HierarchyIndex,
    page_key: NodeKey,
) -> Result<(), StreamError> {
    let resource = EptDataset::hierarchy_resource(page_key);
    let bytes = source
        .fetch_all(&resource)
        .await
        .map_err(|source| StreamError::HierarchyPage {
            key: page_key,
            source,
        })?;
    let entries: HashMap<String, i64> = serde_json::from_slice(&bytes)
        .map_err(|e| StreamError::Format(format!("bad hierarchy page '{resource}': {e}")))?;

    for (key_str, count) in entries {
        let Ok(key) = key_str.parse::<NodeKey>() else {
            warn!(resource, key = key_str, "unparseable node key in hierarchy page");
            continue;
        };
        if count < 0 {
            // A page lists itself with its real count inside its own file,
            // so a self-reference here would never resolve.
            if key != page_key {
                index.mark_pending_page(key);
            }
        } else if count > 0 {
            let bounds = Aabb::node_bounds(&index.root_cube, key);
            index.insert_node(NodeDescriptor {
                key,
                point_count: count as u64,
                byte_offset: 0,
                byte_len: 0,
                bounds,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemoryRangeSource;
    use futures::executor::block_on;

    pub(crate) fn ept_json(span: u32) -> String {
        serde_json::json!({
            "bounds": [0.0, 0.0, 0.0, 100.0, 100.0, 100.0],
            "boundsConforming": [0.0, 0.0, 0.0, 100.0, 100.0, 20.0],
            "points": 4200,
            "span": span,
            "dataType": "laszip",
            "hierarchyType": "json",
            "schema": [
                {"name": "X", "type": "signed", "size": 4, "scale": 0.01, "offset": 50.0},
                {"name": "Y", "type": "signed", "size": 4, "scale": 0.01, "offset": 50.0},
                {"name": "Z", "type": "signed", "size": 4, "scale": 0.01, "offset": 10.0},
                {"name": "Intensity", "type": "unsigned", "size": 2},
                {"name": "Red", "type": "unsigned", "size": 2},
                {"name": "Green", "type": "unsigned", "size": 2},
                {"name": "Blue", "type": "unsigned", "size": 2},
                {"name": "HeightAboveGround", "type": "float", "size": 4}
            ],
            "srs": {"authority": "EPSG", "horizontal": "26910", "wkt": "PROJCS[\"NAD83 / UTM zone 10N\"]"}
        })
        .to_string()
    }

    fn synthetic_ept() -> MemoryRangeSource {
        let mut source = MemoryRangeSource::new("ept://synthetic");
        source.insert("ept.json", ept_json(10).into_bytes());
        source.insert(
            "ept-hierarchy/0-0-0-0.json",
            serde_json::json!({
                "0-0-0-0": 1000,
                "1-0-0-0": 1200,
                "1-1-1-0": 800,
                "2-0-0-0": -1
            })
            .to_string()
            .into_bytes(),
        );
        source.insert(
            "ept-hierarchy/2-0-0-0.json",
            serde_json::json!({
                "2-0-0-0": 700,
                "3-1-1-0": 500
            })
            .to_string()
            .into_bytes(),
        );
        source
    }

    #[test]
    fn root_page_loads_eagerly_and_sub_pages_stay_pending() {
        let source = synthetic_ept();
        let index = block_on(load(&source)).unwrap();

        assert_eq!(index.nodes().len(), 3);
        assert_eq!(index.total_points, 4200);
        assert_eq!(index.spacing, Some(10.0));
        assert_eq!(index.pending_page_count(), 1);
        assert!(index.get(&NodeKey::new(2, 0, 0, 0)).is_none());
    }

    #[test]
    fn ensure_depth_resolves_pages_on_demand() {
        let source = synthetic_ept();
        let mut index = block_on(load(&source)).unwrap();

        // Depth 1 needs no new pages.
        block_on(index.ensure_depth(&source, 1)).unwrap();
        assert_eq!(index.nodes().len(), 3);

        block_on(index.ensure_depth(&source, 2)).unwrap();
        assert_eq!(index.pending_page_count(), 0);
        assert_eq!(index.get(&NodeKey::new(2, 0, 0, 0)).unwrap().point_count, 700);
        assert!(index.get(&NodeKey::new(3, 1, 1, 0)).is_some());
    }

    #[test]
    fn missing_sub_page_degrades_to_coarser_detail() {
        let mut source = synthetic_ept();
        source.remove("ept-hierarchy/2-0-0-0.json");
        let mut index = block_on(load(&source)).unwrap();

        block_on(index.ensure_depth(&source, 5)).unwrap();
        assert_eq!(index.pending_page_count(), 0);
        // The parent and sibling nodes are still there.
        assert_eq!(index.nodes().len(), 3);
        assert!(index.get(&NodeKey::new(1, 0, 0, 0)).is_some());
    }

    #[test]
    fn missing_root_resources_are_fatal() {
        let source = MemoryRangeSource::new("ept://empty");
        assert!(matches!(
            block_on(load(&source)),
            Err(StreamError::Network(_))
        ));

        let mut source = MemoryRangeSource::new("ept://no-hierarchy");
        source.insert("ept.json", ept_json(10).into_bytes());
        assert!(matches!(
            block_on(load(&source)),
            Err(StreamError::HierarchyPage { .. })
        ));
    }

    #[test]
    fn schema_reports_color_and_extra_dimensions() {
        let source = synthetic_ept();
        let index = block_on(load(&source)).unwrap();
        let DatasetDetails::Ept(ept) = &index.details else {
            panic!("expected EPT details");
        };
        assert!(ept.has_color());
        assert_eq!(ept.extra_dimension_names(), vec!["HeightAboveGround"]);
        assert_eq!(
            index.details.crs_description(),
            Some("PROJCS[\"NAD83 / UTM zone 10N\"]")
        );
    }

    #[test]
    fn code_only_srs_loads_without_a_crs_description() {
        let mut source = MemoryRangeSource::new("ept://code-only");
        source.insert(
            "ept.json",
            serde_json::json!({
                "bounds": [0.0, 0.0, 0.0, 100.0, 100.0, 100.0],
                "points": 1000,
                "span": 10,
                "dataType": "laszip",
                "srs": {"authority": "EPSG", "horizontal": "26910"}
            })
            .to_string()
            .into_bytes(),
        );
        source.insert(
            "ept-hierarchy/0-0-0-0.json",
            serde_json::json!({ "0-0-0-0": 1000 }).to_string().into_bytes(),
        );

        let index = block_on(load(&source)).unwrap();
        assert!(index.details.crs_description().is_none());
        assert_eq!(index.nodes().len(), 1);
    }

    #[test]
    fn non_laszip_data_is_rejected() {
        let mut source = MemoryRangeSource::new("ept://zstd");
        source.insert(
            "ept.json",
            ept_json(10).replace("laszip", "zstandard").into_bytes(),
        );
        assert!(matches!(
            block_on(load(&source)),
            Err(StreamError::Format(_))
        ));
    }
}

//! Point block decoding.
//!
//! Fetched bytes become a [`PointBatch`]: horizontal positions reprojected
//! to WGS84 (when the dataset declares a usable CRS) and stored as f32
//! offsets from a session-wide origin, plus intensity, classification,
//! color, and any declared extra-bytes dimensions. Elevation passes through
//! in meters. The f64 origin is what keeps the f32 positions precise at
//! continental coordinates.

pub(crate) mod chunk;
pub mod crs;
pub mod extra;

use std::collections::HashMap;
use std::io::Cursor;

use glam::DVec3;
use tracing::warn;

use crate::error::StreamError;
use crate::hierarchy::{Aabb, CopcDataset, DatasetDetails, NodeDescriptor, NodeKey};

pub use crs::CrsTransform;
pub use extra::ExtraDimension;

/// Anchor subtracted from every decoded horizontal position before the f32
/// narrowing. Fixed at session initialization from the dataset bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateOrigin {
    /// Anchor position; z is always 0 so elevations stay absolute.
    pub position: DVec3,
    /// True when `position` is longitude/latitude degrees; false when the
    /// dataset's native units pass through untransformed.
    pub geographic: bool,
}

/// Decoded attributes of one octree node.
#[derive(Debug)]
pub struct PointBatch {
    pub key: NodeKey,
    pub origin: CoordinateOrigin,
    /// Positions relative to `origin`: x/y offsets in the origin's space,
    /// z absolute elevation in meters (native units without a CRS).
    pub positions: Vec<[f32; 3]>,
    /// Intensity normalized to the unit interval.
    pub intensity: Vec<f32>,
    pub classification: Vec<u8>,
    /// 16-bit RGB, present when the point format stores color.
    pub color: Option<Vec<[u16; 3]>>,
    /// Extra-bytes dimensions by name, scale and offset applied. Values a
    /// descriptor cannot decode come through as NaN to keep columns aligned.
    pub extra: HashMap<String, Vec<f64>>,
    /// Node bounds in the dataset's native units.
    pub native_bounds: Aabb,
}

impl PointBatch {
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// Per-session decode context: the CRS is parsed and the origin fixed once,
/// not per node.
pub struct PointRecordDecoder {
    crs: Option<CrsTransform>,
    origin: CoordinateOrigin,
}

impl PointRecordDecoder {
    /// An unparseable or unsupported CRS is downgraded to a warning and
    /// positions stay in native units.
    pub fn new(details: &DatasetDetails, data_bounds: &Aabb) -> Self {
        let crs = details.crs_description().and_then(|description| {
            match CrsTransform::from_description(description) {
                Ok(transform) => Some(transform),
                Err(err) => {
                    warn!(error = %err, "CRS unusable, positions stay in native units");
                    None
                }
            }
        });

        let center = data_bounds.center();
        let origin = match &crs {
            Some(crs) => match crs.to_geographic(center.x, center.y, 0.0) {
                Ok((lon, lat, _)) => CoordinateOrigin {
                    position: DVec3::new(lon, lat, 0.0),
                    geographic: true,
                },
                Err(err) => {
                    warn!(error = %err, "dataset center outside CRS domain, using native origin");
                    CoordinateOrigin {
                        position: DVec3::new(center.x, center.y, 0.0),
                        geographic: false,
                    }
                }
            },
            None => CoordinateOrigin {
                position: DVec3::new(center.x, center.y, 0.0),
                geographic: false,
            },
        };

        Self { crs, origin }
    }

    pub fn origin(&self) -> CoordinateOrigin {
        self.origin
    }

    pub fn crs(&self) -> Option<&CrsTransform> {
        self.crs.as_ref()
    }

    pub fn decode(
        &self,
        bytes: &[u8],
        node: &NodeDescriptor,
        details: &DatasetDetails,
    ) -> Result<PointBatch, StreamError> {
        let (points, extra_dims) = match details {
            DatasetDetails::Copc(copc) => decode_copc_block(bytes, node, copc)?,
            DatasetDetails::Ept(_) => decode_laz_file(bytes, node)?,
        };
        self.assemble(node, points, extra_dims, details.has_color())
    }

    fn assemble(
        &self,
        node: &NodeDescriptor,
        points: Vec<las::Point>,
        extra_dims: Vec<ExtraDimension>,
        has_color: bool,
    ) -> Result<PointBatch, StreamError> {
        let decode_err = |message: String| StreamError::Decode {
            key: node.key,
            message,
        };

        // Extra dimensions are laid out sequentially in the record's extra
        // payload; keep the offset of each decodable one.
        let mut layout = Vec::new();
        let mut payload_offset = 0usize;
        for dim in extra_dims {
            let len = dim.byte_len;
            if (1..=10).contains(&dim.data_type) {
                layout.push((dim, payload_offset));
            }
            payload_offset += len;
        }

        let mut positions = Vec::with_capacity(points.len());
        let mut intensity = Vec::with_capacity(points.len());
        let mut classification = Vec::with_capacity(points.len());
        let mut colors = has_color.then(|| Vec::with_capacity(points.len()));
        let mut extra_columns: Vec<Vec<f64>> = layout
            .iter()
            .map(|_| Vec::with_capacity(points.len()))
            .collect();

        for point in &points {
            let (x, y, z) = match &self.crs {
                Some(crs) => crs
                    .to_geographic(point.x, point.y, point.z)
                    .map_err(|e| decode_err(e.to_string()))?,
                None => (point.x, point.y, point.z),
            };
            positions.push([
                (x - self.origin.position.x) as f32,
                (y - self.origin.position.y) as f32,
                z as f32,
            ]);
            intensity.push(f32::from(point.intensity) / f32::from(u16::MAX));
            classification.push(u8::from(point.classification));
            if let Some(colors) = colors.as_mut() {
                let c = point.color.unwrap_or_default();
                colors.push([c.red, c.green, c.blue]);
            }

            for ((dim, offset), column) in layout.iter().zip(extra_columns.iter_mut()) {
                let value = point
                    .extra_bytes
                    .get(*offset..*offset + dim.byte_len)
                    .and_then(|slice| dim.read_value(slice))
                    .unwrap_or(f64::NAN);
                column.push(value);
            }
        }

        let extra = layout
            .into_iter()
            .map(|(dim, _)| dim.name)
            .zip(extra_columns)
            .collect();

        Ok(PointBatch {
            key: node.key,
            origin: self.origin,
            positions,
            intensity,
            classification,
            color: colors,
            extra,
            native_bounds: node.bounds,
        })
    }
}

/// Decompress a cloud-optimized node block and parse its raw records.
fn decode_copc_block(
    bytes: &[u8],
    node: &NodeDescriptor,
    copc: &CopcDataset,
) -> Result<(Vec<las::Point>, Vec<ExtraDimension>), StreamError> {
    let decode_err = |message: String| StreamError::Decode {
        key: node.key,
        message,
    };

    let point_count = node.point_count as usize;
    let records =
        chunk::decompress_block(bytes, &copc.laz_vlr, point_count).map_err(decode_err)?;
    let record_len = copc.laz_vlr.items_size() as usize;

    let mut points = Vec::with_capacity(point_count);
    for record in records.chunks_exact(record_len) {
        let raw = las::raw::Point::read_from(Cursor::new(record), &copc.point_format)
            .map_err(|e| decode_err(format!("bad point record: {e}")))?;
        points.push(las::Point::new(raw, &copc.transforms));
    }
    Ok((points, copc.extra_dims.clone()))
}

/// Parse a complete LAZ file, as stored per node by the directory-tiled
/// layout. Extra-bytes dimensions come from the node file's own VLRs.
fn decode_laz_file(
    bytes: &[u8],
    node: &NodeDescriptor,
) -> Result<(Vec<las::Point>, Vec<ExtraDimension>), StreamError> {
    let decode_err = |message: String| StreamError::Decode {
        key: node.key,
        message,
    };

    let mut reader = las::Reader::new(Cursor::new(bytes.to_vec()))
        .map_err(|e| decode_err(format!("bad node file: {e}")))?;
    let extra_dims = reader
        .header()
        .vlrs()
        .iter()
        .find(|vlr| vlr.user_id == "LASF_Spec" && vlr.record_id == 4)
        .map(|vlr| extra::parse_extra_bytes_vlr(&vlr.data))
        .unwrap_or_default();

    let mut points = Vec::new();
    for point in reader.points() {
        points.push(point.map_err(|e| decode_err(format!("bad point record: {e}")))?);
    }
    Ok((points, extra_dims))
}

//! Cloud-optimized (COPC) hierarchy loading.
//!
//! A COPC file is a LAS 1.4 / LAZ file whose VLRs carry an octree index:
//! the `copc` info VLR points at a root hierarchy page, and each page lists
//! 32-byte entries that either describe a point block or point at a child
//! page. Pages are resolved with an explicit worklist so deep or malformed
//! hierarchies cannot exhaust the call stack, and a failed sub-page only
//! drops its own sub-tree.

use std::io::Cursor;

use glam::DVec3;
use tracing::{debug, warn};

use crate::decode::extra::{ExtraDimension, parse_extra_bytes_vlr};
use crate::error::StreamError;
use crate::source::BinaryRangeSource;

use super::{Aabb, DatasetDetails, HierarchyIndex, NodeDescriptor, NodeKey};

/// LAS 1.4 header size; COPC mandates version 1.4.
const HEADER_SIZE: u64 = 375;
/// Size of one hierarchy page entry.
const ENTRY_SIZE: usize = 32;

/// Header facts the decoder needs for the cloud-optimized layout.
pub struct CopcDataset {
    /// Point record format, extra-bytes width included.
    pub point_format: las::point::Format,
    /// Scale/offset transforms from integer records to native units.
    pub transforms: las::Vector<las::Transform>,
    /// Compression layout of the point blocks.
    pub laz_vlr: laz::LazVlr,
    /// Declared extra-bytes dimensions, in record order.
    pub extra_dims: Vec<ExtraDimension>,
    /// CRS description from the WKT VLR, when present.
    pub crs: Option<String>,
}

impl CopcDataset {
    pub fn has_color(&self) -> bool {
        self.point_format.has_color
    }
}

/// COPC info VLR payload (user id `copc`, record 1).
struct CopcInfo {
    center: DVec3,
    halfsize: f64,
    spacing: f64,
    root_page_offset: u64,
    root_page_size: u64,
}

impl CopcInfo {
    fn read(data: &[u8]) -> Result<CopcInfo, StreamError> {
        let mut reader = ByteReader::new(data, "copc info vlr");
        let center = DVec3::new(reader.read_f64()?, reader.read_f64()?, reader.read_f64()?);
        Ok(CopcInfo {
            center,
            halfsize: reader.read_f64()?,
            spacing: reader.read_f64()?,
            root_page_offset: reader.read_u64()?,
            root_page_size: reader.read_u64()?,
        })
    }
}

pub(super) async fn load(source: &dyn BinaryRangeSource) -> Result<HierarchyIndex, StreamError> {
    let header_bytes = source
        .fetch_range("", 0, HEADER_SIZE)
        .await
        .map_err(StreamError::Network)?;
    let raw_header = las::raw::Header::read_from(Cursor::new(&header_bytes))
        .map_err(|e| StreamError::Format(format!("not a LAS header: {e}")))?;

    if raw_header.version.major != 1 || raw_header.version.minor != 4 {
        return Err(StreamError::Format(format!(
            "COPC requires LAS 1.4, found {}.{}",
            raw_header.version.major, raw_header.version.minor
        )));
    }

    let vlrs = fetch_vlrs(source, &raw_header).await?;

    let mut copc_info = None;
    let mut laz_vlr = None;
    let mut crs = None;
    let mut extra_dims = Vec::new();
    for vlr in &vlrs {
        let user_id = trimmed(&vlr.user_id);
        match (user_id.as_str(), vlr.record_id) {
            ("copc", 1) => copc_info = Some(CopcInfo::read(&vlr.data)?),
            ("laszip encoded", 22204) => {
                let parsed = laz::LazVlr::from_buffer(&vlr.data)
                    .map_err(|e| StreamError::Format(format!("bad laszip VLR: {e}")))?;
                laz_vlr = Some(parsed);
            }
            ("LASF_Projection", 2112) => {
                crs = Some(String::from_utf8_lossy(&vlr.data).trim_end_matches('\0').to_string());
            }
            ("LASF_Spec", 4) => extra_dims = parse_extra_bytes_vlr(&vlr.data),
            _ => {}
        }
    }

    let copc_info = copc_info
        .ok_or_else(|| StreamError::Format("missing COPC info VLR, not a COPC file".to_string()))?;
    let laz_vlr =
        laz_vlr.ok_or_else(|| StreamError::Format("missing laszip VLR".to_string()))?;

    let format_id = raw_header.point_data_record_format & 0x3f;
    let mut point_format = las::point::Format::new(format_id)
        .map_err(|e| StreamError::Format(format!("unsupported point format {format_id}: {e}")))?;
    point_format.extra_bytes = raw_header
        .point_data_record_length
        .saturating_sub(point_format.len());

    let transforms = las::Vector {
        x: las::Transform {
            scale: raw_header.x_scale_factor,
            offset: raw_header.x_offset,
        },
        y: las::Transform {
            scale: raw_header.y_scale_factor,
            offset: raw_header.y_offset,
        },
        z: las::Transform {
            scale: raw_header.z_scale_factor,
            offset: raw_header.z_offset,
        },
    };

    let total_points = raw_header
        .large_file
        .as_ref()
        .map(|lf| lf.number_of_point_records)
        .unwrap_or(u64::from(raw_header.number_of_point_records));

    let root_cube = Aabb::new(
        copc_info.center - DVec3::splat(copc_info.halfsize),
        copc_info.center + DVec3::splat(copc_info.halfsize),
    );
    let data_bounds = Aabb::new(
        DVec3::new(raw_header.min_x, raw_header.min_y, raw_header.min_z),
        DVec3::new(raw_header.max_x, raw_header.max_y, raw_header.max_z),
    );

    let mut index = HierarchyIndex {
        nodes: Default::default(),
        pending_pages: Default::default(),
        root_cube,
        data_bounds,
        total_points,
        spacing: (copc_info.spacing > 0.0).then_some(copc_info.spacing),
        details: DatasetDetails::Copc(CopcDataset {
            point_format,
            transforms,
            laz_vlr,
            extra_dims,
            crs,
        }),
    };

    resolve_pages(source, &mut index, &copc_info).await?;
    debug!(
        dataset = source.name(),
        nodes = index.nodes.len(),
        total_points,
        "COPC hierarchy resolved"
    );
    Ok(index)
}

async fn fetch_vlrs(
    source: &dyn BinaryRangeSource,
    raw_header: &las::raw::Header,
) -> Result<Vec<las::raw::Vlr>, StreamError> {
    let begin = u64::from(raw_header.header_size);
    let end = u64::from(raw_header.offset_to_point_data);
    if end < begin {
        return Err(StreamError::Format(
            "point data offset precedes end of header".to_string(),
        ));
    }
    let bytes = source
        .fetch_range("", begin, end)
        .await
        .map_err(StreamError::Network)?;

    let mut cursor = Cursor::new(bytes);
    let mut vlrs = Vec::with_capacity(raw_header.number_of_variable_length_records as usize);
    for _ in 0..raw_header.number_of_variable_length_records {
        let vlr = las::raw::Vlr::read_from(&mut cursor, false)
            .map_err(|e| StreamError::Format(format!("bad VLR: {e}")))?;
        vlrs.push(vlr);
    }
    Ok(vlrs)
}

/// Resolve every hierarchy page into flat node descriptors.
///
/// A failed root page aborts the load; a failed descendant page is logged
/// and skipped, leaving that region with no finer detail.
async fn resolve_pages(
    source: &dyn BinaryRangeSource,
    index: &mut HierarchyIndex,
    info: &CopcInfo,
) -> Result<(), StreamError> {
    let mut worklist = vec![(info.root_page_offset, info.root_page_size)];
    let mut is_root_page = true;

    while let Some((offset, size)) = worklist.pop() {
        let bytes = match source.fetch_range("", offset, offset + size).await {
            Ok(bytes) => bytes,
            Err(err) if is_root_page => return Err(StreamError::Network(err)),
            Err(err) => {
                warn!(dataset = source.name(), offset, error = %err,
                      "hierarchy sub-page unreachable, sub-tree dropped");
                continue;
            }
        };

        match parse_page(&bytes, index, &mut worklist) {
            Ok(()) => {}
            Err(err) if is_root_page => return Err(err),
            Err(err) => {
                warn!(dataset = source.name(), offset, error = %err, "malformed hierarchy sub-page");
            }
        }
        is_root_page = false;
    }
    Ok(())
}

fn parse_page(
    bytes: &[u8],
    index: &mut HierarchyIndex,
    worklist: &mut Vec<(u64, u64)>,
) -> Result<(), StreamError> {
    if bytes.len() % ENTRY_SIZE != 0 {
        return Err(StreamError::Format(format!(
            "hierarchy page length {} not a multiple of {ENTRY_SIZE}",
            bytes.len()
        )));
    }

    for entry in bytes.chunks_exact(ENTRY_SIZE) {
        let mut reader = ByteReader::new(entry, "hierarchy entry");
        let depth = reader.read_i32()?;
        let x = reader.read_i32()?;
        let y = reader.read_i32()?;
        let z = reader.read_i32()?;
        let offset = reader.read_u64()?;
        let byte_size = reader.read_i32()?;
        let point_count = reader.read_i32()?;

        let (Ok(depth), Ok(x), Ok(y), Ok(z)) = (
            u32::try_from(depth),
            u32::try_from(x),
            u32::try_from(y),
            u32::try_from(z),
        ) else {
            warn!(depth, x, y, z, "negative voxel key in hierarchy page, entry skipped");
            continue;
        };
        let key = NodeKey::new(depth, x, y, z);

        if point_count < 0 {
            // Child page pointer.
            worklist.push((offset, byte_size as u64));
        } else if point_count > 0 {
            let bounds = Aabb::node_bounds(&index.root_cube, key);
            index.insert_node(NodeDescriptor {
                key,
                point_count: point_count as u64,
                byte_offset: offset,
                byte_len: byte_size as u64,
                bounds,
            });
        }
        // point_count == 0: empty voxel, nothing stored.
    }
    Ok(())
}

fn trimmed(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).trim_end_matches('\0').to_string()
}

/// Bounds-checked little-endian reads over a byte slice.
pub(crate) struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
    what: &'static str,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(buf: &'a [u8], what: &'static str) -> Self {
        Self { buf, pos: 0, what }
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], StreamError> {
        let end = self.pos + N;
        let slice = self
            .buf
            .get(self.pos..end)
            .ok_or_else(|| StreamError::Format(format!("truncated {}", self.what)))?;
        self.pos = end;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    pub(crate) fn read_i32(&mut self) -> Result<i32, StreamError> {
        Ok(i32::from_le_bytes(self.take::<4>()?))
    }

    pub(crate) fn read_u64(&mut self) -> Result<u64, StreamError> {
        Ok(u64::from_le_bytes(self.take::<8>()?))
    }

    pub(crate) fn read_f64(&mut self) -> Result<f64, StreamError> {
        Ok(f64::from_le_bytes(self.take::<8>()?))
    }
}

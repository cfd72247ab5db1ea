//! Extra-bytes dimension descriptors.
//!
//! The `LASF_Spec`/4 VLR declares per-point attributes appended after the
//! standard record, one fixed 192-byte descriptor per dimension. Dimensions
//! are stored in declaration order, so the descriptors double as the layout
//! of the record's extra payload.

use tracing::warn;

const DESCRIPTOR_SIZE: usize = 192;

/// One declared extra-bytes dimension.
#[derive(Debug, Clone)]
pub struct ExtraDimension {
    pub name: String,
    /// LAS extra-bytes data type code (0 is an undocumented blob).
    pub data_type: u8,
    /// Stored width inside the record's extra payload.
    pub byte_len: usize,
    pub scale: f64,
    pub offset: f64,
}

impl ExtraDimension {
    /// Decode this dimension from its slice of the extra payload, scale and
    /// offset applied. Blobs and deprecated array types yield `None`.
    pub fn read_value(&self, bytes: &[u8]) -> Option<f64> {
        if bytes.len() != self.byte_len {
            return None;
        }
        let raw = match self.data_type {
            1 => f64::from(bytes[0]),
            2 => f64::from(bytes[0] as i8),
            3 => f64::from(u16::from_le_bytes(bytes.try_into().ok()?)),
            4 => f64::from(i16::from_le_bytes(bytes.try_into().ok()?)),
            5 => f64::from(u32::from_le_bytes(bytes.try_into().ok()?)),
            6 => f64::from(i32::from_le_bytes(bytes.try_into().ok()?)),
            7 => u64::from_le_bytes(bytes.try_into().ok()?) as f64,
            8 => i64::from_le_bytes(bytes.try_into().ok()?) as f64,
            9 => f64::from(f32::from_le_bytes(bytes.try_into().ok()?)),
            10 => f64::from_le_bytes(bytes.try_into().ok()?),
            _ => return None,
        };
        Some(raw * self.scale + self.offset)
    }
}

/// Width of one stored value for a type code. Codes 11..=30 are the
/// deprecated 2- and 3-element array forms of codes 1..=10.
fn type_size(data_type: u8) -> Option<usize> {
    if !(1..=30).contains(&data_type) {
        return None;
    }
    let base = match (data_type - 1) % 10 + 1 {
        1 | 2 => 1,
        3 | 4 => 2,
        5 | 6 | 9 => 4,
        _ => 8,
    };
    let count = usize::from((data_type - 1) / 10 + 1);
    Some(base * count)
}

/// Parse the extra-bytes VLR payload into dimension descriptors.
///
/// A descriptor with an unknown type code ends parsing: the stride of every
/// later dimension would be wrong, so the remainder is dropped with a
/// warning rather than misread.
pub fn parse_extra_bytes_vlr(data: &[u8]) -> Vec<ExtraDimension> {
    let mut dims = Vec::new();
    for descriptor in data.chunks_exact(DESCRIPTOR_SIZE) {
        let data_type = descriptor[2];
        let options = descriptor[3];
        let name = String::from_utf8_lossy(&descriptor[4..36])
            .trim_end_matches('\0')
            .to_string();

        let byte_len = if data_type == 0 {
            usize::from(options)
        } else {
            match type_size(data_type) {
                Some(size) => size,
                None => {
                    warn!(name, data_type, "unknown extra-bytes type, remaining dimensions dropped");
                    break;
                }
            }
        };

        // Scale and offset only apply when their option bits are set.
        let scale = if options & 0x08 != 0 {
            f64::from_le_bytes(descriptor[112..120].try_into().unwrap())
        } else {
            1.0
        };
        let offset = if options & 0x10 != 0 {
            f64::from_le_bytes(descriptor[136..144].try_into().unwrap())
        } else {
            0.0
        };

        dims.push(ExtraDimension {
            name,
            data_type,
            byte_len,
            scale,
            offset,
        });
    }
    dims
}

//! LAZ block decompression.
//!
//! In the cloud-optimized layout every octree node owns one self-contained
//! compressed chunk, so each block gets a fresh record decompressor and no
//! chunk table is consulted. Point formats 6 and up use the layered (v3)
//! item codecs; older formats decompress sequentially.

use std::io::Cursor;

use laz::record::{
    LayeredPointRecordDecompressor, RecordDecompressor, SequentialPointRecordDecompressor,
};

/// Decompress one node's block into contiguous raw point records.
pub(crate) fn decompress_block(
    compressed: &[u8],
    vlr: &laz::LazVlr,
    point_count: usize,
) -> Result<Vec<u8>, String> {
    let record_len = vlr.items_size() as usize;
    let mut records = vec![0u8; point_count * record_len];
    let src = Cursor::new(compressed);

    let layered = vlr.items().iter().any(|item| item.version() >= 3);
    if layered {
        let mut decompressor = LayeredPointRecordDecompressor::new(src);
        decompressor
            .set_fields_from(vlr.items())
            .map_err(|e| e.to_string())?;
        for record in records.chunks_exact_mut(record_len) {
            decompressor.decompress_next(record).map_err(|e| e.to_string())?;
        }
    } else {
        let mut decompressor = SequentialPointRecordDecompressor::new(src);
        decompressor
            .set_fields_from(vlr.items())
            .map_err(|e| e.to_string())?;
        for record in records.chunks_exact_mut(record_len) {
            decompressor.decompress_next(record).map_err(|e| e.to_string())?;
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use laz::record::{LayeredPointRecordCompressor, RecordCompressor};

    #[test]
    fn layered_block_round_trips() {
        let vlr = laz::LazVlr::from_laz_items(
            laz::LazItemRecordBuilder::new()
                .add_item(laz::LazItemType::Point14)
                .build(),
        );
        let record_len = vlr.items_size() as usize;

        // Three point-14 records with distinct coordinates and intensity.
        let mut records = vec![0u8; 3 * record_len];
        for (i, record) in records.chunks_exact_mut(record_len).enumerate() {
            let v = (i as i32 + 1) * 100;
            record[0..4].copy_from_slice(&v.to_le_bytes());
            record[4..8].copy_from_slice(&(v * 2).to_le_bytes());
            record[8..12].copy_from_slice(&(v * 3).to_le_bytes());
            record[12..14].copy_from_slice(&(i as u16).to_le_bytes());
            record[14] = 0x11; // one return of one
        }

        let mut dst = Cursor::new(Vec::new());
        {
            let mut compressor = LayeredPointRecordCompressor::new(&mut dst);
            compressor.set_fields_from(vlr.items()).unwrap();
            for record in records.chunks_exact(record_len) {
                compressor.compress_next(record).unwrap();
            }
            compressor.done().unwrap();
        }

        let decompressed = decompress_block(&dst.into_inner(), &vlr, 3).unwrap();
        assert_eq!(decompressed, records);
    }

    #[test]
    fn truncated_block_reports_an_error() {
        let vlr = laz::LazVlr::from_laz_items(
            laz::LazItemRecordBuilder::new()
                .add_item(laz::LazItemType::Point14)
                .build(),
        );
        assert!(decompress_block(&[0u8; 2], &vlr, 10).is_err());
    }
}

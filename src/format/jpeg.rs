//! JPEG tile stream preparation.
//!
//! Tiled TIFFs written by slide scanners usually store each tile as an
//! *abbreviated* JPEG stream: SOI, scan data and EOI, with the quantization
//! (DQT) and Huffman (DHT) tables stored once per directory in the
//! `JPEGTables` tag. A standalone decoder needs both pieces in one stream:
//!
//! ```text
//! tables: SOI DQT DHT ... EOI
//! tile:   SOI [SOF] SOS <entropy-coded data> EOI
//! merged: SOI DQT DHT ... [SOF] SOS <entropy-coded data> EOI
//! ```
//!
//! Tiles whose photometric interpretation is RGB are stored without a color
//! transform. Decoders assume YCbCr for three-component streams unless an
//! Adobe marker says otherwise, so such streams get an APP14 segment with
//! transform 0.

use bytes::{Bytes, BytesMut};

/// Start Of Image marker
pub const SOI: [u8; 2] = [0xFF, 0xD8];

/// End Of Image marker
pub const EOI: [u8; 2] = [0xFF, 0xD9];

/// Define Huffman Table marker
pub const DHT: [u8; 2] = [0xFF, 0xC4];

/// Define Quantization Table marker
pub const DQT: [u8; 2] = [0xFF, 0xDB];

/// Start Of Scan marker
pub const SOS: [u8; 2] = [0xFF, 0xDA];

/// Adobe APP14 segment declaring untransformed (RGB) components.
const ADOBE_RGB_SEGMENT: [u8; 16] = [
    0xFF, 0xEE, // APP14
    0x00, 0x0E, // length
    b'A', b'd', b'o', b'b', b'e', //
    0x00, 0x64, // version 100
    0x00, 0x00, // flags0
    0x00, 0x00, // flags1
    0x00, // transform: none
];

/// Whether `data` is an abbreviated stream: SOS appears before any DQT or
/// DHT segment.
pub fn is_abbreviated_stream(data: &[u8]) -> bool {
    if data.len() < 4 || data[0..2] != SOI {
        return false;
    }

    let mut pos = 2;
    while pos + 1 < data.len() {
        if data[pos] != 0xFF {
            pos += 1;
            continue;
        }

        let marker = [data[pos], data[pos + 1]];
        if marker == DQT || marker == DHT {
            return false;
        }
        if marker == SOS {
            return true;
        }

        // Segments other than standalone markers carry a 2-byte length
        let standalone = matches!(marker[1], 0x00 | 0x01 | 0xD0..=0xD9 | 0xFF);
        if !standalone && pos + 3 < data.len() {
            let length = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
            pos += 2 + length;
        } else {
            pos += 2;
        }
    }

    false
}

/// Splice `tables` into an abbreviated `tile` stream.
///
/// The EOI of the tables and the SOI of the tile are dropped.
pub fn merge_jpeg_tables(tables: &[u8], tile: &[u8]) -> Bytes {
    if tables.is_empty() {
        return Bytes::copy_from_slice(tile);
    }
    if tile.is_empty() {
        return Bytes::new();
    }

    let tables_end = if tables.ends_with(&EOI) {
        tables.len() - 2
    } else {
        tables.len()
    };
    let tile_start = if tile.starts_with(&SOI) { 2 } else { 0 };

    let mut merged = BytesMut::with_capacity(tables_end + tile.len() - tile_start);
    merged.extend_from_slice(&tables[..tables_end]);
    merged.extend_from_slice(&tile[tile_start..]);
    merged.freeze()
}

/// Insert an Adobe APP14 "no transform" segment right after SOI.
pub fn mark_rgb_components(stream: &[u8]) -> Bytes {
    if !stream.starts_with(&SOI) {
        return Bytes::copy_from_slice(stream);
    }

    let mut marked = BytesMut::with_capacity(stream.len() + ADOBE_RGB_SEGMENT.len());
    marked.extend_from_slice(&SOI);
    marked.extend_from_slice(&ADOBE_RGB_SEGMENT);
    marked.extend_from_slice(&stream[2..]);
    marked.freeze()
}

/// Turn a stored tile into a stream a standalone decoder accepts.
pub fn prepare_tile_jpeg(tables: Option<&[u8]>, tile: &[u8], rgb_components: bool) -> Bytes {
    let stream = match tables {
        Some(tables) if is_abbreviated_stream(tile) => merge_jpeg_tables(tables, tile),
        _ => Bytes::copy_from_slice(tile),
    };

    if rgb_components {
        mark_rgb_components(&stream)
    } else {
        stream
    }
}

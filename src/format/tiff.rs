//! Minimal TIFF directory walker.
//!
//! The header, the IFD chain, image dimensions, tiling, pixel layout and the
//! `ImageDescription` string are parsed eagerly. Tile offset arrays and
//! `JPEGTables` are only loaded on request through
//! [`TiffDirectory::read_tile_index`], since inspection never needs them.
//! Pixel data is never touched here; decoding is the region reader's job.
//!
//! ## Classic TIFF header (8 bytes)
//! ```text
//! Bytes 0-1: Byte order ("II" little-endian, "MM" big-endian)
//! Bytes 2-3: Version (42)
//! Bytes 4-7: Offset to first IFD
//! ```
//!
//! ## BigTIFF header (16 bytes)
//! ```text
//! Bytes 0-1: Byte order
//! Bytes 2-3: Version (43)
//! Bytes 4-5: Offset byte size (8)
//! Bytes 6-7: Reserved
//! Bytes 8-15: Offset to first IFD
//! ```

use std::collections::HashSet;

use bytes::Bytes;

use crate::error::TiffError;
use crate::io::RangeReader;

/// Size of a classic TIFF header in bytes
pub const TIFF_HEADER_SIZE: usize = 8;

/// Size of a BigTIFF header in bytes
pub const BIGTIFF_HEADER_SIZE: usize = 16;

/// Upper bound on directories followed, guards against offset loops.
const MAX_DIRECTORIES: usize = 64;

/// Longest `ImageDescription` we bother reading.
const MAX_DESCRIPTION_BYTES: usize = 64 * 1024;

/// Longest `JPEGTables` blob accepted.
const MAX_JPEG_TABLES_BYTES: usize = 64 * 1024;

/// Most entries accepted in a tile offset or byte count array.
const MAX_ARRAY_LEN: u64 = 1 << 24;

const TAG_NEW_SUBFILE_TYPE: u16 = 254;
const TAG_IMAGE_WIDTH: u16 = 256;
const TAG_IMAGE_LENGTH: u16 = 257;
const TAG_BITS_PER_SAMPLE: u16 = 258;
const TAG_COMPRESSION: u16 = 259;
const TAG_PHOTOMETRIC: u16 = 262;
const TAG_IMAGE_DESCRIPTION: u16 = 270;
const TAG_SAMPLES_PER_PIXEL: u16 = 277;
const TAG_PLANAR_CONFIGURATION: u16 = 284;
const TAG_TILE_WIDTH: u16 = 322;
const TAG_TILE_LENGTH: u16 = 323;
const TAG_TILE_OFFSETS: u16 = 324;
const TAG_TILE_BYTE_COUNTS: u16 = 325;
const TAG_JPEG_TABLES: u16 = 347;

/// Compression: none
pub const COMPRESSION_NONE: u16 = 1;

/// Compression: JPEG ("new-style", TIFF 6.0 technote 2)
pub const COMPRESSION_JPEG: u16 = 7;

/// Photometric interpretation: RGB
pub const PHOTOMETRIC_RGB: u16 = 2;

// =============================================================================
// ByteOrder
// =============================================================================

/// Byte order (endianness) declared by the first two header bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// "II"
    LittleEndian,
    /// "MM"
    BigEndian,
}

impl ByteOrder {
    #[inline]
    pub fn read_u16(self, bytes: &[u8]) -> u16 {
        let raw = [bytes[0], bytes[1]];
        match self {
            ByteOrder::LittleEndian => u16::from_le_bytes(raw),
            ByteOrder::BigEndian => u16::from_be_bytes(raw),
        }
    }

    #[inline]
    pub fn read_u32(self, bytes: &[u8]) -> u32 {
        let raw = [bytes[0], bytes[1], bytes[2], bytes[3]];
        match self {
            ByteOrder::LittleEndian => u32::from_le_bytes(raw),
            ByteOrder::BigEndian => u32::from_be_bytes(raw),
        }
    }

    #[inline]
    pub fn read_u64(self, bytes: &[u8]) -> u64 {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes[..8]);
        match self {
            ByteOrder::LittleEndian => u64::from_le_bytes(raw),
            ByteOrder::BigEndian => u64::from_be_bytes(raw),
        }
    }
}

// =============================================================================
// TiffHeader
// =============================================================================

/// Parsed TIFF or BigTIFF header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TiffHeader {
    pub byte_order: ByteOrder,
    pub is_bigtiff: bool,
    pub first_ifd_offset: u64,
}

impl TiffHeader {
    /// Parse a header from the first bytes of a file.
    ///
    /// `bytes` should hold 16 bytes when available so BigTIFF can be read;
    /// 8 are enough for classic TIFF.
    pub fn parse(bytes: &[u8], file_size: u64) -> Result<Self, TiffError> {
        if bytes.len() < TIFF_HEADER_SIZE {
            return Err(TiffError::FileTooSmall {
                required: TIFF_HEADER_SIZE as u64,
                actual: bytes.len() as u64,
            });
        }

        let magic = u16::from_le_bytes([bytes[0], bytes[1]]);
        let byte_order = match magic {
            0x4949 => ByteOrder::LittleEndian,
            0x4D4D => ByteOrder::BigEndian,
            _ => return Err(TiffError::InvalidMagic(magic)),
        };

        let (is_bigtiff, first_ifd_offset) = match byte_order.read_u16(&bytes[2..4]) {
            42 => (false, byte_order.read_u32(&bytes[4..8]) as u64),
            43 => {
                if bytes.len() < BIGTIFF_HEADER_SIZE {
                    return Err(TiffError::FileTooSmall {
                        required: BIGTIFF_HEADER_SIZE as u64,
                        actual: bytes.len() as u64,
                    });
                }
                let offset_size = byte_order.read_u16(&bytes[4..6]);
                if offset_size != 8 {
                    return Err(TiffError::InvalidBigTiffOffsetSize(offset_size));
                }
                (true, byte_order.read_u64(&bytes[8..16]))
            }
            version => return Err(TiffError::InvalidVersion(version)),
        };

        if first_ifd_offset >= file_size {
            return Err(TiffError::InvalidIfdOffset(first_ifd_offset));
        }

        Ok(TiffHeader {
            byte_order,
            is_bigtiff,
            first_ifd_offset,
        })
    }

    /// Width of the entry-count field that opens each IFD.
    const fn count_size(&self) -> usize {
        if self.is_bigtiff {
            8
        } else {
            2
        }
    }

    /// Width of one IFD entry.
    const fn entry_size(&self) -> usize {
        if self.is_bigtiff {
            20
        } else {
            12
        }
    }

    /// Width of offsets (and of the inline value field).
    const fn offset_size(&self) -> usize {
        if self.is_bigtiff {
            8
        } else {
            4
        }
    }
}

/// Quick check for TIFF or BigTIFF magic bytes.
pub fn is_tiff_header(bytes: &[u8]) -> bool {
    if bytes.len() < 4 {
        return false;
    }
    match &bytes[..4] {
        [0x49, 0x49, 42, 0] | [0x49, 0x49, 43, 0] => true,
        [0x4D, 0x4D, 0, 42] | [0x4D, 0x4D, 0, 43] => true,
        _ => false,
    }
}

// =============================================================================
// IFD Entries
// =============================================================================

/// One raw IFD entry. The value field is kept undecoded.
#[derive(Debug, Clone, PartialEq)]
struct IfdEntry {
    tag: u16,
    field_type: u16,
    count: u64,
    value: [u8; 8],
}

impl IfdEntry {
    fn type_size(&self) -> Result<usize, TiffError> {
        match self.field_type {
            1 | 2 | 6 | 7 => Ok(1),
            3 | 8 => Ok(2),
            4 | 9 | 11 | 13 => Ok(4),
            5 | 10 | 12 | 16 | 17 | 18 => Ok(8),
            other => Err(TiffError::UnknownFieldType(other)),
        }
    }

    /// First scalar value of a SHORT, LONG or LONG8 entry.
    fn scalar(&self, order: ByteOrder) -> Option<u64> {
        match self.field_type {
            3 => Some(order.read_u16(&self.value) as u64),
            4 => Some(order.read_u32(&self.value) as u64),
            16 => Some(order.read_u64(&self.value)),
            _ => None,
        }
    }

    /// Offset of an out-of-line value.
    fn value_offset(&self, header: &TiffHeader) -> u64 {
        if header.is_bigtiff {
            header.byte_order.read_u64(&self.value)
        } else {
            header.byte_order.read_u32(&self.value) as u64
        }
    }
}

/// Summary of one image file directory.
#[derive(Debug, Clone, PartialEq)]
pub struct TiffDirectory {
    /// Image width in pixels
    pub width: u32,

    /// Image height in pixels
    pub height: u32,

    /// Whether the image is organized in tiles rather than strips
    pub tiled: bool,

    /// NewSubfileType bit 0 marks reduced-resolution images
    pub reduced: bool,

    /// `ImageDescription` tag, if present
    pub description: Option<String>,

    /// Tile edge lengths, for tiled images
    pub tile_width: Option<u32>,
    pub tile_height: Option<u32>,

    /// Compression scheme (1 = none, 7 = JPEG)
    pub compression: u16,

    /// PhotometricInterpretation, if present
    pub photometric: Option<u16>,

    pub samples_per_pixel: u16,

    /// 1 = chunky (interleaved samples), 2 = planar
    pub planar_configuration: u16,

    bits_per_sample: Option<IfdEntry>,
    tile_offsets: Option<IfdEntry>,
    tile_byte_counts: Option<IfdEntry>,
    jpeg_tables: Option<IfdEntry>,
}

/// Location of every tile of a tiled directory, in row-major order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TileIndex {
    pub offsets: Vec<u64>,
    pub byte_counts: Vec<u64>,

    /// Bits of the first sample (8 for ordinary RGB)
    pub bits_per_sample: u16,

    /// Shared quantization and Huffman tables of abbreviated JPEG tiles
    pub jpeg_tables: Option<Bytes>,
}

/// Tile storage schemes that region reads can decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileCodec {
    /// JPEG tiles; `rgb_components` when stored without a color transform
    Jpeg { rgb_components: bool },

    /// Uncompressed interleaved samples
    Raw { samples: u16 },
}

impl TiffDirectory {
    /// Whether the directory carries tile offsets and byte counts.
    pub fn has_tile_data(&self) -> bool {
        self.tile_offsets.is_some() && self.tile_byte_counts.is_some()
    }

    /// Codec of the directory's tiles, or `None` when unsupported.
    pub fn tile_codec(&self) -> Option<TileCodec> {
        match self.compression {
            COMPRESSION_JPEG => Some(TileCodec::Jpeg {
                rgb_components: self.photometric == Some(PHOTOMETRIC_RGB),
            }),
            COMPRESSION_NONE
                if matches!(self.samples_per_pixel, 1 | 3 | 4)
                    && (self.planar_configuration == 1 || self.samples_per_pixel == 1) =>
            {
                Some(TileCodec::Raw {
                    samples: self.samples_per_pixel,
                })
            }
            _ => None,
        }
    }

    /// Whether region reads can serve this directory straight from its tiles.
    pub fn is_readable_tiled(&self) -> bool {
        self.tiled
            && self.has_tile_data()
            && self.tile_width.is_some_and(|w| w > 0)
            && self.tile_height.is_some_and(|h| h > 0)
            && self.tile_codec().is_some()
    }

    /// Load the tile offset and byte count arrays, bit depth and `JPEGTables`.
    pub async fn read_tile_index<R: RangeReader>(
        &self,
        reader: &R,
        header: &TiffHeader,
    ) -> Result<TileIndex, TiffError> {
        let offsets_entry = self
            .tile_offsets
            .as_ref()
            .ok_or(TiffError::MissingTag("TileOffsets"))?;
        let counts_entry = self
            .tile_byte_counts
            .as_ref()
            .ok_or(TiffError::MissingTag("TileByteCounts"))?;

        let offsets = read_scalars(reader, header, offsets_entry).await?;
        let byte_counts = read_scalars(reader, header, counts_entry).await?;

        // BitsPerSample defaults to 1 when absent
        let bits_per_sample = match self.bits_per_sample.as_ref() {
            Some(entry) => read_scalars(reader, header, entry)
                .await?
                .first()
                .copied()
                .unwrap_or(1) as u16,
            None => 1,
        };

        let jpeg_tables = match self.jpeg_tables.as_ref() {
            Some(entry) => {
                let bytes = read_raw(reader, header, entry, MAX_JPEG_TABLES_BYTES).await?;
                (!bytes.is_empty()).then_some(bytes)
            }
            None => None,
        };

        Ok(TileIndex {
            offsets,
            byte_counts,
            bits_per_sample,
            jpeg_tables,
        })
    }
}

/// All directories of a TIFF file in chain order.
#[derive(Debug, Clone)]
pub struct TiffSummary {
    pub header: TiffHeader,
    pub directories: Vec<TiffDirectory>,
}

impl TiffSummary {
    /// Read the header and walk the whole IFD chain.
    pub async fn read<R: RangeReader>(reader: &R) -> Result<Self, TiffError> {
        let size = reader.size();
        let header_len = (BIGTIFF_HEADER_SIZE as u64).min(size) as usize;
        let header_bytes = reader.read_exact_at(0, header_len).await?;
        let header = TiffHeader::parse(&header_bytes, size)?;

        let mut directories = Vec::new();
        let mut visited = HashSet::new();
        let mut offset = header.first_ifd_offset;

        while offset != 0 && directories.len() < MAX_DIRECTORIES && visited.insert(offset) {
            if offset >= size {
                return Err(TiffError::InvalidIfdOffset(offset));
            }
            let (entries, next) = read_ifd(reader, &header, offset).await?;
            directories.push(summarize(reader, &header, &entries).await?);
            offset = next;
        }

        Ok(Self {
            header,
            directories,
        })
    }

    /// Directories that make up the resolution pyramid.
    ///
    /// Tiled, non-reduced images plus tiled reduced-resolution images; label
    /// and macro images in SVS files are stripped and drop out here.
    pub fn pyramid_directories(&self) -> impl Iterator<Item = &TiffDirectory> {
        self.directories.iter().filter(|d| d.tiled)
    }
}

async fn read_ifd<R: RangeReader>(
    reader: &R,
    header: &TiffHeader,
    offset: u64,
) -> Result<(Vec<IfdEntry>, u64), TiffError> {
    let order = header.byte_order;
    let count_bytes = reader.read_exact_at(offset, header.count_size()).await?;
    let count = if header.is_bigtiff {
        order.read_u64(&count_bytes)
    } else {
        order.read_u16(&count_bytes) as u64
    };

    let body_len = count as usize * header.entry_size() + header.offset_size();
    let body = reader
        .read_exact_at(offset + header.count_size() as u64, body_len)
        .await?;

    let mut entries = Vec::with_capacity(count as usize);
    for chunk in body.chunks_exact(header.entry_size()).take(count as usize) {
        let mut value = [0u8; 8];
        let entry = if header.is_bigtiff {
            value.copy_from_slice(&chunk[12..20]);
            IfdEntry {
                tag: order.read_u16(&chunk[0..2]),
                field_type: order.read_u16(&chunk[2..4]),
                count: order.read_u64(&chunk[4..12]),
                value,
            }
        } else {
            value[..4].copy_from_slice(&chunk[8..12]);
            IfdEntry {
                tag: order.read_u16(&chunk[0..2]),
                field_type: order.read_u16(&chunk[2..4]),
                count: order.read_u32(&chunk[4..8]) as u64,
                value,
            }
        };
        entries.push(entry);
    }

    let next_at = count as usize * header.entry_size();
    let next = if header.is_bigtiff {
        order.read_u64(&body[next_at..])
    } else {
        order.read_u32(&body[next_at..]) as u64
    };

    Ok((entries, next))
}

async fn summarize<R: RangeReader>(
    reader: &R,
    header: &TiffHeader,
    entries: &[IfdEntry],
) -> Result<TiffDirectory, TiffError> {
    let order = header.byte_order;
    let find = |tag: u16| entries.iter().find(|e| e.tag == tag);

    let width = find(TAG_IMAGE_WIDTH)
        .and_then(|e| e.scalar(order))
        .ok_or(TiffError::MissingTag("ImageWidth"))? as u32;
    let height = find(TAG_IMAGE_LENGTH)
        .and_then(|e| e.scalar(order))
        .ok_or(TiffError::MissingTag("ImageLength"))? as u32;
    let reduced = find(TAG_NEW_SUBFILE_TYPE)
        .and_then(|e| e.scalar(order))
        .is_some_and(|v| v & 1 == 1);
    let scalar_u32 = |tag: u16| find(tag).and_then(|e| e.scalar(order)).map(|v| v as u32);
    let scalar_u16 = |tag: u16| find(tag).and_then(|e| e.scalar(order)).map(|v| v as u16);

    let description = match find(TAG_IMAGE_DESCRIPTION) {
        Some(entry) => read_ascii(reader, header, entry).await?,
        None => None,
    };

    Ok(TiffDirectory {
        width,
        height,
        tiled: find(TAG_TILE_WIDTH).is_some(),
        reduced,
        description,
        tile_width: scalar_u32(TAG_TILE_WIDTH),
        tile_height: scalar_u32(TAG_TILE_LENGTH),
        compression: scalar_u16(TAG_COMPRESSION).unwrap_or(COMPRESSION_NONE),
        photometric: scalar_u16(TAG_PHOTOMETRIC),
        samples_per_pixel: scalar_u16(TAG_SAMPLES_PER_PIXEL).unwrap_or(1),
        planar_configuration: scalar_u16(TAG_PLANAR_CONFIGURATION).unwrap_or(1),
        bits_per_sample: find(TAG_BITS_PER_SAMPLE).cloned(),
        tile_offsets: find(TAG_TILE_OFFSETS).cloned(),
        tile_byte_counts: find(TAG_TILE_BYTE_COUNTS).cloned(),
        jpeg_tables: find(TAG_JPEG_TABLES).cloned(),
    })
}

async fn read_ascii<R: RangeReader>(
    reader: &R,
    header: &TiffHeader,
    entry: &IfdEntry,
) -> Result<Option<String>, TiffError> {
    let bytes = read_raw(reader, header, entry, MAX_DESCRIPTION_BYTES).await?;
    if bytes.is_empty() {
        return Ok(None);
    }

    let text = String::from_utf8_lossy(&bytes)
        .trim_end_matches('\0')
        .to_string();
    Ok(Some(text))
}

/// Raw value bytes of an entry, truncated to `max` bytes.
async fn read_raw<R: RangeReader>(
    reader: &R,
    header: &TiffHeader,
    entry: &IfdEntry,
    max: usize,
) -> Result<Bytes, TiffError> {
    let total = (entry.count as usize).saturating_mul(entry.type_size()?);
    let len = total.min(max);
    if len == 0 {
        return Ok(Bytes::new());
    }

    if total <= header.offset_size() {
        Ok(Bytes::copy_from_slice(&entry.value[..len]))
    } else {
        Ok(reader.read_exact_at(entry.value_offset(header), len).await?)
    }
}

/// All values of a SHORT, LONG or LONG8 entry.
async fn read_scalars<R: RangeReader>(
    reader: &R,
    header: &TiffHeader,
    entry: &IfdEntry,
) -> Result<Vec<u64>, TiffError> {
    let width = entry.type_size()?;
    if !matches!(entry.field_type, 3 | 4 | 16) {
        return Err(TiffError::UnknownFieldType(entry.field_type));
    }
    if entry.count > MAX_ARRAY_LEN {
        return Err(TiffError::ArrayTooLong(entry.count));
    }

    let total = entry.count as usize * width;
    let bytes = if total <= header.offset_size() {
        Bytes::copy_from_slice(&entry.value[..total])
    } else {
        reader.read_exact_at(entry.value_offset(header), total).await?
    };

    let order = header.byte_order;
    let values = bytes
        .chunks_exact(width)
        .map(|chunk| match width {
            2 => order.read_u16(chunk) as u64,
            4 => order.read_u32(chunk) as u64,
            _ => order.read_u64(chunk),
        })
        .collect();
    Ok(values)
}

// =============================================================================
// Tests
// =============================================================================

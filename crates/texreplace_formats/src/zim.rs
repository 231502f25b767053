//! ZIM container: 16-byte header followed by raw or zlib-compressed pixels.

use std::io::Read;

use bytemuck::{Pod, Zeroable};
use flate2::read::ZlibDecoder;

use crate::error::{FormatError, Result};
use crate::pixel_format::{check_dimensions, DataFormat};
use crate::record::capacity_hint;
use crate::rgba::{finish_rgba, DecodedRgba};

pub const ZIM_MAGIC: [u8; 4] = *b"ZIMG";

pub const ZIM_RGBA8888: u32 = 0;
pub const ZIM_FORMAT_MASK: u32 = 0x0F;
pub const ZIM_HAS_MIPS: u32 = 0x10;
pub const ZIM_ZLIB_COMPRESSED: u32 = 0x100;
pub const ZIM_ZSTD_COMPRESSED: u32 = 0x1000;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ZimHeader {
    pub magic: [u8; 4],
    pub width: u32,
    pub height: u32,
    pub flags: u32,
}

impl ZimHeader {
    pub const SIZE: usize = std::mem::size_of::<ZimHeader>();

    /// Only RGBA8888 payloads can be used as replacements.
    pub fn is_rgba8888(&self) -> bool {
        self.flags & ZIM_FORMAT_MASK == ZIM_RGBA8888
    }

    /// Magic, pixel layout and dimension checks.
    pub fn validate(&self) -> Result<()> {
        if self.magic != ZIM_MAGIC {
            return Err(FormatError::invalid_header("not a ZIM file"));
        }
        if !self.is_rgba8888() {
            return Err(FormatError::unsupported(format!(
                "ZIM format {} (only RGBA8888)",
                self.flags & ZIM_FORMAT_MASK
            )));
        }
        check_dimensions("ZIM", self.width, self.height)
    }

    /// Bytes of the first level.
    pub fn level_bytes(&self) -> Result<usize> {
        DataFormat::R8G8B8A8Unorm
            .checked_level_size(self.width, self.height)
            .ok_or_else(|| FormatError::invalid_header("ZIM level size overflows"))
    }
}

/// Decode the first level of a ZIM file into a level-sized RGBA buffer.
pub fn decode_zim(data: &[u8], level_width: u32, level_height: u32) -> Result<DecodedRgba> {
    if data.len() < ZimHeader::SIZE {
        return Err(FormatError::ShortRead {
            expected: ZimHeader::SIZE,
            got: data.len(),
        });
    }
    let header: ZimHeader = bytemuck::pod_read_unaligned(&data[..ZimHeader::SIZE]);
    header.validate()?;

    let level_bytes = header.level_bytes()?;
    let payload = &data[ZimHeader::SIZE..];
    let pixels = if header.flags & ZIM_ZSTD_COMPRESSED != 0 {
        return Err(FormatError::unsupported("zstd-compressed ZIM"));
    } else if header.flags & ZIM_ZLIB_COMPRESSED != 0 {
        // Mips follow level 0 in the same stream; only level 0 is needed.
        let mut decoder = ZlibDecoder::new(payload).take(level_bytes as u64);
        let mut out = Vec::with_capacity(capacity_hint(level_bytes));
        decoder.read_to_end(&mut out)?;
        out
    } else {
        payload[..level_bytes.min(payload.len())].to_vec()
    };

    if pixels.len() < level_bytes {
        return Err(FormatError::ShortRead {
            expected: level_bytes,
            got: pixels.len(),
        });
    }

    finish_rgba(
        &pixels,
        header.width,
        header.height,
        level_width,
        level_height,
        true,
    )
}

//! PNG header peek and full decode through the `image` crate.

use bytemuck::{Pod, Zeroable};
use image::ImageFormat;

use crate::error::Result;
use crate::pixel_format::MAX_TEXTURE_DIMENSION;
use crate::rgba::{finish_rgba, DecodedRgba};

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Signature plus the start of the IHDR chunk; enough to learn the size.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct PngHeaderPeek {
    pub signature: [u8; 8],
    pub ihdr_length: [u8; 4],
    pub ihdr_tag: [u8; 4],
    pub width: [u8; 4],
    pub height: [u8; 4],
}

impl PngHeaderPeek {
    pub fn is_valid(&self) -> bool {
        self.signature == PNG_SIGNATURE
            && &self.ihdr_tag == b"IHDR"
            && self.width() > 0
            && self.height() > 0
            && self.width() <= MAX_TEXTURE_DIMENSION
            && self.height() <= MAX_TEXTURE_DIMENSION
    }

    pub fn width(&self) -> u32 {
        u32::from_be_bytes(self.width)
    }

    pub fn height(&self) -> u32 {
        u32::from_be_bytes(self.height)
    }
}

/// Decode a PNG file to RGBA8888 at the expected level size.
pub fn decode_png(data: &[u8], level_width: u32, level_height: u32) -> Result<DecodedRgba> {
    let img = image::load_from_memory_with_format(data, ImageFormat::Png)?;
    let has_alpha = img.color().has_alpha();
    let rgba = img.to_rgba8();

    log::trace!(
        "Decoded PNG {}x{} (alpha channel: {})",
        rgba.width(),
        rgba.height(),
        has_alpha
    );

    finish_rgba(
        rgba.as_raw(),
        rgba.width(),
        rgba.height(),
        level_width,
        level_height,
        has_alpha,
    )
}

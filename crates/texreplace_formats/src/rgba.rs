//! Shared handling for formats that decode to RGBA8888.

use crate::alpha::{check_alpha_rgba8888, AlphaStatus};
use crate::error::{FormatError, Result};

/// One RGBA8888 level, laid out at the expected level size.
#[derive(Debug)]
pub struct DecodedRgba {
    /// `level_width * level_height * 4` bytes
    pub pixels: Vec<u8>,
    /// Width of the image actually stored in the file
    pub width: u32,
    /// Height of the image actually stored in the file
    pub height: u32,
    /// Transparency of the stored rectangle
    pub alpha: AlphaStatus,
}

/// Place a tightly packed `width` x `height` image into a buffer of the
/// expected level size.
///
/// Fails if the image is larger than expected, which means the file changed
/// after its header was peeked.
pub fn pad_into_level(
    image: &[u8],
    width: u32,
    height: u32,
    level_width: u32,
    level_height: u32,
) -> Result<Vec<u8>> {
    if width > level_width || height > level_height {
        return Err(FormatError::SizeChanged {
            width,
            height,
            expected_width: level_width,
            expected_height: level_height,
        });
    }

    let src_pitch = width as usize * 4;
    let dst_pitch = level_width as usize * 4;
    if image.len() < src_pitch * height as usize {
        return Err(FormatError::ShortRead {
            expected: src_pitch * height as usize,
            got: image.len(),
        });
    }

    let mut out = vec![0u8; dst_pitch * level_height as usize];
    if width == level_width {
        out[..src_pitch * height as usize].copy_from_slice(&image[..src_pitch * height as usize]);
    } else {
        for (dst, src) in out
            .chunks_exact_mut(dst_pitch)
            .zip(image.chunks_exact(src_pitch))
            .take(height as usize)
        {
            dst[..src_pitch].copy_from_slice(src);
        }
    }
    Ok(out)
}

/// Pad an image into a level buffer and classify its alpha.
pub fn finish_rgba(
    image: &[u8],
    width: u32,
    height: u32,
    level_width: u32,
    level_height: u32,
    has_alpha_channel: bool,
) -> Result<DecodedRgba> {
    let pixels = pad_into_level(image, width, height, level_width, level_height)?;
    let alpha = if has_alpha_channel {
        check_alpha_rgba8888(&pixels, level_width as usize, width as usize, height as usize)
    } else {
        AlphaStatus::Opaque
    };
    Ok(DecodedRgba {
        pixels,
        width,
        height,
        alpha,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pad_same_width_is_block_copy() {
        let image = vec![7u8; 2 * 2 * 4];
        let out = pad_into_level(&image, 2, 2, 2, 3).unwrap();
        assert_eq!(out.len(), 2 * 3 * 4);
        assert!(out[..16].iter().all(|&b| b == 7));
        assert!(out[16..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_pad_narrow_image_row_copy() {
        let image = vec![9u8; 4 * 4];
        let out = pad_into_level(&image, 1, 4, 2, 4).unwrap();
        for row in out.chunks_exact(8) {
            assert_eq!(&row[..4], &[9, 9, 9, 9]);
            assert_eq!(&row[4..], &[0, 0, 0, 0]);
        }
    }

    #[test]
    fn test_pad_rejects_larger_image() {
        let image = vec![0u8; 4 * 4 * 4];
        assert!(matches!(
            pad_into_level(&image, 4, 4, 2, 2),
            Err(FormatError::SizeChanged { .. })
        ));
    }
}

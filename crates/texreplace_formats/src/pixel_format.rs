//! Pixel formats a replacement level can end up in.

use std::fmt;

use crate::error::{FormatError, Result};

/// Largest width or height a replacement file may declare.
pub const MAX_TEXTURE_DIMENSION: u32 = 32768;

/// Final pixel layout of decoded level data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DataFormat {
    /// Nothing decoded yet
    #[default]
    Undefined,
    /// 8-bit RGBA, 4 bytes per pixel
    R8G8B8A8Unorm,
    /// BC1 (DXT1), 8 bytes per 4x4 block
    Bc1RgbaUnormBlock,
    /// BC2 (DXT3), 16 bytes per 4x4 block
    Bc2UnormBlock,
    /// BC3 (DXT5), 16 bytes per 4x4 block
    Bc3UnormBlock,
    /// BC7, 16 bytes per 4x4 block
    Bc7UnormBlock,
    /// ETC2 RGB (ETC1 compatible), 8 bytes per 4x4 block
    Etc2R8G8B8UnormBlock,
    /// ASTC 4x4, 16 bytes per block
    Astc4x4UnormBlock,
}

impl DataFormat {
    /// Bytes per 4x4 block, or `None` for per-pixel formats.
    pub fn block_size(self) -> Option<usize> {
        match self {
            DataFormat::Bc1RgbaUnormBlock | DataFormat::Etc2R8G8B8UnormBlock => Some(8),
            DataFormat::Bc2UnormBlock
            | DataFormat::Bc3UnormBlock
            | DataFormat::Bc7UnormBlock
            | DataFormat::Astc4x4UnormBlock => Some(16),
            DataFormat::Undefined | DataFormat::R8G8B8A8Unorm => None,
        }
    }

    /// Whether pixels are stored in 4x4 compressed blocks.
    pub fn is_block_compressed(self) -> bool {
        self.block_size().is_some()
    }

    /// Byte size of one level of `width` x `height` in this format.
    ///
    /// Block formats use `ceil4(w) * ceil4(h) * block_size / 16`. Saturates
    /// at `usize::MAX`; use [`checked_level_size`](Self::checked_level_size)
    /// on untrusted dimensions.
    pub fn level_size(self, width: u32, height: u32) -> usize {
        self.checked_level_size(width, height).unwrap_or(usize::MAX)
    }

    /// [`level_size`](Self::level_size), or `None` if it does not fit a `usize`.
    pub fn checked_level_size(self, width: u32, height: u32) -> Option<usize> {
        let (width, height) = (width as usize, height as usize);
        match self.block_size() {
            Some(block) => width
                .div_ceil(4)
                .checked_mul(height.div_ceil(4))?
                .checked_mul(block),
            None if self == DataFormat::R8G8B8A8Unorm => width.checked_mul(height)?.checked_mul(4),
            None => Some(0),
        }
    }
}

impl fmt::Display for DataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataFormat::Undefined => "UNDEFINED",
            DataFormat::R8G8B8A8Unorm => "R8G8B8A8_UNORM",
            DataFormat::Bc1RgbaUnormBlock => "BC1_RGBA_UNORM_BLOCK",
            DataFormat::Bc2UnormBlock => "BC2_UNORM_BLOCK",
            DataFormat::Bc3UnormBlock => "BC3_UNORM_BLOCK",
            DataFormat::Bc7UnormBlock => "BC7_UNORM_BLOCK",
            DataFormat::Etc2R8G8B8UnormBlock => "ETC2_R8G8B8_UNORM_BLOCK",
            DataFormat::Astc4x4UnormBlock => "ASTC_4x4_UNORM_BLOCK",
        };
        f.write_str(name)
    }
}

/// Reject dimensions no replacement container may declare.
pub fn check_dimensions(kind: &str, width: u32, height: u32) -> Result<()> {
    if width == 0 || height == 0 || width > MAX_TEXTURE_DIMENSION || height > MAX_TEXTURE_DIMENSION
    {
        return Err(FormatError::invalid_header(format!(
            "{} dimensions {}x{} out of range",
            kind, width, height
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_sizes() {
        assert_eq!(DataFormat::Bc1RgbaUnormBlock.block_size(), Some(8));
        assert_eq!(DataFormat::Bc3UnormBlock.block_size(), Some(16));
        assert_eq!(DataFormat::R8G8B8A8Unorm.block_size(), None);
        assert!(!DataFormat::R8G8B8A8Unorm.is_block_compressed());
    }

    #[test]
    fn test_level_size_rounds_to_blocks() {
        // 5x3 rounds up to 8x4 → 2x1 blocks of 8 bytes
        assert_eq!(DataFormat::Bc1RgbaUnormBlock.level_size(5, 3), 16);
        assert_eq!(DataFormat::Bc7UnormBlock.level_size(1, 1), 16);
        assert_eq!(DataFormat::R8G8B8A8Unorm.level_size(5, 3), 60);
        assert_eq!(DataFormat::Undefined.level_size(5, 3), 0);
    }

    #[test]
    fn test_level_size_never_overflows() {
        assert_eq!(DataFormat::Bc1RgbaUnormBlock.level_size(u32::MAX, 4), 0x4000_0000 * 8);
        assert_eq!(
            DataFormat::Bc7UnormBlock.checked_level_size(u32::MAX, u32::MAX),
            None
        );
        assert_eq!(DataFormat::Bc7UnormBlock.level_size(u32::MAX, u32::MAX), usize::MAX);
    }

    #[test]
    fn test_check_dimensions() {
        assert!(check_dimensions("DDS", 1, MAX_TEXTURE_DIMENSION).is_ok());
        assert!(check_dimensions("DDS", 0, 4).is_err());
        assert!(matches!(
            check_dimensions("ZIM", u32::MAX, 4),
            Err(FormatError::InvalidHeader { .. })
        ));
    }
}

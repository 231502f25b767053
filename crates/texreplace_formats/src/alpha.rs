//! Alpha classification of decoded RGBA data.

/// What is known about a texture's transparency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlphaStatus {
    /// Not computed (compressed payloads)
    #[default]
    Unknown,
    /// Every pixel has alpha 0xFF
    Opaque,
    /// At least one pixel is not fully opaque
    Transparent,
}

/// Scan a `width` x `height` rectangle of RGBA8888 pixels.
///
/// `stride` is the row length of `pixels` in pixels; only the rectangle is
/// inspected, padding beyond `width` is ignored.
pub fn check_alpha_rgba8888(
    pixels: &[u8],
    stride: usize,
    width: usize,
    height: usize,
) -> AlphaStatus {
    for row in pixels.chunks(stride * 4).take(height) {
        let row = &row[..(width * 4).min(row.len())];
        if row.chunks_exact(4).any(|px| px[3] != 0xFF) {
            return AlphaStatus::Transparent;
        }
    }
    AlphaStatus::Opaque
}

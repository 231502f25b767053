//! Input bundle for a decode attempt.

use std::sync::Arc;

use texreplace_formats::FormatSupport;

use super::level_cache::ReplacedLevelsCache;

/// Candidate files, target sizes and GPU capabilities for one texture.
///
/// `filenames[i]` is the file for mip level `i`; an empty name ends the
/// chain. `w`/`h` are the texture's own size and `new_w`/`new_h` the size the
/// replacement files were authored at, so file dimensions are scaled by
/// `w / new_w` before use.
#[derive(Debug, Clone)]
pub struct ReplacementDesc {
    pub filenames: Vec<String>,
    pub w: u32,
    pub h: u32,
    pub new_w: u32,
    pub new_h: u32,
    pub format_support: FormatSupport,
    /// Texture identity for diagnostics
    pub log_id: String,
    /// Decoded bytes, shared with textures of the same content
    pub cache: Arc<ReplacedLevelsCache>,
}

impl ReplacementDesc {
    /// Descriptor without rescaling.
    pub fn new(
        filenames: Vec<String>,
        format_support: FormatSupport,
        log_id: impl Into<String>,
        cache: Arc<ReplacedLevelsCache>,
    ) -> Self {
        Self {
            filenames,
            w: 1,
            h: 1,
            new_w: 1,
            new_h: 1,
            format_support,
            log_id: log_id.into(),
            cache,
        }
    }

    /// Set the texture size and the authored replacement size.
    pub fn with_scaled_size(mut self, w: u32, h: u32, new_w: u32, new_h: u32) -> Self {
        self.w = w;
        self.h = h;
        self.new_w = new_w;
        self.new_h = new_h;
        self
    }

    /// Map a file's dimensions to texture dimensions.
    ///
    /// `None` when the ratio does not divide evenly, or is degenerate.
    pub fn rescale(&self, file_w: u32, file_h: u32) -> Option<(u32, u32)> {
        Some((
            scale_exact(file_w, self.w, self.new_w)?,
            scale_exact(file_h, self.h, self.new_h)?,
        ))
    }

    /// Same as [`rescale`](Self::rescale) but truncating instead of failing.
    pub fn rescale_truncating(&self, file_w: u32, file_h: u32) -> (u32, u32) {
        (
            scale_truncating(file_w, self.w, self.new_w),
            scale_truncating(file_h, self.h, self.new_h),
        )
    }
}

fn scale_exact(value: u32, num: u32, den: u32) -> Option<u32> {
    if den == 0 {
        return None;
    }
    let scaled = value as u64 * num as u64;
    if scaled % den as u64 != 0 {
        return None;
    }
    u32::try_from(scaled / den as u64).ok()
}

fn scale_truncating(value: u32, num: u32, den: u32) -> u32 {
    if den == 0 {
        return value;
    }
    u32::try_from(value as u64 * num as u64 / den as u64).unwrap_or(u32::MAX)
}

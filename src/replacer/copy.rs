//! Readback of decoded level bytes into caller buffers.

use rayon::prelude::*;
use texreplace_formats::DataFormat;

use super::level_cache::LevelData;
use super::texture::ReplacedTextureLevel;
use crate::constants::MIN_LINES_PER_THREAD;

/// Chunk size for parallel contiguous copies.
const COPY_CHUNK_BYTES: usize = 64 * 1024;

/// Copy one level out of the cache.
///
/// Every check happens before the first byte is written, so a `false`
/// return leaves `out` untouched.
pub(crate) fn copy_level_to(
    cache: &LevelData,
    level: usize,
    info: &ReplacedTextureLevel,
    fmt: DataFormat,
    out: &mut [u8],
    row_pitch: usize,
    parallel_min_bytes: usize,
) -> bool {
    let Some(data) = cache.level(level) else {
        log::warn!("Level {} is empty", level);
        return false;
    };
    let parallel = data.len() >= parallel_min_bytes;

    if fmt != DataFormat::R8G8B8A8Unorm {
        if out.len() < data.len() {
            log::error!(
                "Replacement output buffer too small: {} < {} (level {})",
                out.len(),
                data.len(),
                level
            );
            return false;
        }
        copy_contiguous(&mut out[..data.len()], data, parallel);
        return true;
    }

    let packed_pitch = info.w as usize * 4;
    let rows = info.h as usize;
    if row_pitch < packed_pitch {
        log::error!(
            "Replacement rowPitch={}, but w={} (level={})",
            row_pitch,
            packed_pitch,
            level
        );
        return false;
    }
    if data.len() != packed_pitch * rows {
        log::error!(
            "Replacement level {} has {} bytes, expected {}",
            level,
            data.len(),
            packed_pitch * rows
        );
        return false;
    }
    let needed = if rows == 0 {
        0
    } else {
        row_pitch * (rows - 1) + packed_pitch
    };
    if out.len() < needed {
        log::error!(
            "Replacement output buffer too small: {} < {} (level {})",
            out.len(),
            needed,
            level
        );
        return false;
    }

    if row_pitch == packed_pitch {
        copy_contiguous(&mut out[..data.len()], data, parallel);
    } else if parallel {
        out.par_chunks_mut(row_pitch)
            .zip(data.par_chunks(packed_pitch))
            .with_min_len(MIN_LINES_PER_THREAD)
            .for_each(|(dst, src)| dst[..packed_pitch].copy_from_slice(src));
    } else {
        for (dst, src) in out
            .chunks_mut(row_pitch)
            .zip(data.chunks_exact(packed_pitch))
        {
            dst[..packed_pitch].copy_from_slice(src);
        }
    }
    true
}

fn copy_contiguous(dst: &mut [u8], src: &[u8], parallel: bool) {
    if parallel {
        dst.par_chunks_mut(COPY_CHUNK_BYTES)
            .zip(src.par_chunks(COPY_CHUNK_BYTES))
            .for_each(|(d, s)| d.copy_from_slice(s));
    } else {
        dst.copy_from_slice(src);
    }
}

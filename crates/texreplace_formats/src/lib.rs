//! Replacement image formats.
//!
//! Everything here works on plain `Read + Seek` streams or byte slices:
//! - format sniffing from the four magic bytes
//! - fixed-layout header records for PNG, ZIM, DDS (+DX10) and KTX2
//! - per-format level decoding into RGBA8888 or block-compressed bytes
//! - alpha classification and GPU format selection
//! - KTX2 transcoding through libktx, loaded at runtime when installed

pub mod alpha;
pub mod dds;
pub mod error;
pub mod ktx2;
pub mod libktx;
pub mod magic;
pub mod pixel_format;
pub mod png;
pub mod record;
pub mod rgba;
pub mod support;
pub mod zim;

pub use alpha::{check_alpha_rgba8888, AlphaStatus};
pub use error::{FormatError, Result};
pub use ktx2::{BasisPayload, BasisTranscoder, Ktx2File, Ktx2LevelInfo, TranscodeTarget};
pub use magic::{identify, identify_magic, Identified, ReplacedImageType};
pub use pixel_format::{check_dimensions, DataFormat, MAX_TEXTURE_DIMENSION};
pub use rgba::DecodedRgba;
pub use support::FormatSupport;

use std::sync::{Arc, OnceLock};

/// The libktx transcoder, if the library can be loaded on this host.
///
/// The lookup runs once per process; later calls share the result.
pub fn default_transcoder() -> Option<Arc<dyn BasisTranscoder>> {
    static DEFAULT: OnceLock<Option<Arc<dyn BasisTranscoder>>> = OnceLock::new();
    DEFAULT
        .get_or_init(|| match libktx::LibKtxTranscoder::load() {
            Ok(transcoder) => Some(Arc::new(transcoder) as Arc<dyn BasisTranscoder>),
            Err(e) => {
                log::info!("KTX2 transcoding unavailable: {}", e);
                None
            }
        })
        .clone()
}

//! GPU block-compression capability flags.

use serde::{Deserialize, Serialize};

/// Which compressed texture families the target GPU can sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FormatSupport {
    /// BC1, BC2 and BC3 (DXT1/3/5)
    #[serde(default)]
    pub bc123: bool,
    /// BC7
    #[serde(default)]
    pub bc7: bool,
    /// ETC2 (and therefore ETC1)
    #[serde(default)]
    pub etc2: bool,
    /// ASTC 4x4
    #[serde(default)]
    pub astc: bool,
}

impl FormatSupport {
    /// No compressed formats; everything falls back to RGBA8888.
    pub fn none() -> Self {
        Self::default()
    }

    /// Typical desktop GPU: BC formats only.
    pub fn desktop() -> Self {
        Self {
            bc123: true,
            bc7: true,
            etc2: false,
            astc: false,
        }
    }
}

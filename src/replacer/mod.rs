//! Replacement texture loading: descriptor intake, background decode,
//! readiness polling, shared level cache and readback.

mod copy;
mod descriptor;
mod level_cache;
mod loader;
mod texture;

pub use descriptor::ReplacementDesc;
pub use level_cache::{LevelCacheRegistry, LevelData, ReplacedLevelsCache, ReplacementCacheKey};
pub use texture::{
    ReplacedTexture, ReplacedTextureLevel, ReplacementState, ReplacerContext,
};

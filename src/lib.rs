//! Asynchronous, budgeted loading of replacement textures.
//!
//! A [`ReplacedTexture`] finds replacement image files through a
//! [`VfsBackend`], decodes them on a [`TaskExecutor`] and hands out the
//! decoded mip levels once they are ready. Callers poll with a time budget
//! instead of blocking, and textures with the same content share decoded
//! bytes through a [`ReplacedLevelsCache`].

pub mod config;
pub mod constants;
pub mod error;
pub mod replacer;
pub mod task;
pub mod vfs;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::{ConfigError, LogLevel, ReplacerConfig};
pub use error::{ReplacerError, Result};
pub use replacer::{
    LevelCacheRegistry, ReplacedLevelsCache, ReplacedTexture, ReplacedTextureLevel,
    ReplacementCacheKey, ReplacementDesc, ReplacementState, ReplacerContext,
};
pub use task::{DecoderPool, TaskExecutor, TaskHandle, ThreadPerTaskExecutor};
pub use texreplace_formats::{AlphaStatus, BasisTranscoder, DataFormat, FormatSupport};
pub use vfs::{DirectoryVfs, FileReference, OpenFile, VfsBackend, ZipVfs};

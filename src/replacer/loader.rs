//! One decode attempt: walk the candidate files and fill the level cache.
//!
//! Runs on a decode worker with the shared cache entry locked. Failures are
//! logged and only shorten the level list.

use std::io::{Seek, SeekFrom};

use texreplace_formats::dds::{self, DdsHeader, DdsHeaderDx10, DdsInfo};
use texreplace_formats::ktx2::{self, Ktx2Header};
use texreplace_formats::png::{self, PngHeaderPeek};
use texreplace_formats::record::{read_record, read_to_vec};
use texreplace_formats::zim::{self, ZimHeader};
use texreplace_formats::{
    identify, AlphaStatus, BasisTranscoder, DataFormat, DecodedRgba, FormatError, Identified,
    Ktx2File, ReplacedImageType, TranscodeTarget,
};

use super::descriptor::ReplacementDesc;
use super::level_cache::LevelData;
use super::texture::ReplacedTextureLevel;
use crate::constants::MAX_REPLACEMENT_MIP_LEVELS;
use crate::vfs::{FileReference, OpenFile, VfsBackend};

/// How a single level load ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoadLevelResult {
    /// No more levels will come from further files
    Done,
    /// One file per level; try the next filename
    Continue,
    /// Stop here, keeping levels from earlier files
    LoadError,
}

/// What a decode attempt produced.
#[derive(Debug)]
pub(crate) struct LoadOutcome {
    pub levels: Vec<ReplacedTextureLevel>,
    pub fmt: DataFormat,
    pub alpha: AlphaStatus,
    pub result: LoadLevelResult,
    pub cancelled: bool,
}

/// Header fields learned before any pixel data is read.
#[derive(Debug, Clone, Copy)]
struct PeekedHeader {
    width: u32,
    height: u32,
    num_mips: u32,
    pixel_format: DataFormat,
    dds: Option<DdsInfo>,
}

struct LevelLoader<'a> {
    vfs: &'a dyn VfsBackend,
    transcoder: Option<&'a dyn BasisTranscoder>,
    desc: &'a ReplacementDesc,
    cache: &'a mut LevelData,
    levels: Vec<ReplacedTextureLevel>,
    alpha: AlphaStatus,
    reused_cache: bool,
}

/// Load every available level of `desc` into `cache`.
pub(crate) fn load_levels(
    vfs: &dyn VfsBackend,
    transcoder: Option<&dyn BasisTranscoder>,
    desc: &ReplacementDesc,
    cache: &mut LevelData,
    is_cancelled: &dyn Fn() -> bool,
) -> LoadOutcome {
    let mut loader = LevelLoader {
        vfs,
        transcoder,
        desc,
        cache,
        levels: Vec::new(),
        alpha: AlphaStatus::Unknown,
        reused_cache: false,
    };

    let mut fmt = DataFormat::Undefined;
    let mut cancelled = false;
    let mut result = if desc.filenames.is_empty() {
        LoadLevelResult::Done
    } else {
        LoadLevelResult::LoadError
    };

    for (i, name) in desc
        .filenames
        .iter()
        .enumerate()
        .take(MAX_REPLACEMENT_MIP_LEVELS)
    {
        if is_cancelled() {
            log::debug!("{}: replacement load cancelled before level {}", desc.log_id, i);
            cancelled = true;
            break;
        }
        if name.is_empty() {
            break;
        }
        let Some(file_ref) = vfs.get_file(name) else {
            result = LoadLevelResult::Done;
            break;
        };

        let (level_result, pixel_format) = loader.load_level(file_ref, name, i);
        result = level_result;
        match level_result {
            LoadLevelResult::LoadError => break,
            _ if i == 0 => fmt = pixel_format,
            _ if loader.levels.len() > i && fmt != pixel_format => {
                log::error!(
                    "{}: replacement mipmap {} doesn't have the same pixel format as \
                     mipmap 0. Stopping.",
                    desc.log_id,
                    i
                );
                loader.discard_level(i);
                break;
            }
            _ => {}
        }
        if level_result == LoadLevelResult::Done {
            break;
        }
    }

    if loader.levels.is_empty() {
        if result == LoadLevelResult::LoadError && !cancelled {
            log::warn!("Failed to load replacement texture '{}'", desc.log_id);
        }
        fmt = DataFormat::Undefined;
    } else if !loader.reused_cache {
        loader.cache.fmt = fmt;
        loader.cache.alpha = loader.alpha;
    }

    LoadOutcome {
        levels: loader.levels,
        fmt,
        alpha: loader.alpha,
        result,
        cancelled,
    }
}

impl LevelLoader<'_> {
    /// Load level `mip_level` from `file_ref`.
    ///
    /// The first level record produced from this file keeps the reference;
    /// if none does it goes straight back to the filesystem.
    fn load_level(
        &mut self,
        file_ref: FileReference,
        name: &str,
        mip_level: usize,
    ) -> (LoadLevelResult, DataFormat) {
        let first_new = self.levels.len();
        let outcome = self.load_level_from(&file_ref, name, mip_level);
        match self.levels.get_mut(first_new) {
            Some(level) => level.file_ref = Some(file_ref),
            None => self.vfs.release_file(file_ref),
        }
        outcome
    }

    /// Drop the records (and bytes) from `mip_level` on.
    fn discard_level(&mut self, mip_level: usize) {
        let start = mip_level.min(self.levels.len());
        for level in self.levels.drain(start..) {
            if let Some(file_ref) = level.file_ref {
                self.vfs.release_file(file_ref);
            }
        }
        if let Some(bytes) = self.cache.data.get_mut(mip_level) {
            bytes.clear();
        }
    }

    fn load_level_from(
        &mut self,
        file_ref: &FileReference,
        name: &str,
        mip_level: usize,
    ) -> (LoadLevelResult, DataFormat) {
        let mut file = match self.vfs.open_file_for_read(file_ref) {
            Ok(file) => file,
            Err(e) => {
                log::debug!("{}: could not open '{}': {}", self.desc.log_id, name, e);
                return (LoadLevelResult::Done, DataFormat::Undefined);
            }
        };

        let identified = identify(&mut file);
        let header = match self.peek_header(&mut file, &identified) {
            Ok(header) => header,
            Err(FormatError::UnknownMagic { magic }) => {
                log::error!(
                    "Could not load texture replacement info: {} - unsupported format {}",
                    name,
                    magic
                );
                return (LoadLevelResult::LoadError, DataFormat::Undefined);
            }
            Err(e) => {
                log::warn!(
                    "{}: replacement '{}' rejected: {}",
                    self.desc.log_id,
                    name,
                    e
                );
                return (LoadLevelResult::LoadError, DataFormat::Undefined);
            }
        };

        if self.cache.has_level(mip_level) {
            return self.reuse_cached(&header, mip_level);
        }

        let Some((level_w, level_h)) = self.level_size(&header, mip_level) else {
            return (LoadLevelResult::LoadError, header.pixel_format);
        };

        if let Err(e) = file.rewind() {
            log::warn!("{}: failed to rewind '{}': {}", self.desc.log_id, name, e);
            return (LoadLevelResult::LoadError, header.pixel_format);
        }

        let loaded = match identified.image_type {
            ReplacedImageType::Ktx2 => self.load_ktx2(&mut file, mip_level),
            ReplacedImageType::Dds => {
                self.load_dds(&mut file, &header, mip_level, level_w, level_h)
            }
            ReplacedImageType::Zim => {
                self.load_rgba(&mut file, mip_level, level_w, level_h, zim::decode_zim)
            }
            ReplacedImageType::Png => {
                self.load_rgba(&mut file, mip_level, level_w, level_h, png::decode_png)
            }
            other => Err(FormatError::unsupported(format!(
                "don't know how to load image type {:?}",
                other
            ))),
        };

        match loaded {
            Ok(result) => result,
            Err(e) => {
                log::error!("Could not load texture replacement: {} - {}", name, e);
                (LoadLevelResult::LoadError, header.pixel_format)
            }
        }
    }

    fn peek_header(
        &self,
        file: &mut OpenFile,
        identified: &Identified,
    ) -> texreplace_formats::Result<PeekedHeader> {
        match identified.image_type {
            ReplacedImageType::Ktx2 => {
                let header: Ktx2Header = read_record(file)?;
                header.validate()?;
                Ok(PeekedHeader {
                    width: header.pixel_width,
                    height: header.pixel_height,
                    num_mips: header.num_levels(),
                    pixel_format: DataFormat::Undefined,
                    dds: None,
                })
            }
            ReplacedImageType::Basis => Err(FormatError::BasisUnsupported),
            ReplacedImageType::Dds => {
                let info = dds::read_dds_info(file, &self.desc.format_support)?;
                Ok(PeekedHeader {
                    width: info.width(),
                    height: info.height(),
                    num_mips: info.num_mips(),
                    pixel_format: info.format,
                    dds: Some(info),
                })
            }
            ReplacedImageType::Zim => {
                let header: ZimHeader = read_record(file)?;
                header.validate()?;
                Ok(PeekedHeader {
                    width: header.width,
                    height: header.height,
                    num_mips: 1,
                    pixel_format: DataFormat::R8G8B8A8Unorm,
                    dds: None,
                })
            }
            ReplacedImageType::Png => {
                let peek: PngHeaderPeek = read_record(file)?;
                if !peek.is_valid() {
                    return Err(FormatError::invalid_header("could not get PNG dimensions"));
                }
                Ok(PeekedHeader {
                    width: peek.width(),
                    height: peek.height(),
                    num_mips: 1,
                    pixel_format: DataFormat::R8G8B8A8Unorm,
                    dds: None,
                })
            }
            ReplacedImageType::Invalid => Err(FormatError::UnknownMagic {
                magic: identified.magic.clone(),
            }),
        }
    }

    /// Another texture already decoded this level: share its bytes.
    fn reuse_cached(
        &mut self,
        header: &PeekedHeader,
        mip_level: usize,
    ) -> (LoadLevelResult, DataFormat) {
        let (mut w, mut h) = match self.levels.first() {
            Some(base) => ((base.w >> mip_level).max(1), (base.h >> mip_level).max(1)),
            None => self.desc.rescale_truncating(header.width, header.height),
        };
        let mut level = mip_level;
        while level < MAX_REPLACEMENT_MIP_LEVELS && self.cache.has_level(level) {
            self.levels.push(ReplacedTextureLevel::new(w, h));
            w = (w / 2).max(1);
            h = (h / 2).max(1);
            level += 1;
        }
        self.alpha = self.cache.alpha;
        self.reused_cache = true;
        log::debug!(
            "{}: reusing {} cached level(s) from mipmap {}",
            self.desc.log_id,
            level - mip_level,
            mip_level
        );
        (LoadLevelResult::Done, self.cache.fmt)
    }

    /// Texture-space size of `mip_level`, checked against mip 0.
    fn level_size(&self, header: &PeekedHeader, mip_level: usize) -> Option<(u32, u32)> {
        if mip_level == 0 {
            return Some(self.desc.rescale_truncating(header.width, header.height));
        }

        let Some((w, h)) = self.desc.rescale(header.width, header.height) else {
            log::warn!(
                "{}: replacement mipmap {} size {}x{} does not scale evenly",
                self.desc.log_id,
                mip_level,
                header.width,
                header.height
            );
            return None;
        };
        let (expected_w, expected_h) = match self.levels.first() {
            Some(base) => (base.w >> mip_level, base.h >> mip_level),
            None => return None,
        };
        if w != expected_w || h != expected_h {
            log::warn!(
                "Replacement mipmap invalid: size={}x{}, expected={}x{} (level {})",
                w,
                h,
                expected_w,
                expected_h,
                mip_level
            );
            return None;
        }
        Some((w, h))
    }

    fn load_ktx2(
        &mut self,
        file: &mut OpenFile,
        mip_level: usize,
    ) -> texreplace_formats::Result<(LoadLevelResult, DataFormat)> {
        let size = usize::try_from(file.size()).unwrap_or(usize::MAX);
        let buffer = read_to_vec(file, size)?;
        let ktx2 = Ktx2File::parse(&buffer)?;
        let Some(payload) = ktx2.payload() else {
            return Err(FormatError::unsupported(
                "only basis ETC1S/UASTC content is supported in KTX2",
            ));
        };
        let Some(transcoder) = self.transcoder else {
            return Err(FormatError::Transcode(
                "no universal texture transcoder configured".to_string(),
            ));
        };

        let (mut target, alpha) = ktx2::select_target(payload, &self.desc.format_support);
        if !transcoder.supports_target(target) {
            log::debug!(
                "{}: transcoder cannot produce {:?}, using RGBA",
                self.desc.log_id,
                target
            );
            target = TranscodeTarget::Rgba32;
        }
        let pixel_format = target.data_format();
        self.alpha = alpha;

        let max_levels = (MAX_REPLACEMENT_MIP_LEVELS - mip_level) as u32;
        let count = ktx2.num_levels().min(max_levels);
        let log_id = &self.desc.log_id;
        let cache = &mut *self.cache;
        let levels = &mut self.levels;
        let mut store = |i: u32, bytes: Vec<u8>| {
            let Some(info) = ktx2.level_info(i) else {
                return;
            };
            *cache.level_mut(mip_level + i as usize) = bytes;
            levels.push(ReplacedTextureLevel::new(info.orig_width, info.orig_height));
        };
        let transcoded = transcoder.transcode_levels(&ktx2, count, target, &mut store);
        if let Err(e) = transcoded {
            log::warn!("{}: KTX2 transcode stopped early: {}", log_id, e);
        }

        if self.levels.len() <= mip_level {
            return Ok((LoadLevelResult::LoadError, pixel_format));
        }
        Ok((LoadLevelResult::Done, pixel_format))
    }

    fn load_dds(
        &mut self,
        file: &mut OpenFile,
        header: &PeekedHeader,
        mip_level: usize,
        level_w: u32,
        level_h: u32,
    ) -> texreplace_formats::Result<(LoadLevelResult, DataFormat)> {
        let Some(info) = header.dds else {
            return Err(FormatError::invalid_header("DDS header missing"));
        };
        self.alpha = AlphaStatus::Unknown;

        let mut data_start = std::mem::size_of::<DdsHeader>();
        if info.dx10.is_some() {
            data_start += std::mem::size_of::<DdsHeaderDx10>();
        }
        file.seek(SeekFrom::Start(data_start as u64))?;

        let max_levels = (MAX_REPLACEMENT_MIP_LEVELS - mip_level) as u32;
        let (mut w, mut h) = (level_w, level_h);
        let mut loaded = 0usize;
        for i in 0..info.num_mips().min(max_levels) {
            match dds::read_dds_level(file, info.format, w, h) {
                Ok(bytes) => {
                    *self.cache.level_mut(mip_level + i as usize) = bytes;
                    self.levels.push(ReplacedTextureLevel::new(w, h));
                    loaded += 1;
                }
                Err(e) => {
                    log::warn!("DDS: level {} truncated: {}", i, e);
                    break;
                }
            }
            w = (w / 2).max(1);
            h = (h / 2).max(1);
        }

        if loaded == 0 {
            return Ok((LoadLevelResult::LoadError, info.format));
        }
        Ok((LoadLevelResult::Done, info.format))
    }

    fn load_rgba(
        &mut self,
        file: &mut OpenFile,
        mip_level: usize,
        level_w: u32,
        level_h: u32,
        decode: fn(&[u8], u32, u32) -> texreplace_formats::Result<DecodedRgba>,
    ) -> texreplace_formats::Result<(LoadLevelResult, DataFormat)> {
        let size = file.size() as usize;
        let bytes = read_to_vec(file, size)?;
        let decoded = decode(&bytes, level_w, level_h)?;

        // Only mip 0 decides the texture's alpha, unless a mip is transparent.
        if mip_level == 0 || decoded.alpha == AlphaStatus::Transparent {
            self.alpha = decoded.alpha;
        }
        *self.cache.level_mut(mip_level) = decoded.pixels;
        self.levels.push(ReplacedTextureLevel::new(level_w, level_h));
        Ok((LoadLevelResult::Continue, DataFormat::R8G8B8A8Unorm))
    }
}

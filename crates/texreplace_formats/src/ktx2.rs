//! KTX2 container with Basis Universal payloads (ETC1S or UASTC).
//!
//! Header, level index and data format descriptor are parsed here. The
//! actual transcoding is done by a [`BasisTranscoder`] supplied by the host.

use bytemuck::{Pod, Zeroable};

use crate::alpha::AlphaStatus;
use crate::error::{FormatError, Result};
use crate::pixel_format::{check_dimensions, DataFormat};
use crate::support::FormatSupport;

pub const KTX2_IDENTIFIER: [u8; 12] = [
    0xAB, 0x4B, 0x54, 0x58, 0x20, 0x32, 0x30, 0xBB, 0x0D, 0x0A, 0x1A, 0x0A,
];

/// `supercompressionScheme` value for BasisLZ (ETC1S payloads).
pub const SUPERCOMPRESSION_BASIS_LZ: u32 = 1;

/// DFD color models used by Basis Universal.
pub const KHR_DF_MODEL_ETC1S: u8 = 163;
pub const KHR_DF_MODEL_UASTC: u8 = 166;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct Ktx2Header {
    pub identifier: [u8; 12],
    pub vk_format: u32,
    pub type_size: u32,
    pub pixel_width: u32,
    pub pixel_height: u32,
    pub pixel_depth: u32,
    pub layer_count: u32,
    pub face_count: u32,
    pub level_count: u32,
    pub supercompression_scheme: u32,
    pub dfd_byte_offset: u32,
    pub dfd_byte_length: u32,
    pub kvd_byte_offset: u32,
    pub kvd_byte_length: u32,
    pub sgd_byte_offset: u64,
    pub sgd_byte_length: u64,
}

impl Ktx2Header {
    pub const SIZE: usize = std::mem::size_of::<Ktx2Header>();

    /// Full identifier check plus the restrictions replacements rely on.
    pub fn validate(&self) -> Result<()> {
        if self.identifier != KTX2_IDENTIFIER {
            return Err(FormatError::invalid_header("bad KTX2 identifier"));
        }
        if self.layer_count > 1 {
            return Err(FormatError::unsupported(format!(
                "KTX2 array textures ({} layers)",
                self.layer_count
            )));
        }
        check_dimensions("KTX2", self.pixel_width, self.pixel_height)
    }

    /// Level count; zero means "generate mips" and holds one stored level.
    pub fn num_levels(&self) -> u32 {
        self.level_count.max(1)
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct Ktx2LevelIndex {
    pub byte_offset: u64,
    pub byte_length: u64,
    pub uncompressed_byte_length: u64,
}

/// Which Basis Universal codec the payload uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BasisPayload {
    Etc1s,
    Uastc,
}

/// Output formats the transcoder can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscodeTarget {
    Bc1,
    Etc1Rgb,
    Bc7Rgba,
    Astc4x4Rgba,
    Rgba32,
}

impl TranscodeTarget {
    pub fn data_format(self) -> DataFormat {
        match self {
            TranscodeTarget::Bc1 => DataFormat::Bc1RgbaUnormBlock,
            TranscodeTarget::Etc1Rgb => DataFormat::Etc2R8G8B8UnormBlock,
            TranscodeTarget::Bc7Rgba => DataFormat::Bc7UnormBlock,
            TranscodeTarget::Astc4x4Rgba => DataFormat::Astc4x4UnormBlock,
            TranscodeTarget::Rgba32 => DataFormat::R8G8B8A8Unorm,
        }
    }
}

/// Pick the best output format the GPU can sample.
///
/// ETC1S has no alpha, so it is always opaque. UASTC alpha is not inspected.
pub fn select_target(
    payload: BasisPayload,
    support: &FormatSupport,
) -> (TranscodeTarget, AlphaStatus) {
    let target = match payload {
        BasisPayload::Etc1s if support.bc123 => TranscodeTarget::Bc1,
        BasisPayload::Etc1s if support.etc2 => TranscodeTarget::Etc1Rgb,
        BasisPayload::Uastc if support.bc7 => TranscodeTarget::Bc7Rgba,
        BasisPayload::Uastc if support.astc => TranscodeTarget::Astc4x4Rgba,
        _ => {
            log::warn!("Replacement texture format not supported - transcoding to RGBA8888");
            TranscodeTarget::Rgba32
        }
    };
    let alpha = match payload {
        BasisPayload::Etc1s => AlphaStatus::Opaque,
        BasisPayload::Uastc => AlphaStatus::Unknown,
    };
    (target, alpha)
}

/// Size information for one level, in pixels and 4x4 blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ktx2LevelInfo {
    pub orig_width: u32,
    pub orig_height: u32,
    pub num_blocks_x: u32,
    pub num_blocks_y: u32,
}

impl Ktx2LevelInfo {
    pub fn total_blocks(&self) -> u32 {
        self.num_blocks_x * self.num_blocks_y
    }

    /// Output buffer size and row pitch (in blocks or pixels) for a target.
    pub fn output_layout(&self, target: TranscodeTarget) -> (usize, u32) {
        match target.data_format().block_size() {
            Some(block) => (self.total_blocks() as usize * block, self.num_blocks_x),
            None => (
                self.orig_width as usize * self.orig_height as usize * 4,
                self.orig_width,
            ),
        }
    }
}

/// A parsed KTX2 file held in memory.
#[derive(Debug)]
pub struct Ktx2File<'a> {
    data: &'a [u8],
    header: Ktx2Header,
    levels: Vec<Ktx2LevelIndex>,
    payload: Option<BasisPayload>,
}

impl<'a> Ktx2File<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        if data.len() < Ktx2Header::SIZE {
            return Err(FormatError::ShortRead {
                expected: Ktx2Header::SIZE,
                got: data.len(),
            });
        }
        let header: Ktx2Header = bytemuck::pod_read_unaligned(&data[..Ktx2Header::SIZE]);
        header.validate()?;

        let index_size = std::mem::size_of::<Ktx2LevelIndex>();
        let index_end = Ktx2Header::SIZE + header.num_levels() as usize * index_size;
        if data.len() < index_end {
            return Err(FormatError::ShortRead {
                expected: index_end,
                got: data.len(),
            });
        }
        let levels: Vec<Ktx2LevelIndex> = data[Ktx2Header::SIZE..index_end]
            .chunks_exact(index_size)
            .map(bytemuck::pod_read_unaligned)
            .collect();

        for (i, level) in levels.iter().enumerate() {
            if byte_range(data, level.byte_offset, level.byte_length).is_none() {
                return Err(FormatError::invalid_header(format!(
                    "KTX2 level {} lies outside the file",
                    i
                )));
            }
        }
        if byte_range(data, header.sgd_byte_offset, header.sgd_byte_length).is_none() {
            return Err(FormatError::invalid_header(
                "KTX2 supercompression global data lies outside the file",
            ));
        }

        let payload = Self::detect_payload(data, &header);
        Ok(Self {
            data,
            header,
            levels,
            payload,
        })
    }

    fn detect_payload(data: &[u8], header: &Ktx2Header) -> Option<BasisPayload> {
        if header.supercompression_scheme == SUPERCOMPRESSION_BASIS_LZ {
            return Some(BasisPayload::Etc1s);
        }
        // Basic descriptor block: total size, vendor/type, version/size, then the color model.
        let color_model_offset = header.dfd_byte_offset as usize + 12;
        match data.get(color_model_offset) {
            Some(&KHR_DF_MODEL_UASTC) => Some(BasisPayload::Uastc),
            Some(&KHR_DF_MODEL_ETC1S) => Some(BasisPayload::Etc1s),
            _ => None,
        }
    }

    pub fn header(&self) -> &Ktx2Header {
        &self.header
    }

    pub fn payload(&self) -> Option<BasisPayload> {
        self.payload
    }

    pub fn is_etc1s(&self) -> bool {
        self.payload == Some(BasisPayload::Etc1s)
    }

    pub fn is_uastc(&self) -> bool {
        self.payload == Some(BasisPayload::Uastc)
    }

    pub fn num_levels(&self) -> u32 {
        self.levels.len() as u32
    }

    /// Raw (supercompressed) bytes of a level.
    pub fn level_data(&self, level: u32) -> Option<&'a [u8]> {
        let index = self.levels.get(level as usize)?;
        byte_range(self.data, index.byte_offset, index.byte_length)
    }

    /// Supercompression global data (BasisLZ codebooks).
    pub fn global_data(&self) -> Option<&'a [u8]> {
        if self.header.sgd_byte_length == 0 {
            return None;
        }
        byte_range(
            self.data,
            self.header.sgd_byte_offset,
            self.header.sgd_byte_length,
        )
    }

    pub fn file_bytes(&self) -> &'a [u8] {
        self.data
    }

    pub fn level_info(&self, level: u32) -> Option<Ktx2LevelInfo> {
        if level >= self.num_levels() {
            return None;
        }
        let orig_width = (self.header.pixel_width >> level).max(1);
        let orig_height = (self.header.pixel_height >> level).max(1);
        Some(Ktx2LevelInfo {
            orig_width,
            orig_height,
            num_blocks_x: orig_width.div_ceil(4),
            num_blocks_y: orig_height.div_ceil(4),
        })
    }
}

/// `data[offset..offset + len]` for 64-bit file offsets, `None` if out of range.
fn byte_range(data: &[u8], offset: u64, len: u64) -> Option<&[u8]> {
    let start = usize::try_from(offset).ok()?;
    let end = start.checked_add(usize::try_from(len).ok()?)?;
    data.get(start..end)
}

/// Converts Basis Universal level payloads into GPU formats.
///
/// Implementations wrap a universal texture transcoder library.
pub trait BasisTranscoder: Send + Sync {
    /// Whether this backend can produce `target`. RGBA32 is always expected.
    fn supports_target(&self, _target: TranscodeTarget) -> bool {
        true
    }

    /// Transcode `level` of `file` into `out`.
    ///
    /// `out` is sized from [`Ktx2LevelInfo::output_layout`]; `row_pitch` is in
    /// blocks for compressed targets and pixels for RGBA32.
    fn transcode_level(
        &self,
        file: &Ktx2File<'_>,
        level: u32,
        target: TranscodeTarget,
        out: &mut [u8],
        row_pitch: u32,
    ) -> Result<()>;

    /// Transcode levels `0..count` in order, handing each to `sink`.
    ///
    /// Stops at the first failure and returns it; levels already handed
    /// over stay valid.
    fn transcode_levels(
        &self,
        file: &Ktx2File<'_>,
        count: u32,
        target: TranscodeTarget,
        sink: &mut dyn FnMut(u32, Vec<u8>),
    ) -> Result<()> {
        for level in 0..count {
            let Some(info) = file.level_info(level) else {
                break;
            };
            let (size, pitch) = info.output_layout(target);
            let mut out = vec![0u8; size];
            self.transcode_level(file, level, target, &mut out, pitch)?;
            sink(level, out);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a minimal KTX2 file with 16-byte blocks in every level.
    pub fn ktx2_bytes(
        width: u32,
        height: u32,
        levels: u32,
        payload: BasisPayload,
        layers: u32,
    ) -> Vec<u8> {
        let dfd_offset = (Ktx2Header::SIZE + levels as usize * 24) as u32;
        let dfd_len = 44u32;
        let header = Ktx2Header {
            identifier: KTX2_IDENTIFIER,
            vk_format: 0,
            type_size: 1,
            pixel_width: width,
            pixel_height: height,
            pixel_depth: 0,
            layer_count: layers,
            face_count: 1,
            level_count: levels,
            supercompression_scheme: match payload {
                BasisPayload::Etc1s => SUPERCOMPRESSION_BASIS_LZ,
                BasisPayload::Uastc => 0,
            },
            dfd_byte_offset: dfd_offset,
            dfd_byte_length: dfd_len,
            kvd_byte_offset: 0,
            kvd_byte_length: 0,
            sgd_byte_offset: 0,
            sgd_byte_length: 0,
        };

        let mut dfd = vec![0u8; dfd_len as usize];
        dfd[..4].copy_from_slice(&dfd_len.to_le_bytes());
        dfd[12] = match payload {
            BasisPayload::Etc1s => KHR_DF_MODEL_ETC1S,
            BasisPayload::Uastc => KHR_DF_MODEL_UASTC,
        };

        let mut data_start = dfd_offset as u64 + dfd_len as u64;
        let mut index = Vec::new();
        let mut level_data = Vec::new();
        for level in 0..levels {
            let w = (width >> level).max(1);
            let h = (height >> level).max(1);
            let len = (w.div_ceil(4) * h.div_ceil(4) * 16) as u64;
            index.push(Ktx2LevelIndex {
                byte_offset: data_start,
                byte_length: len,
                uncompressed_byte_length: len,
            });
            level_data.extend(std::iter::repeat(level as u8).take(len as usize));
            data_start += len;
        }

        let mut out = bytemuck::bytes_of(&header).to_vec();
        for entry in &index {
            out.extend_from_slice(bytemuck::bytes_of(entry));
        }
        out.extend_from_slice(&dfd);
        out.extend_from_slice(&level_data);
        out
    }

    #[test]
    fn test_header_size() {
        assert_eq!(Ktx2Header::SIZE, 80);
        assert_eq!(std::mem::size_of::<Ktx2LevelIndex>(), 24);
    }

    #[test]
    fn test_parse_uastc() {
        let data = ktx2_bytes(16, 8, 3, BasisPayload::Uastc, 0);
        let file = Ktx2File::parse(&data).unwrap();
        assert!(file.is_uastc());
        assert_eq!(file.num_levels(), 3);
        let info = file.level_info(2).unwrap();
        assert_eq!((info.orig_width, info.orig_height), (4, 2));
        assert_eq!(info.total_blocks(), 1);
        assert_eq!(file.level_data(1).unwrap().len(), 2 * 1 * 16);
    }

    #[test]
    fn test_parse_etc1s_from_supercompression() {
        let data = ktx2_bytes(4, 4, 1, BasisPayload::Etc1s, 0);
        assert!(Ktx2File::parse(&data).unwrap().is_etc1s());
    }

    #[test]
    fn test_array_texture_rejected() {
        let data = ktx2_bytes(4, 4, 1, BasisPayload::Uastc, 2);
        assert!(matches!(
            Ktx2File::parse(&data),
            Err(FormatError::UnsupportedPixelFormat { .. })
        ));
    }

    #[test]
    fn test_global_data_outside_file_rejected() {
        let mut data = ktx2_bytes(4, 4, 1, BasisPayload::Etc1s, 0);
        data[64..72].copy_from_slice(&u64::MAX.to_le_bytes());
        data[72..80].copy_from_slice(&16u64.to_le_bytes());
        assert!(matches!(
            Ktx2File::parse(&data),
            Err(FormatError::InvalidHeader { .. })
        ));

        let len = data.len() as u64;
        data[64..72].copy_from_slice(&(len - 4).to_le_bytes());
        assert!(Ktx2File::parse(&data).is_err());

        data[64..72].copy_from_slice(&(len - 16).to_le_bytes());
        let file = Ktx2File::parse(&data).unwrap();
        assert_eq!(file.global_data().map(<[u8]>::len), Some(16));
    }

    #[test]
    fn test_oversized_dimensions_rejected() {
        let data = ktx2_bytes(4, 4, 1, BasisPayload::Uastc, 0);
        let mut header: Ktx2Header = bytemuck::pod_read_unaligned(&data[..Ktx2Header::SIZE]);
        header.pixel_width = u32::MAX;
        assert!(matches!(
            header.validate(),
            Err(FormatError::InvalidHeader { .. })
        ));
    }

    #[test]
    fn test_default_transcode_levels_stops_at_failure() {
        struct FailsAtLevelOne;
        impl BasisTranscoder for FailsAtLevelOne {
            fn transcode_level(
                &self,
                _file: &Ktx2File<'_>,
                level: u32,
                _target: TranscodeTarget,
                out: &mut [u8],
                _row_pitch: u32,
            ) -> Result<()> {
                if level == 1 {
                    return Err(FormatError::Transcode("bad level".to_string()));
                }
                out.fill(0xAA);
                Ok(())
            }
        }

        let data = ktx2_bytes(8, 8, 3, BasisPayload::Uastc, 0);
        let file = Ktx2File::parse(&data).unwrap();
        let mut got = Vec::new();
        let result = FailsAtLevelOne.transcode_levels(
            &file,
            3,
            TranscodeTarget::Bc7Rgba,
            &mut |level: u32, bytes: Vec<u8>| got.push((level, bytes.len())),
        );
        assert!(matches!(result, Err(FormatError::Transcode(_))));
        assert_eq!(got, vec![(0, 64)]);
    }

    #[test]
    fn test_select_target_preference() {
        let all = FormatSupport {
            bc123: true,
            bc7: true,
            etc2: true,
            astc: true,
        };
        assert_eq!(
            select_target(BasisPayload::Etc1s, &all),
            (TranscodeTarget::Bc1, AlphaStatus::Opaque)
        );
        assert_eq!(
            select_target(BasisPayload::Uastc, &all),
            (TranscodeTarget::Bc7Rgba, AlphaStatus::Unknown)
        );

        let mobile = FormatSupport {
            etc2: true,
            astc: true,
            ..FormatSupport::none()
        };
        assert_eq!(select_target(BasisPayload::Etc1s, &mobile).0, TranscodeTarget::Etc1Rgb);
        assert_eq!(select_target(BasisPayload::Uastc, &mobile).0, TranscodeTarget::Astc4x4Rgba);

        let none = FormatSupport::none();
        assert_eq!(select_target(BasisPayload::Etc1s, &none).0, TranscodeTarget::Rgba32);
        assert_eq!(select_target(BasisPayload::Uastc, &none).0, TranscodeTarget::Rgba32);
    }

    #[test]
    fn test_output_layout() {
        let info = Ktx2LevelInfo {
            orig_width: 6,
            orig_height: 5,
            num_blocks_x: 2,
            num_blocks_y: 2,
        };
        assert_eq!(info.output_layout(TranscodeTarget::Bc1), (32, 2));
        assert_eq!(info.output_layout(TranscodeTarget::Bc7Rgba), (64, 2));
        assert_eq!(info.output_layout(TranscodeTarget::Rgba32), (120, 6));
    }
}

//! DDS container: legacy FOURCC headers and the DX10 extension.
//!
//! A DDS file stores its whole mip chain back to back after the header(s).

use std::io::Read;

use bytemuck::{Pod, Zeroable};

use crate::error::{FormatError, Result};
use crate::pixel_format::{check_dimensions, DataFormat};
use crate::record::{read_fully, read_record};
use crate::support::FormatSupport;

pub const DDS_MAGIC: [u8; 4] = *b"DDS ";

pub const DDPF_FOURCC: u32 = 0x4;

pub const FOURCC_DXT1: u32 = u32::from_le_bytes(*b"DXT1");
pub const FOURCC_DXT3: u32 = u32::from_le_bytes(*b"DXT3");
pub const FOURCC_DXT5: u32 = u32::from_le_bytes(*b"DXT5");
pub const FOURCC_DX10: u32 = u32::from_le_bytes(*b"DX10");

pub const DXGI_FORMAT_BC7_UNORM: u32 = 98;
pub const DXGI_FORMAT_BC7_UNORM_SRGB: u32 = 99;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
pub struct DdsPixelFormat {
    pub size: u32,
    pub flags: u32,
    pub four_cc: u32,
    pub rgb_bit_count: u32,
    pub r_bit_mask: u32,
    pub g_bit_mask: u32,
    pub b_bit_mask: u32,
    pub a_bit_mask: u32,
}

/// The 128-byte DDS header, magic included.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct DdsHeader {
    pub magic: [u8; 4],
    pub size: u32,
    pub flags: u32,
    pub height: u32,
    pub width: u32,
    pub pitch_or_linear_size: u32,
    pub depth: u32,
    pub mip_map_count: u32,
    pub reserved1: [u32; 11],
    pub pixel_format: DdsPixelFormat,
    pub caps: u32,
    pub caps2: u32,
    pub caps3: u32,
    pub caps4: u32,
    pub reserved2: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
pub struct DdsHeaderDx10 {
    pub dxgi_format: u32,
    pub resource_dimension: u32,
    pub misc_flag: u32,
    pub array_size: u32,
    pub misc_flags2: u32,
}

/// What the headers of a DDS file say about its payload.
#[derive(Debug, Clone, Copy)]
pub struct DdsInfo {
    pub header: DdsHeader,
    pub dx10: Option<DdsHeaderDx10>,
    /// Resolved block-compressed format
    pub format: DataFormat,
}

impl DdsInfo {
    pub fn width(&self) -> u32 {
        self.header.width
    }

    pub fn height(&self) -> u32 {
        self.header.height
    }

    /// Declared mip count; files without the field hold one level.
    pub fn num_mips(&self) -> u32 {
        self.header.mip_map_count.max(1)
    }
}

/// Read the DDS header (and DX10 extension) and resolve the pixel format.
///
/// Leaves the reader positioned at the first level's data.
pub fn read_dds_info<R: Read + ?Sized>(reader: &mut R, support: &FormatSupport) -> Result<DdsInfo> {
    let header: DdsHeader = read_record(reader)?;
    if header.magic != DDS_MAGIC {
        return Err(FormatError::invalid_header("not a DDS file"));
    }

    check_dimensions("DDS", header.width, header.height)?;

    let pf = header.pixel_format;
    if pf.flags & DDPF_FOURCC == 0 {
        return Err(FormatError::unsupported("DDS non-fourCC format not supported"));
    }

    if pf.four_cc == FOURCC_DX10 {
        let dx10: DdsHeaderDx10 = read_record(reader)?;
        let format = match dx10.dxgi_format {
            DXGI_FORMAT_BC7_UNORM | DXGI_FORMAT_BC7_UNORM_SRGB => DataFormat::Bc7UnormBlock,
            other => {
                return Err(FormatError::unsupported(format!(
                    "DXGI pixel format {} not supported",
                    other
                )));
            }
        };
        if !support.bc7 {
            return Err(FormatError::GpuFormatUnsupported { format });
        }
        return Ok(DdsInfo {
            header,
            dx10: Some(dx10),
            format,
        });
    }

    let format = match pf.four_cc {
        FOURCC_DXT1 => DataFormat::Bc1RgbaUnormBlock,
        FOURCC_DXT3 => DataFormat::Bc2UnormBlock,
        FOURCC_DXT5 => DataFormat::Bc3UnormBlock,
        other => {
            let fcc = other.to_le_bytes();
            return Err(FormatError::unsupported(format!(
                "DDS fourcc {} not supported",
                String::from_utf8_lossy(&fcc)
            )));
        }
    };
    if !support.bc123 {
        return Err(FormatError::GpuFormatUnsupported { format });
    }

    Ok(DdsInfo {
        header,
        dx10: None,
        format,
    })
}

/// Read one block-compressed level of `width` x `height`.
pub fn read_dds_level<R: Read + ?Sized>(
    reader: &mut R,
    format: DataFormat,
    width: u32,
    height: u32,
) -> Result<Vec<u8>> {
    let size = format.checked_level_size(width, height).ok_or_else(|| {
        FormatError::invalid_header(format!("DDS level {}x{} is too large", width, height))
    })?;
    let mut out = vec![0u8; size];
    let got = read_fully(reader, &mut out)?;
    if got != size {
        return Err(FormatError::ShortRead {
            expected: size,
            got,
        });
    }
    Ok(out)
}

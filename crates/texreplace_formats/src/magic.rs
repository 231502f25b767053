//! Container identification from the first four bytes of a stream.

use std::io::{Read, Seek};

use crate::record::read_fully;

/// Image container types a replacement file can be stored in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplacedImageType {
    Png,
    Zim,
    Dds,
    Basis,
    Ktx2,
    Invalid,
}

/// Result of sniffing a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identified {
    /// Detected container
    pub image_type: ReplacedImageType,
    /// The four magic bytes as printable text, for error messages
    pub magic: String,
}

/// Classify a four byte magic prefix.
pub fn identify_magic(magic: &[u8; 4]) -> ReplacedImageType {
    if magic == b"ZIMG" {
        ReplacedImageType::Zim
    } else if magic[0] == 0x89 && &magic[1..4] == b"PNG" {
        ReplacedImageType::Png
    } else if magic == b"DDS " {
        ReplacedImageType::Dds
    } else if magic[0] == b's' && magic[1] == b'B' {
        let version = u16::from_le_bytes([magic[2], magic[3]]);
        if version >= 0x10 {
            ReplacedImageType::Basis
        } else {
            ReplacedImageType::Invalid
        }
    } else if magic == b"\xABKTX" {
        // The full identifier is 12 bytes; the header parse checks the rest.
        ReplacedImageType::Ktx2
    } else {
        ReplacedImageType::Invalid
    }
}

/// Turn raw magic bytes into something that can go in a log line.
fn printable_magic(magic: &[u8; 4]) -> String {
    magic
        .iter()
        .map(|&b| if (32..127).contains(&b) { b as char } else { '_' })
        .collect()
}

/// Sniff the container type of a stream and rewind it to the start.
///
/// A stream shorter than four bytes is `Invalid` with magic `"FAIL"`.
pub fn identify<R: Read + Seek + ?Sized>(reader: &mut R) -> Identified {
    let mut magic = [0u8; 4];
    match read_fully(reader, &mut magic) {
        Ok(4) => {}
        _ => {
            return Identified {
                image_type: ReplacedImageType::Invalid,
                magic: "FAIL".to_string(),
            };
        }
    }

    if let Err(e) = reader.rewind() {
        log::warn!("Failed to rewind after reading magic: {}", e);
    }

    Identified {
        image_type: identify_magic(&magic),
        magic: printable_magic(&magic),
    }
}

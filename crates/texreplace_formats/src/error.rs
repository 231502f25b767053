//! Error types for header parsing and level decoding.

use thiserror::Error;

use crate::pixel_format::DataFormat;

/// Errors that can occur while reading a replacement image.
#[derive(Debug, Error)]
pub enum FormatError {
    /// The stream ended before a fixed-size record could be read.
    #[error("Short read: expected {expected} bytes, got {got}")]
    ShortRead {
        /// Bytes requested
        expected: usize,
        /// Bytes actually available
        got: usize,
    },

    /// I/O error from the underlying stream
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Magic prefix did not match any known container.
    #[error("Unsupported format {magic}")]
    UnknownMagic {
        /// Printable rendition of the first four bytes
        magic: String,
    },

    /// Header fields failed validation.
    #[error("Invalid header: {message}")]
    InvalidHeader {
        /// Description of the problem
        message: String,
    },

    /// Container recognized, payload layout not handled.
    #[error("Unsupported pixel format: {message}")]
    UnsupportedPixelFormat {
        /// Description of the unsupported layout
        message: String,
    },

    /// The target GPU cannot sample the resolved format.
    #[error("{format} is not supported by the GPU")]
    GpuFormatUnsupported {
        /// The resolved format
        format: DataFormat,
    },

    /// Legacy `.basis` files are not handled.
    #[error(
        "The basis texture format is not supported. \
         Use KTX2 (basisu texture.png -uastc -ktx2 -mipmap)"
    )]
    BasisUnsupported,

    /// Decoded image is larger than the header promised.
    #[error(
        "Image changed since header read: {width}x{height} exceeds \
         {expected_width}x{expected_height}"
    )]
    SizeChanged {
        /// Decoded width
        width: u32,
        /// Decoded height
        height: u32,
        /// Width from the header peek
        expected_width: u32,
        /// Height from the header peek
        expected_height: u32,
    },

    /// PNG decoding failed.
    #[error("Image decode error: {0}")]
    Image(#[from] image::ImageError),

    /// Universal texture transcoding failed.
    #[error("Transcode failed: {0}")]
    Transcode(String),
}

impl FormatError {
    /// Create an invalid header error with a message.
    pub fn invalid_header(message: impl Into<String>) -> Self {
        Self::InvalidHeader {
            message: message.into(),
        }
    }

    /// Create an unsupported pixel format error.
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::UnsupportedPixelFormat {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, FormatError>;

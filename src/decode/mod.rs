//! Decoders turning node payloads into [`PointBatch`](crate::point::PointBatch)es.
//!
//! All decoders are synchronous and pure; [`pool`] runs them off the calling thread.

pub mod binary;
pub mod greyhound;
pub mod las;
pub mod laz;
pub mod normals;
pub mod pool;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Buffer too small: expected {expected} bytes, got {actual}")]
    BufferTooSmall { expected: usize, actual: usize },

    #[error("Invalid format in {context}: {detail}")]
    InvalidFormat {
        context: &'static str,
        detail: String,
    },

    #[error("Unsupported LAS version {major}.{minor}, only 1.0 to 1.2 are supported")]
    UnsupportedLasVersion { major: u8, minor: u8 },

    #[error("Unsupported legacy LAS compression")]
    UnsupportedCompression,

    #[error("Unknown LAS point format {0}")]
    UnknownPointFormat(u8),

    #[error("Compressed payload but no LAZ codec is available")]
    CodecUnavailable,

    #[error("LAZ codec error: {0}")]
    Codec(String),

    #[error("Decode worker dropped the result")]
    WorkerLost,
}

pub type DecodeResult<T> = Result<T, DecodeError>;

/// Fails with [`DecodeError::BufferTooSmall`] unless `buffer` holds `expected` bytes.
pub(crate) fn ensure_len(buffer: &[u8], expected: usize) -> DecodeResult<()> {
    if buffer.len() < expected {
        return Err(DecodeError::BufferTooSmall {
            expected,
            actual: buffer.len(),
        });
    }
    Ok(())
}

/// 16 bit color channels are scaled down, 8 bit ones kept.
pub(crate) fn color_channel_to_u8(value: u16) -> u8 {
    if value > 255 { (value / 256) as u8 } else { value as u8 }
}

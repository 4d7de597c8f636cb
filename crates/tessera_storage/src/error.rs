//! Region codec errors.

use thiserror::Error;

use tessera_streaming::StorageError;

/// Errors raised while encoding or decoding a region file.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// LZ4 payload could not be decompressed.
    #[error("decompression failed: {0}")]
    Decompress(String),

    /// Payload shorter or longer than its header announces.
    #[error("payload is {actual} bytes, expected {expected}")]
    Length {
        /// Bytes the header implies.
        expected: usize,
        /// Bytes actually present.
        actual: usize,
    },

    /// Not a region file.
    #[error("bad magic {0:?}")]
    BadMagic([u8; 4]),

    /// Written by an unknown format version.
    #[error("unsupported format version {0}")]
    UnsupportedVersion(u32),

    /// File belongs to another region.
    #[error("file holds planet {planet} column ({x}, {y})")]
    WrongRegion {
        /// Planet in the header.
        planet: i32,
        /// Column x in the header.
        x: i32,
        /// Column y in the header.
        y: i32,
    },

    /// A record field is out of range.
    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

impl From<CodecError> for StorageError {
    fn from(error: CodecError) -> Self {
        Self::Corrupt {
            reason: error.to_string(),
        }
    }
}

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

//! Error types for the tarsum library.
//!
//! All fallible operations return a [`Result<T>`], an alias for
//! `Result<T, TarSumError>`. Errors fall into a few categories:
//!
//! - **Configuration**: [`UnknownVersion`], [`InvalidHashLabel`] — reported
//!   before any bytes are processed.
//! - **Archive format**: [`Header`], [`Pax`], [`InvalidSize`],
//!   [`DuplicateMetadata`], [`MetadataTooLarge`], [`OrphanedMetadata`],
//!   [`UnexpectedEof`] — reported from `read` while scanning the stream.
//! - **Transport**: [`Io`], [`Decompression`] — the underlying source or
//!   the inline gzip decoder failed.
//!
//! [`UnknownVersion`]: TarSumError::UnknownVersion
//! [`InvalidHashLabel`]: TarSumError::InvalidHashLabel
//! [`Header`]: TarSumError::Header
//! [`Pax`]: TarSumError::Pax
//! [`InvalidSize`]: TarSumError::InvalidSize
//! [`DuplicateMetadata`]: TarSumError::DuplicateMetadata
//! [`MetadataTooLarge`]: TarSumError::MetadataTooLarge
//! [`OrphanedMetadata`]: TarSumError::OrphanedMetadata
//! [`UnexpectedEof`]: TarSumError::UnexpectedEof
//! [`Io`]: TarSumError::Io
//! [`Decompression`]: TarSumError::Decompression

use crate::header::{HeaderError, PaxError};

/// Result type alias for operations that may return a TarSumError.
pub type Result<T> = std::result::Result<T, TarSumError>;

/// Error types for tarsum operations.
#[derive(Debug, thiserror::Error)]
pub enum TarSumError {
    /// A label that does not name a supported tarsum version.
    #[error("unknown tarsum version: {0:?}")]
    UnknownVersion(String),

    /// A hash label that is empty or not lowercase ASCII alphanumeric.
    #[error("invalid hash label: {0:?}")]
    InvalidHashLabel(String),

    /// A tar header block failed to parse or verify.
    #[error("corrupt tar header: {0}")]
    Header(#[from] HeaderError),

    /// A PAX extended header contained a malformed record.
    #[error("malformed PAX extended header: {0}")]
    Pax(#[from] PaxError),

    /// An entry size too large to round up to the tar block boundary.
    #[error("entry size {0} overflows block padding")]
    InvalidSize(u64),

    /// Two metadata entries of the same kind preceded a file entry.
    #[error("duplicate {0} entry before file entry")]
    DuplicateMetadata(&'static str),

    /// A metadata entry's payload exceeded the accepted limit.
    #[error("metadata entry of {size} bytes exceeds limit of {limit}")]
    MetadataTooLarge {
        /// The size declared by the metadata entry's header.
        size: u64,
        /// The maximum size accepted for metadata entries.
        limit: u64,
    },

    /// The archive ended while metadata entries were still pending.
    #[error("archive ended with unconsumed metadata entries")]
    OrphanedMetadata,

    /// The byte stream ended in the middle of a header block or entry.
    #[error("unexpected end of archive at offset {0}")]
    UnexpectedEof(u64),

    /// The inline gzip decoder rejected the stream.
    #[error("corrupt gzip stream: {0}")]
    Decompression(#[source] std::io::Error),

    /// I/O error from the underlying byte source.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

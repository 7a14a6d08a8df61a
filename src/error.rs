//! Crate-wide error taxonomy.
//!
//! Each component that can fail owns its own [`thiserror`]-derived enum;
//! [`ReaderError`] composes them the way the teacher's `MzMLParserError`
//! and `MGFError` are each convertible to `io::Error` at the boundary.

use std::io;
use thiserror::Error;

/// Failures from the numeric payload codec (C1).
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64_simd::Error),
    #[error("failed to inflate zlib-wrapped payload: {0}")]
    Inflate(#[source] io::Error),
    #[error("decoded payload length {got} is not a multiple of element size {expected_multiple_of}")]
    MalformedPayload {
        expected_multiple_of: usize,
        got: usize,
    },
}

/// Failures from the bidirectional binary text reader (C2).
#[derive(Debug, Error)]
pub enum TextReaderError {
    #[error("an I/O error occurred at byte offset {offset}: {source}")]
    Io {
        offset: u64,
        #[source]
        source: io::Error,
    },
    #[error("no file is currently open")]
    FileNotOpen,
}

impl From<TextReaderError> for io::Error {
    fn from(value: TextReaderError) -> Self {
        match value {
            TextReaderError::Io { source, .. } => source,
            TextReaderError::FileNotOpen => {
                io::Error::new(io::ErrorKind::NotConnected, value.to_string())
            }
        }
    }
}

/// Failures from the sequential XML parsers (C5).
#[derive(Debug, Error)]
pub enum XmlParseError {
    #[error("malformed XML at line {line}, column {column}: {message}")]
    MalformedXml {
        line: usize,
        column: usize,
        message: String,
    },
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Failures from the sequential text parsers (C4).
#[derive(Debug, Error)]
pub enum TextParseError {
    #[error("malformed header line: {0}")]
    MalformedHeader(String),
    #[error("malformed peak line: {0}")]
    MalformedPeakLine(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Failures from the indexed XML accessor (C6) and the reader façade (C7).
#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("no file is currently open")]
    FileNotOpen,
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("malformed XML encountered while indexing or reading: {0}")]
    MalformedXml(#[from] XmlParseError),
    #[error(transparent)]
    TextParse(#[from] TextParseError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("scan number {0} is not present in the index")]
    InvalidScanNumber(i64),
    #[error("spectrum index {0} is out of range")]
    InvalidSpectrumIndex(usize),
    #[error("processing was aborted by request")]
    AbortRequested,
    #[error("unrecognized file extension for path {0:?}")]
    UnrecognizedExtension(std::path::PathBuf),
}

impl From<TextReaderError> for ReaderError {
    fn from(value: TextReaderError) -> Self {
        match value {
            TextReaderError::Io { source, .. } => ReaderError::Io(source),
            TextReaderError::FileNotOpen => ReaderError::FileNotOpen,
        }
    }
}

impl From<ReaderError> for io::Error {
    fn from(value: ReaderError) -> Self {
        match value {
            ReaderError::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
        }
    }
}

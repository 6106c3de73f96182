//! Error types for framing, codec and matrix operations.

use thiserror::Error;

/// Transport-level failure while sending or receiving one frame.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("connection closed after {received} of 4 header bytes")]
    ConnectionClosed { received: usize },

    #[error("truncated frame: expected {expected} payload bytes, received {received}")]
    TruncatedFrame { expected: usize, received: usize },

    #[error("frame of {len} bytes exceeds limit of {limit} bytes")]
    FrameTooLarge { len: u64, limit: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure to turn a payload into matrices or back.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("bad magic: {0:?}")]
    BadMagic([u8; 4]),

    #[error("unsupported codec version {0}")]
    UnsupportedVersion(u8),

    #[error("unexpected message kind {found}, expected {expected}")]
    UnexpectedKind { expected: u8, found: u8 },

    #[error("unknown dtype tag {0}")]
    UnknownDType(u8),

    #[error("dtype mismatch: expected {expected}, found {found}")]
    DTypeMismatch {
        expected: crate::DType,
        found: crate::DType,
    },

    #[error("payload truncated: needed {needed} bytes at offset {offset}, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),

    #[error("matrix dimensions {rows}x{cols} overflow the wire format")]
    DimensionOverflow { rows: u64, cols: u64 },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MatrixError {
    #[error("{rows}x{cols} matrix needs {expected} elements, got {actual}")]
    ShapeMismatch {
        rows: usize,
        cols: usize,
        expected: usize,
        actual: usize,
    },

    #[error("matrix dimension mismatch: A is {0}x{1}, B is {2}x{3}")]
    DimensionMismatch(usize, usize, usize, usize),

    #[error("cannot stack an empty list of blocks")]
    EmptyStack,

    #[error("block {index} has {found} columns, expected {expected}")]
    ColumnMismatch {
        index: usize,
        expected: usize,
        found: usize,
    },

    #[error("rows {start}..{end} out of range for {rows}-row matrix")]
    RowRange {
        start: usize,
        end: usize,
        rows: usize,
    },
}

//! Error types for matrix-mul operations.

use std::time::Duration;

use matmul_protocol::{CodecError, FrameError, MatrixError};
use thiserror::Error;

use crate::config::Host;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid partition count {count} for a matrix with {rows} rows")]
    InvalidPartitionCount { count: usize, rows: usize },

    #[error("matrix dimension mismatch: A is {0}x{1}, B is {2}x{3}")]
    DimensionMismatch(usize, usize, usize, usize),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("matrix error: {0}")]
    Matrix(#[from] MatrixError),

    #[error("partitions {missing:?} produced no result")]
    PartialComputationFailure {
        missing: Vec<usize>,
        failures: Vec<(usize, PartitionError)>,
    },

    #[error("port range starting at {base_port} cannot hold {count} workers")]
    PortRange { base_port: u16, count: usize },

    #[error("worker fleet error: {message}")]
    Fleet {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("computation cancelled")]
    Cancelled,
}

impl Error {
    pub fn fleet(message: impl Into<String>) -> Self {
        Self::Fleet {
            message: message.into(),
            source: None,
        }
    }

    pub fn fleet_with_source(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Fleet {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Partition indices that never produced a result, if that is what failed.
    pub fn missing_partitions(&self) -> Option<&[usize]> {
        match self {
            Error::PartialComputationFailure { missing, .. } => Some(missing),
            _ => None,
        }
    }
}

/// Why a single partition produced no result.
#[derive(Debug, Error)]
pub enum PartitionError {
    #[error("worker {host} unreachable after {attempts} attempts: {source}")]
    WorkerUnreachable {
        host: Host,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("expected a {expected_rows}x{expected_cols} block, got {rows}x{cols}")]
    UnexpectedShape {
        expected_rows: usize,
        expected_cols: usize,
        rows: usize,
        cols: usize,
    },
}

//! Error types for worker connections.

use std::time::Duration;

use matmul_protocol::{CodecError, FrameError, MatrixError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("matrix dimension mismatch: A is {0}x{1}, B is {2}x{3}")]
    DimensionMismatch(usize, usize, usize, usize),

    #[error("matrix error: {0}")]
    Matrix(#[from] MatrixError),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

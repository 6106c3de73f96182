//! Payload encoding for tasks and results.
//!
//! # Wire Layout
//!
//! ```text
//! message := "MMUL" | version u8 | kind u8 | matrix+
//! matrix  := dtype u8 | rows u32 BE | cols u32 BE | elements (big-endian, row-major)
//! ```
//!
//! A task carries two matrices (the row-block of A, then B); a result
//! carries one.

use crate::error::CodecError;
use crate::matrix::{DType, Element, Matrix};

pub const MAGIC: &[u8; 4] = b"MMUL";
pub const VERSION: u8 = 1;

const KIND_TASK: u8 = 1;
const KIND_RESULT: u8 = 2;
const MESSAGE_HEADER_LEN: usize = 6;
const MATRIX_HEADER_LEN: usize = 9;

/// One unit of work: a row-block of the left operand and the full right operand.
#[derive(Debug, Clone, PartialEq)]
pub struct Task<T> {
    pub a_sub: Matrix<T>,
    pub b: Matrix<T>,
}

/// Turns tasks and results into frame payloads and back.
pub trait Codec<T: Element>: Send + Sync {
    fn encode_task(&self, a_sub: &Matrix<T>, b: &Matrix<T>) -> Result<Vec<u8>, CodecError>;

    fn decode_task(&self, bytes: &[u8]) -> Result<Task<T>, CodecError>;

    fn encode_result(&self, c_sub: &Matrix<T>) -> Result<Vec<u8>, CodecError>;

    fn decode_result(&self, bytes: &[u8]) -> Result<Matrix<T>, CodecError>;
}

/// The versioned binary encoding described in the module docs.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryCodec;

impl<T: Element> Codec<T> for BinaryCodec {
    fn encode_task(&self, a_sub: &Matrix<T>, b: &Matrix<T>) -> Result<Vec<u8>, CodecError> {
        let mut buf = Vec::with_capacity(
            MESSAGE_HEADER_LEN + 2 * MATRIX_HEADER_LEN + (a_sub.as_slice().len() + b.as_slice().len()) * T::DTYPE.width(),
        );
        put_header(&mut buf, KIND_TASK);
        put_matrix(&mut buf, a_sub)?;
        put_matrix(&mut buf, b)?;
        Ok(buf)
    }

    fn decode_task(&self, bytes: &[u8]) -> Result<Task<T>, CodecError> {
        let mut reader = Reader::new(bytes);
        reader.header(KIND_TASK)?;
        let a_sub = reader.matrix()?;
        let b = reader.matrix()?;
        reader.finish()?;
        Ok(Task { a_sub, b })
    }

    fn encode_result(&self, c_sub: &Matrix<T>) -> Result<Vec<u8>, CodecError> {
        let mut buf =
            Vec::with_capacity(result_len(T::DTYPE, c_sub.rows(), c_sub.cols()));
        put_header(&mut buf, KIND_RESULT);
        put_matrix(&mut buf, c_sub)?;
        Ok(buf)
    }

    fn decode_result(&self, bytes: &[u8]) -> Result<Matrix<T>, CodecError> {
        let mut reader = Reader::new(bytes);
        reader.header(KIND_RESULT)?;
        let c_sub = reader.matrix()?;
        reader.finish()?;
        Ok(c_sub)
    }
}

fn put_header(buf: &mut Vec<u8>, kind: u8) {
    buf.extend_from_slice(MAGIC);
    buf.push(VERSION);
    buf.push(kind);
}

fn put_matrix<T: Element>(buf: &mut Vec<u8>, matrix: &Matrix<T>) -> Result<(), CodecError> {
    let overflow = || CodecError::DimensionOverflow {
        rows: matrix.rows() as u64,
        cols: matrix.cols() as u64,
    };
    let rows = u32::try_from(matrix.rows()).map_err(|_| overflow())?;
    let cols = u32::try_from(matrix.cols()).map_err(|_| overflow())?;

    buf.push(T::DTYPE.tag());
    buf.extend_from_slice(&rows.to_be_bytes());
    buf.extend_from_slice(&cols.to_be_bytes());
    for &value in matrix.as_slice() {
        value.put_be(buf);
    }
    Ok(())
}

/// Bounds-checked cursor over a payload.
struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn take(&mut self, needed: usize) -> Result<&'a [u8], CodecError> {
        let available = self.bytes.len() - self.offset;
        if needed > available {
            return Err(CodecError::Truncated {
                offset: self.offset,
                needed,
                available,
            });
        }
        let slice = &self.bytes[self.offset..self.offset + needed];
        self.offset += needed;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, CodecError> {
        let raw = self.take(4)?;
        Ok(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn header(&mut self, expected_kind: u8) -> Result<(), CodecError> {
        let magic = self.take(4)?;
        if magic != MAGIC {
            return Err(CodecError::BadMagic([magic[0], magic[1], magic[2], magic[3]]));
        }
        let version = self.u8()?;
        if version != VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }
        let kind = self.u8()?;
        if kind != expected_kind {
            return Err(CodecError::UnexpectedKind {
                expected: expected_kind,
                found: kind,
            });
        }
        Ok(())
    }

    fn matrix<T: Element>(&mut self) -> Result<Matrix<T>, CodecError> {
        let dtype = DType::from_tag(self.u8()?)?;
        if dtype != T::DTYPE {
            return Err(CodecError::DTypeMismatch {
                expected: T::DTYPE,
                found: dtype,
            });
        }
        let rows = self.u32()? as usize;
        let cols = self.u32()? as usize;
        let overflow = CodecError::DimensionOverflow {
            rows: rows as u64,
            cols: cols as u64,
        };
        let count = rows.checked_mul(cols).ok_or(overflow.clone())?;
        let byte_len = count.checked_mul(dtype.width()).ok_or(overflow)?;

        let raw = self.take(byte_len)?;
        let data: Vec<T> = raw.chunks_exact(dtype.width()).map(T::from_be_slice).collect();
        Matrix::new(rows, cols, data).map_err(|_| CodecError::DimensionOverflow {
            rows: rows as u64,
            cols: cols as u64,
        })
    }

    fn finish(&self) -> Result<(), CodecError> {
        match self.bytes.len() - self.offset {
            0 => Ok(()),
            trailing => Err(CodecError::TrailingBytes(trailing)),
        }
    }
}

/// Exact encoded size of a result carrying a `rows x cols` block of `dtype`.
///
/// Saturates instead of overflowing, so it is always safe as a frame limit.
pub fn result_len(dtype: DType, rows: usize, cols: usize) -> usize {
    rows.saturating_mul(cols)
        .saturating_mul(dtype.width())
        .saturating_add(MESSAGE_HEADER_LEN + MATRIX_HEADER_LEN)
}

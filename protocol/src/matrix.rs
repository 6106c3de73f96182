//! Dense row-major matrices over fixed-width numeric elements.

use std::fmt;

use crate::error::{CodecError, MatrixError};

/// Element type tag carried on the wire in front of every matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DType {
    I32 = 1,
    I64 = 2,
    F32 = 3,
    F64 = 4,
}

impl DType {
    /// Size of one encoded element in bytes.
    pub const fn width(self) -> usize {
        match self {
            DType::I32 | DType::F32 => 4,
            DType::I64 | DType::F64 => 8,
        }
    }

    pub const fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Result<Self, CodecError> {
        match tag {
            1 => Ok(DType::I32),
            2 => Ok(DType::I64),
            3 => Ok(DType::F32),
            4 => Ok(DType::F64),
            other => Err(CodecError::UnknownDType(other)),
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            DType::I32 => "i32",
            DType::I64 => "i64",
            DType::F32 => "f32",
            DType::F64 => "f64",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for DType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "i32" => Ok(DType::I32),
            "i64" => Ok(DType::I64),
            "f32" => Ok(DType::F32),
            "f64" => Ok(DType::F64),
            other => Err(format!("unknown dtype '{}', expected i32, i64, f32 or f64", other)),
        }
    }
}

/// A fixed-width numeric type that can live in a [`Matrix`] and cross the wire.
///
/// Integer accumulation wraps on overflow so that a worker fed hostile
/// operands never panics.
pub trait Element:
    Copy + Default + PartialEq + fmt::Debug + fmt::Display + Send + Sync + 'static
{
    const DTYPE: DType;

    /// Returns `acc + a * b`.
    fn mul_add(acc: Self, a: Self, b: Self) -> Self;

    /// Appends the big-endian encoding of `self`.
    fn put_be(self, buf: &mut Vec<u8>);

    /// Reads one element from exactly `DTYPE.width()` big-endian bytes.
    fn from_be_slice(bytes: &[u8]) -> Self;

    fn from_i64(value: i64) -> Self;
}

macro_rules! int_element {
    ($ty:ty, $dtype:expr) => {
        impl Element for $ty {
            const DTYPE: DType = $dtype;

            fn mul_add(acc: Self, a: Self, b: Self) -> Self {
                acc.wrapping_add(a.wrapping_mul(b))
            }

            fn put_be(self, buf: &mut Vec<u8>) {
                buf.extend_from_slice(&self.to_be_bytes());
            }

            fn from_be_slice(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$ty>()];
                raw.copy_from_slice(bytes);
                <$ty>::from_be_bytes(raw)
            }

            fn from_i64(value: i64) -> Self {
                value as $ty
            }
        }
    };
}

macro_rules! float_element {
    ($ty:ty, $dtype:expr) => {
        impl Element for $ty {
            const DTYPE: DType = $dtype;

            fn mul_add(acc: Self, a: Self, b: Self) -> Self {
                acc + a * b
            }

            fn put_be(self, buf: &mut Vec<u8>) {
                buf.extend_from_slice(&self.to_be_bytes());
            }

            fn from_be_slice(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$ty>()];
                raw.copy_from_slice(bytes);
                <$ty>::from_be_bytes(raw)
            }

            fn from_i64(value: i64) -> Self {
                value as $ty
            }
        }
    };
}

int_element!(i32, DType::I32);
int_element!(i64, DType::I64);
float_element!(f32, DType::F32);
float_element!(f64, DType::F64);

/// A rectangular matrix stored row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix<T> {
    rows: usize,
    cols: usize,
    data: Vec<T>,
}

impl<T: Element> Matrix<T> {
    /// Builds a matrix from row-major data, checking the element count.
    pub fn new(rows: usize, cols: usize, data: Vec<T>) -> Result<Self, MatrixError> {
        let expected = rows.checked_mul(cols).ok_or(MatrixError::ShapeMismatch {
            rows,
            cols,
            expected: usize::MAX,
            actual: data.len(),
        })?;
        if data.len() != expected {
            return Err(MatrixError::ShapeMismatch {
                rows,
                cols,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { rows, cols, data })
    }

    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![T::default(); rows * cols],
        }
    }

    /// Builds a matrix from nested rows. All rows must share one length.
    pub fn from_rows(rows: Vec<Vec<T>>) -> Result<Self, MatrixError> {
        let row_count = rows.len();
        let cols = rows.first().map_or(0, Vec::len);
        let mut data = Vec::with_capacity(row_count * cols);
        for (index, row) in rows.into_iter().enumerate() {
            if row.len() != cols {
                return Err(MatrixError::ColumnMismatch {
                    index,
                    expected: cols,
                    found: row.len(),
                });
            }
            data.extend(row);
        }
        Ok(Self {
            rows: row_count,
            cols,
            data,
        })
    }

    /// Builds a matrix by evaluating `f(row, col)` for every cell.
    pub fn from_fn(rows: usize, cols: usize, mut f: impl FnMut(usize, usize) -> T) -> Self {
        let mut data = Vec::with_capacity(rows * cols);
        for i in 0..rows {
            for j in 0..cols {
                data.push(f(i, j));
            }
        }
        Self { rows, cols, data }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn get(&self, row: usize, col: usize) -> Option<T> {
        if row < self.rows && col < self.cols {
            Some(self.data[row * self.cols + col])
        } else {
            None
        }
    }

    pub fn row(&self, row: usize) -> Option<&[T]> {
        if row < self.rows {
            Some(&self.data[row * self.cols..(row + 1) * self.cols])
        } else {
            None
        }
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Copies out `count` rows starting at `start`.
    pub fn slice_rows(&self, start: usize, count: usize) -> Result<Self, MatrixError> {
        let end = start.checked_add(count).filter(|&end| end <= self.rows).ok_or(
            MatrixError::RowRange {
                start,
                end: start.saturating_add(count),
                rows: self.rows,
            },
        )?;
        Ok(Self {
            rows: count,
            cols: self.cols,
            data: self.data[start * self.cols..end * self.cols].to_vec(),
        })
    }

    /// Stacks row-blocks vertically in the order given.
    pub fn vstack<'a, I>(blocks: I) -> Result<Self, MatrixError>
    where
        I: IntoIterator<Item = &'a Matrix<T>>,
    {
        let mut blocks = blocks.into_iter().peekable();
        let cols = blocks.peek().ok_or(MatrixError::EmptyStack)?.cols;
        let mut rows = 0;
        let mut data = Vec::new();
        for (index, block) in blocks.enumerate() {
            if block.cols != cols {
                return Err(MatrixError::ColumnMismatch {
                    index,
                    expected: cols,
                    found: block.cols,
                });
            }
            rows += block.rows;
            data.extend_from_slice(&block.data);
        }
        Ok(Self { rows, cols, data })
    }

    /// Dense product `self · rhs` with i-k-j loop order.
    pub fn multiply(&self, rhs: &Matrix<T>) -> Result<Matrix<T>, MatrixError> {
        if self.cols != rhs.rows {
            return Err(MatrixError::DimensionMismatch(
                self.rows, self.cols, rhs.rows, rhs.cols,
            ));
        }
        let mut out = vec![T::default(); self.rows * rhs.cols];
        for i in 0..self.rows {
            let out_row = &mut out[i * rhs.cols..(i + 1) * rhs.cols];
            for k in 0..self.cols {
                let a = self.data[i * self.cols + k];
                let rhs_row = &rhs.data[k * rhs.cols..(k + 1) * rhs.cols];
                for (c, &b) in out_row.iter_mut().zip(rhs_row) {
                    *c = T::mul_add(*c, a, b);
                }
            }
        }
        Ok(Matrix {
            rows: self.rows,
            cols: rhs.cols,
            data: out,
        })
    }
}

impl<T: Element> fmt::Display for Matrix<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for i in 0..self.rows {
            let row = &self.data[i * self.cols..(i + 1) * self.cols];
            write!(f, "[")?;
            for (j, value) in row.iter().enumerate() {
                if j > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", value)?;
            }
            writeln!(f, "]")?;
        }
        Ok(())
    }
}

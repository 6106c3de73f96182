//! Row-wise partitioning of the left operand.

use matmul_protocol::{Element, Matrix};

use crate::Error;

/// A contiguous block of rows cut from a source matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk<T> {
    /// Position in the partition, which is also the index of its host.
    pub index: usize,
    pub start_row: usize,
    pub row_count: usize,
    pub matrix: Matrix<T>,
}

/// Row counts for splitting `rows` into `parts` blocks.
///
/// With `q = rows / parts` and `r = rows % parts`, the first `r` blocks get
/// `q + 1` rows and the rest get `q`.
pub fn row_counts(rows: usize, parts: usize) -> Result<Vec<usize>, Error> {
    if parts == 0 || parts > rows {
        return Err(Error::InvalidPartitionCount { count: parts, rows });
    }
    let q = rows / parts;
    let r = rows % parts;
    Ok((0..parts).map(|i| if i < r { q + 1 } else { q }).collect())
}

/// Splits `a` into `parts` ordered row-blocks that tile it exactly once.
pub fn partition<T: Element>(a: &Matrix<T>, parts: usize) -> Result<Vec<Chunk<T>>, Error> {
    let counts = row_counts(a.rows(), parts)?;
    let mut chunks = Vec::with_capacity(parts);
    let mut start_row = 0;
    for (index, row_count) in counts.into_iter().enumerate() {
        chunks.push(Chunk {
            index,
            start_row,
            row_count,
            matrix: a.slice_rows(start_row, row_count)?,
        });
        start_row += row_count;
    }
    Ok(chunks)
}

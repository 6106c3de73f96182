//! Wire protocol shared by the coordinator and its workers.
//!
//! `matmul-protocol` defines everything that crosses a worker connection:
//!
//! - **Framing**: a 4-byte big-endian length prefix followed by the payload,
//!   read and written with loops that tolerate partial I/O.
//! - **Codec**: a versioned binary encoding of tasks `(A_sub, B)` and results
//!   `(C_sub)`, behind the [`Codec`] trait.
//! - **Matrices**: a dense row-major [`Matrix`] over fixed-width
//!   [`Element`] types.
//!
//! # Example
//!
//! ```no_run
//! use matmul_protocol::{BinaryCodec, Codec, Matrix, send_frame, recv_frame};
//! use tokio::net::TcpStream;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let a = Matrix::from_rows(vec![vec![1i64, 2], vec![3, 4]])?;
//!     let b = Matrix::from_rows(vec![vec![5i64, 6], vec![7, 8]])?;
//!
//!     let mut stream = TcpStream::connect("localhost:5000").await?;
//!     send_frame(&mut stream, &BinaryCodec.encode_task(&a, &b)?).await?;
//!
//!     let payload = recv_frame(&mut stream).await?;
//!     let c: Matrix<i64> = BinaryCodec.decode_result(&payload)?;
//!     assert_eq!(c, a.multiply(&b)?);
//!     Ok(())
//! }
//! ```

pub mod codec;
mod error;
pub mod frame;
mod matrix;

pub use codec::{BinaryCodec, Codec, Task, result_len};
pub use error::{CodecError, FrameError, MatrixError};
pub use frame::{recv_frame, recv_frame_limited, send_frame};
pub use matrix::{DType, Element, Matrix};

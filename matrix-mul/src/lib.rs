//! Distributed matrix multiplication over TCP workers.
//!
//! `matrix-mul` computes `C = A × B` by cutting A into one contiguous
//! row-block per worker, sending every worker its block together with the
//! whole of B, and stacking the returned blocks back in partition order.
//!
//! # Partitioning
//!
//! With `R` rows and `N` workers, the first `R mod N` blocks get
//! `R div N + 1` rows and the rest get `R div N`. Block `i` always goes to
//! host `i`, and results are reassembled by that index regardless of the
//! order in which workers answer.
//!
//! # Failure Handling
//!
//! A worker that cannot be reached, stalls, closes mid-frame or returns
//! garbage only fails its own partition. Once every partition has been
//! attempted, any failure is reported as
//! [`Error::PartialComputationFailure`] naming the missing indices; a
//! partial product is never returned.
//!
//! # Example
//!
//! ```no_run
//! use matrix_mul::{Coordinator, CoordinatorConfig, ProcessFleet, ProcessFleetConfig};
//! use matmul_protocol::Matrix;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CoordinatorConfig::with_sequential_hosts("localhost", 5000, 2)?;
//!     let coordinator: Coordinator<i64> = Coordinator::new(config);
//!     let mut fleet = ProcessFleet::new(ProcessFleetConfig::default());
//!
//!     let a = Matrix::from_rows(vec![vec![1, 2, 3], vec![4, 5, 6], vec![7, 8, 9], vec![1, 0, 1]])?;
//!     let b = Matrix::from_rows(vec![vec![1, 0], vec![0, 1], vec![1, 1]])?;
//!
//!     let c = coordinator.multiply_with_fleet(&mut fleet, &a, &b).await?;
//!     assert_eq!(c, a.multiply(&b)?);
//!     Ok(())
//! }
//! ```

mod config;
mod coordinator;
mod error;
mod fleet;
mod partition;

pub use config::{CoordinatorConfig, DEFAULT_ADDRESS, DEFAULT_BASE_PORT, DispatchMode, Host};
pub use coordinator::{Coordinator, ResultSlots};
pub use error::{Error, PartitionError};
pub use fleet::{ExternalFleet, ProcessFleet, ProcessFleetConfig, Readiness, WorkerFleet};
pub use partition::{Chunk, partition, row_counts};

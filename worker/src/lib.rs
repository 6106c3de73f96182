//! Worker side of the distributed matrix multiplication protocol.
//!
//! A worker listens on a fixed address, reads one framed task `(A_sub, B)`
//! per connection, answers with the framed product `A_sub · B` and closes
//! the connection. Malformed tasks, dimension mismatches and stalled peers
//! only cost the connection they arrived on.
//!
//! # Example
//!
//! ```no_run
//! use matmul_worker::{Worker, WorkerConfig};
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let listener = TcpListener::bind("127.0.0.1:5000").await?;
//!     let worker: Worker<i64> = Worker::new(WorkerConfig::default());
//!
//!     let stats = worker
//!         .serve(listener, async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await;
//!     println!("served {} tasks", stats.served);
//!     Ok(())
//! }
//! ```

mod error;
mod service;

pub use error::Error;
pub use service::{Outcome, ServeStats, Worker, WorkerConfig};

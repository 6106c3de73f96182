//! Fan-out/fan-in of one distributed multiplication.

use std::future::Future;
use std::marker::PhantomData;
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use matmul_protocol::{
    BinaryCodec, Codec, Element, FrameError, Matrix, recv_frame_limited, result_len, send_frame,
};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::config::{CoordinatorConfig, DispatchMode, Host};
use crate::error::{Error, PartitionError};
use crate::fleet::{ExternalFleet, Readiness, WorkerFleet};
use crate::partition::partition;

/// An encoded task bound to its host, ready to send.
struct Job<'a> {
    index: usize,
    host: &'a Host,
    start_row: usize,
    row_count: usize,
    cols: usize,
    payload: Vec<u8>,
    /// Exact size of the result frame this task should produce.
    expected_len: usize,
}

/// Distributed matrix multiplication coordinator.
///
/// `Coordinator` splits the left operand into one row-block per configured
/// host, sends each host its block together with the full right operand and
/// stacks the returned blocks in partition order.
///
/// # Example
///
/// ```no_run
/// use matrix_mul::{Coordinator, CoordinatorConfig};
/// use matmul_protocol::Matrix;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = CoordinatorConfig::with_sequential_hosts("localhost", 5000, 2)?;
///     let coordinator: Coordinator<i64> = Coordinator::new(config);
///
///     let a = Matrix::from_rows(vec![vec![1, 2], vec![3, 4]])?;
///     let b = Matrix::from_rows(vec![vec![5, 6], vec![7, 8]])?;
///
///     let c = coordinator.multiply(&a, &b).await?;
///     assert_eq!(c, Matrix::from_rows(vec![vec![19, 22], vec![43, 50]])?);
///     Ok(())
/// }
/// ```
pub struct Coordinator<T, C = BinaryCodec> {
    config: CoordinatorConfig,
    codec: C,
    _element: PhantomData<fn() -> T>,
}

impl<T: Element> Coordinator<T, BinaryCodec> {
    pub fn new(config: CoordinatorConfig) -> Self {
        Self::with_codec(config, BinaryCodec)
    }
}

impl<T: Element, C: Codec<T>> Coordinator<T, C> {
    pub fn with_codec(config: CoordinatorConfig, codec: C) -> Self {
        Self {
            config,
            codec,
            _element: PhantomData,
        }
    }

    /// Computes `a · b` on the configured hosts, which must already be listening.
    pub async fn multiply(&self, a: &Matrix<T>, b: &Matrix<T>) -> Result<Matrix<T>, Error> {
        self.multiply_with_fleet(&mut ExternalFleet, a, b).await
    }

    /// Starts `fleet`, computes `a · b` and shuts the fleet down again,
    /// whatever the outcome.
    pub async fn multiply_with_fleet<F>(
        &self,
        fleet: &mut F,
        a: &Matrix<T>,
        b: &Matrix<T>,
    ) -> Result<Matrix<T>, Error>
    where
        F: WorkerFleet + ?Sized,
    {
        self.multiply_until(fleet, a, b, std::future::pending()).await
    }

    /// Like [`multiply_with_fleet`](Self::multiply_with_fleet), but gives up
    /// with [`Error::Cancelled`] as soon as `cancel` resolves.
    ///
    /// Cancelling drops every in-flight exchange, closing its socket, before
    /// the fleet is shut down.
    pub async fn multiply_until<F, S>(
        &self,
        fleet: &mut F,
        a: &Matrix<T>,
        b: &Matrix<T>,
        cancel: S,
    ) -> Result<Matrix<T>, Error>
    where
        F: WorkerFleet + ?Sized,
        S: Future<Output = ()>,
    {
        let jobs = self.prepare(a, b)?;

        let result = tokio::select! {
            result = self.start_and_execute(&mut *fleet, jobs) => result,
            _ = cancel => {
                warn!("computation cancelled");
                Err(Error::Cancelled)
            }
        };

        fleet.shutdown().await;
        result
    }

    async fn start_and_execute<F>(&self, fleet: &mut F, jobs: Vec<Job<'_>>) -> Result<Matrix<T>, Error>
    where
        F: WorkerFleet + ?Sized,
    {
        let readiness = fleet.start(&self.config.hosts).await?;
        self.execute(jobs, readiness).await
    }

    /// Validates operands, partitions `a` and encodes one task per host.
    ///
    /// Nothing touches the network before this succeeds.
    fn prepare<'a>(&'a self, a: &Matrix<T>, b: &Matrix<T>) -> Result<Vec<Job<'a>>, Error> {
        if a.cols() != b.rows() {
            return Err(Error::DimensionMismatch(a.rows(), a.cols(), b.rows(), b.cols()));
        }

        let chunks = partition(a, self.config.hosts.len())?;
        chunks
            .into_iter()
            .zip(&self.config.hosts)
            .map(|(chunk, host)| -> Result<Job<'a>, Error> {
                Ok(Job {
                    index: chunk.index,
                    host,
                    start_row: chunk.start_row,
                    row_count: chunk.row_count,
                    cols: b.cols(),
                    payload: self.codec.encode_task(&chunk.matrix, b)?,
                    expected_len: result_len(T::DTYPE, chunk.row_count, b.cols()),
                })
            })
            .collect()
    }

    /// Dispatches every job whose host came up and collects the outcomes.
    ///
    /// Hosts that failed readiness are recorded as failed partitions without
    /// being contacted.
    async fn execute(&self, jobs: Vec<Job<'_>>, readiness: Readiness) -> Result<Matrix<T>, Error> {
        let mut slots = ResultSlots::new(jobs.len());
        let mut readiness = readiness.into_iter();
        let mut ready = Vec::with_capacity(jobs.len());
        for job in &jobs {
            match readiness.next() {
                Some(Err(e)) => slots.insert(job.index, Err(e)),
                _ => ready.push(job),
            }
        }

        info!(
            workers = ready.len(),
            unavailable = jobs.len() - ready.len(),
            mode = ?self.config.dispatch,
            "dispatching tasks"
        );

        match self.config.dispatch {
            DispatchMode::Concurrent => {
                let mut pending: FuturesUnordered<_> = ready
                    .into_iter()
                    .map(|job| async move { (job.index, self.dispatch(job).await) })
                    .collect();
                while let Some((index, outcome)) = pending.next().await {
                    slots.insert(index, outcome);
                }
            }
            DispatchMode::Sequential => {
                for job in ready {
                    slots.insert(job.index, self.dispatch(job).await);
                }
            }
        }

        slots.assemble()
    }

    /// One connect-send-receive cycle against one host.
    async fn dispatch(&self, job: &Job<'_>) -> Result<Matrix<T>, PartitionError> {
        let mut stream = self.connect(job.host).await?;
        debug!(
            partition = job.index,
            host = %job.host,
            start_row = job.start_row,
            rows = job.row_count,
            bytes = job.payload.len(),
            "sending task"
        );

        let io_timeout = self.config.io_timeout;
        let exchange = round_trip(&mut stream, &job.payload, job.expected_len);
        let response = tokio::time::timeout(io_timeout, exchange)
            .await
            .map_err(|_| PartitionError::Timeout(io_timeout))??;

        let block = self.codec.decode_result(&response)?;
        if block.shape() != (job.row_count, job.cols) {
            return Err(PartitionError::UnexpectedShape {
                expected_rows: job.row_count,
                expected_cols: job.cols,
                rows: block.rows(),
                cols: block.cols(),
            });
        }
        Ok(block)
    }

    /// Connects to `host`, retrying with exponential backoff.
    async fn connect(&self, host: &Host) -> Result<TcpStream, PartitionError> {
        let max_attempts = self.config.max_connect_attempts.max(1);
        let mut attempts = 0;
        let mut delay = self.config.retry_delay;

        loop {
            attempts += 1;
            let addr = (host.address.as_str(), host.port);
            let error = match tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => return Ok(stream),
                Ok(Err(e)) => e,
                Err(_) => std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("connect timed out after {:?}", self.config.connect_timeout),
                ),
            };

            if attempts >= max_attempts {
                return Err(PartitionError::WorkerUnreachable {
                    host: host.clone(),
                    attempts,
                    source: error,
                });
            }

            debug!(%host, attempts, error = %error, retry_in = ?delay, "connect failed");
            tokio::time::sleep(delay).await;
            delay = delay.saturating_mul(2).min(Duration::from_secs(30));
        }
    }
}

/// Sends one task and reads back a response of at most `limit` bytes.
async fn round_trip(
    stream: &mut TcpStream,
    payload: &[u8],
    limit: usize,
) -> Result<Vec<u8>, FrameError> {
    send_frame(stream, payload).await?;
    recv_frame_limited(stream, limit).await
}

/// Per-partition outcomes, one slot per index, stacked by index.
///
/// Arrival order never matters: a slot is filled once and blocks are read
/// back in index order.
pub struct ResultSlots<T> {
    slots: Vec<Option<Result<Matrix<T>, PartitionError>>>,
}

impl<T: Element> ResultSlots<T> {
    pub fn new(partitions: usize) -> Self {
        Self {
            slots: (0..partitions).map(|_| None).collect(),
        }
    }

    /// Records the outcome for `index`. Out-of-range and repeated indices are
    /// ignored.
    pub fn insert(&mut self, index: usize, outcome: Result<Matrix<T>, PartitionError>) {
        match &outcome {
            Ok(block) => debug!(partition = index, rows = block.rows(), "result received"),
            Err(e) => warn!(partition = index, error = %e, "partition failed"),
        }

        match self.slots.get_mut(index) {
            Some(slot) if slot.is_none() => *slot = Some(outcome),
            Some(_) => warn!(partition = index, "duplicate result ignored"),
            None => warn!(partition = index, "result for unknown partition ignored"),
        }
    }

    /// Stacks every block in index order, or names the partitions without one.
    pub fn assemble(self) -> Result<Matrix<T>, Error> {
        let mut blocks = Vec::with_capacity(self.slots.len());
        let mut missing = Vec::new();
        let mut failures = Vec::new();

        for (index, slot) in self.slots.into_iter().enumerate() {
            match slot {
                Some(Ok(block)) => blocks.push(block),
                Some(Err(e)) => {
                    missing.push(index);
                    failures.push((index, e));
                }
                None => missing.push(index),
            }
        }

        if !missing.is_empty() {
            return Err(Error::PartialComputationFailure { missing, failures });
        }
        Ok(Matrix::vstack(&blocks)?)
    }
}

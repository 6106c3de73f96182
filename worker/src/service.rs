//! Accept loop and per-connection request handling.

use std::future::Future;
use std::marker::PhantomData;
use std::time::Duration;

use matmul_protocol::{BinaryCodec, Codec, Element, FrameError, recv_frame_limited, send_frame};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::TcpListenerStream;
use tracing::{debug, info, warn};

use crate::error::Error;

const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_FRAME_BYTES: usize = 512 * 1024 * 1024;

/// Runtime settings for a worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Upper bound on receiving one task and sending its result.
    pub read_timeout: Duration,
    /// Task frames declaring more bytes than this are refused.
    pub max_frame_bytes: usize,
    /// Stop after the first connection that carried a task.
    pub once: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            read_timeout: DEFAULT_READ_TIMEOUT,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            once: false,
        }
    }
}

/// What happened on one accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A task was computed and its result written back.
    Served { rows: usize, cols: usize },
    /// The peer closed without sending anything, e.g. a readiness probe.
    Probe,
}

/// Connection counters reported when the accept loop stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServeStats {
    pub served: u64,
    pub failed: u64,
    pub probes: u64,
}

/// Multiplies one row-block per connection.
///
/// A `Worker` holds no state between connections; every accepted stream is
/// read, answered and closed before the next one is accepted.
pub struct Worker<T, C = BinaryCodec> {
    codec: C,
    config: WorkerConfig,
    _element: PhantomData<fn() -> T>,
}

impl<T: Element> Worker<T, BinaryCodec> {
    pub fn new(config: WorkerConfig) -> Self {
        Self::with_codec(BinaryCodec, config)
    }
}

impl<T: Element, C: Codec<T>> Worker<T, C> {
    pub fn with_codec(codec: C, config: WorkerConfig) -> Self {
        Self {
            codec,
            config,
            _element: PhantomData,
        }
    }

    /// Accepts connections until `shutdown` resolves, or until the first task
    /// in one-shot mode.
    ///
    /// Failures on a single connection are logged and never end the loop.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> ServeStats
    where
        F: Future<Output = ()>,
    {
        let mut stats = ServeStats::default();
        let mut incoming = TcpListenerStream::new(listener);
        tokio::pin!(shutdown);

        loop {
            let next = tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested");
                    break;
                }
                next = incoming.next() => next,
            };

            let mut stream = match next {
                Some(Ok(stream)) => stream,
                Some(Err(e)) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
                None => break,
            };

            let peer = stream.peer_addr().ok();
            debug!(?peer, "connection accepted");

            match self.handle_connection(&mut stream).await {
                Ok(Outcome::Served { rows, cols }) => {
                    stats.served += 1;
                    info!(?peer, rows, cols, "task served");
                }
                Ok(Outcome::Probe) => {
                    stats.probes += 1;
                    debug!(?peer, "peer closed without sending a task");
                    continue;
                }
                Err(e) => {
                    stats.failed += 1;
                    warn!(?peer, error = %e, "dropping connection");
                }
            }
            drop(stream);

            if self.config.once {
                break;
            }
        }

        stats
    }

    /// Reads one task from `stream`, computes it and writes back the result.
    ///
    /// The whole exchange is bounded by the configured read timeout.
    pub async fn handle_connection<S>(&self, stream: &mut S) -> Result<Outcome, Error>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        tokio::time::timeout(self.config.read_timeout, self.exchange(stream))
            .await
            .map_err(|_| Error::Timeout(self.config.read_timeout))?
    }

    async fn exchange<S>(&self, stream: &mut S) -> Result<Outcome, Error>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let payload = match recv_frame_limited(stream, self.config.max_frame_bytes).await {
            Ok(payload) => payload,
            Err(FrameError::ConnectionClosed { received: 0 }) => return Ok(Outcome::Probe),
            Err(e) => return Err(e.into()),
        };
        debug!(bytes = payload.len(), "task frame received");

        let (response, rows, cols) = self.compute(&payload)?;
        send_frame(stream, &response).await?;
        Ok(Outcome::Served { rows, cols })
    }

    /// Decodes a task payload, multiplies and encodes the result.
    ///
    /// Returns the encoded result along with its shape.
    pub fn compute(&self, payload: &[u8]) -> Result<(Vec<u8>, usize, usize), Error> {
        let task = self.codec.decode_task(payload)?;
        let (a_rows, a_cols) = task.a_sub.shape();
        let (b_rows, b_cols) = task.b.shape();
        if a_cols != b_rows {
            return Err(Error::DimensionMismatch(a_rows, a_cols, b_rows, b_cols));
        }

        let c_sub = task.a_sub.multiply(&task.b)?;
        let response = self.codec.encode_result(&c_sub)?;
        Ok((response, c_sub.rows(), c_sub.cols()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matmul_protocol::{Matrix, recv_frame};
    use tokio::io::{AsyncWriteExt, duplex};

    fn worker() -> Worker<i64> {
        Worker::new(WorkerConfig::default())
    }

    #[tokio::test]
    async fn answers_a_task_with_the_product() {
        let a = Matrix::from_rows(vec![vec![1i64, 2, 3], vec![4, 5, 6]]).unwrap();
        let b = Matrix::from_rows(vec![vec![1i64, 0], vec![0, 1], vec![1, 1]]).unwrap();
        let (mut client, mut server) = duplex(1024);

        let worker = worker();
        let handle = tokio::spawn(async move { worker.handle_connection(&mut server).await });

        send_frame(&mut client, &BinaryCodec.encode_task(&a, &b).unwrap())
            .await
            .unwrap();
        let payload = recv_frame(&mut client).await.unwrap();
        let c: Matrix<i64> = BinaryCodec.decode_result(&payload).unwrap();

        assert_eq!(c, a.multiply(&b).unwrap());
        assert_eq!(
            handle.await.unwrap().unwrap(),
            Outcome::Served { rows: 2, cols: 2 }
        );
    }

    #[tokio::test]
    async fn dimension_mismatch_closes_without_response() {
        let a = Matrix::<i64>::zeros(2, 3);
        let b = Matrix::<i64>::zeros(2, 2);
        let (mut client, mut server) = duplex(1024);

        let worker = worker();
        let handle = tokio::spawn(async move {
            let outcome = worker.handle_connection(&mut server).await;
            drop(server);
            outcome
        });

        send_frame(&mut client, &BinaryCodec.encode_task(&a, &b).unwrap())
            .await
            .unwrap();

        assert!(matches!(
            handle.await.unwrap(),
            Err(Error::DimensionMismatch(2, 3, 2, 2))
        ));
        assert!(matches!(
            recv_frame(&mut client).await,
            Err(FrameError::ConnectionClosed { received: 0 })
        ));
    }

    #[tokio::test]
    async fn corrupt_payload_is_a_codec_error() {
        let (mut client, mut server) = duplex(1024);
        let worker = worker();
        let handle = tokio::spawn(async move { worker.handle_connection(&mut server).await });

        send_frame(&mut client, b"not a task").await.unwrap();
        assert!(matches!(handle.await.unwrap(), Err(Error::Codec(_))));
    }

    #[tokio::test]
    async fn wrong_dtype_is_a_codec_error() {
        let a = Matrix::<f64>::zeros(1, 1);
        let (mut client, mut server) = duplex(1024);
        let worker = worker();
        let handle = tokio::spawn(async move { worker.handle_connection(&mut server).await });

        send_frame(&mut client, &BinaryCodec.encode_task(&a, &a).unwrap())
            .await
            .unwrap();
        assert!(matches!(handle.await.unwrap(), Err(Error::Codec(_))));
    }

    #[tokio::test]
    async fn silent_close_is_a_probe() {
        let (client, mut server) = duplex(64);
        drop(client);
        assert_eq!(
            worker().handle_connection(&mut server).await.unwrap(),
            Outcome::Probe
        );
    }

    #[tokio::test]
    async fn truncated_task_is_reported() {
        let (mut client, mut server) = duplex(64);
        client.write_all(&100u32.to_be_bytes()).await.unwrap();
        drop(client);
        assert!(matches!(
            worker().handle_connection(&mut server).await,
            Err(Error::Frame(FrameError::TruncatedFrame { expected: 100, received: 0 }))
        ));
    }

    #[tokio::test]
    async fn stalled_peer_times_out() {
        let (_client, mut server) = duplex(64);
        let worker: Worker<i64> = Worker::new(WorkerConfig {
            read_timeout: Duration::from_millis(50),
            ..WorkerConfig::default()
        });
        assert!(matches!(
            worker.handle_connection(&mut server).await,
            Err(Error::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn oversized_task_is_refused() {
        let (mut client, mut server) = duplex(64);
        let worker: Worker<i64> = Worker::new(WorkerConfig {
            max_frame_bytes: 16,
            ..WorkerConfig::default()
        });
        client.write_all(&17u32.to_be_bytes()).await.unwrap();
        assert!(matches!(
            worker.handle_connection(&mut server).await,
            Err(Error::Frame(FrameError::FrameTooLarge { len: 17, limit: 16 }))
        ));
    }
}

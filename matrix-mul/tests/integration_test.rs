use std::path::PathBuf;
use std::time::Duration;

use matmul_protocol::{FrameError, Matrix, recv_frame, send_frame};
use matmul_worker::{ServeStats, Worker, WorkerConfig};
use matrix_mul::{
    Coordinator, CoordinatorConfig, DispatchMode, Error, ExternalFleet, Host, PartitionError,
    ProcessFleet, ProcessFleetConfig, Readiness, WorkerFleet,
};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::sleep;

async fn bind() -> (Host, TcpListener) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (Host::new("127.0.0.1", port), listener)
}

async fn start_test_worker() -> (Host, JoinHandle<ServeStats>) {
    let (host, listener) = bind().await;
    let worker: Worker<i64> = Worker::new(WorkerConfig::default());
    let handle = tokio::spawn(async move { worker.serve(listener, std::future::pending()).await });
    (host, handle)
}

/// Accepts connections and never answers.
async fn start_silent_worker() -> Host {
    let (host, listener) = bind().await;
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    host
}

/// Reads the task, then sends only a plausible length header before closing.
async fn start_truncating_worker() -> Host {
    let (host, listener) = bind().await;
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            if recv_frame(&mut stream).await.is_err() {
                continue;
            }
            let _ = stream.write_all(&40u32.to_be_bytes()).await;
            let _ = stream.flush().await;
        }
    });
    host
}

/// Reads the task, then declares a result far larger than any block.
async fn start_oversized_worker() -> Host {
    let (host, listener) = bind().await;
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            if recv_frame(&mut stream).await.is_err() {
                continue;
            }
            let _ = stream.write_all(&u32::MAX.to_be_bytes()).await;
            let _ = stream.flush().await;
            sleep(Duration::from_secs(1)).await;
        }
    });
    host
}

/// A real worker that waits `delay` before computing.
async fn start_slow_worker(delay: Duration) -> Host {
    let (host, listener) = bind().await;
    tokio::spawn(async move {
        let worker: Worker<i64> = Worker::new(WorkerConfig::default());
        while let Ok((mut stream, _)) = listener.accept().await {
            let Ok(payload) = recv_frame(&mut stream).await else {
                continue;
            };
            sleep(delay).await;
            let (response, _, _) = worker.compute(&payload).unwrap();
            send_frame(&mut stream, &response).await.unwrap();
        }
    });
    host
}

fn test_config(hosts: Vec<Host>) -> CoordinatorConfig {
    CoordinatorConfig {
        io_timeout: Duration::from_secs(5),
        retry_delay: Duration::from_millis(10),
        ..CoordinatorConfig::with_hosts(hosts)
    }
}

fn operands() -> (Matrix<i64>, Matrix<i64>) {
    let a = Matrix::from_rows(vec![
        vec![1, 2, 3],
        vec![4, 5, 6],
        vec![7, 8, 9],
        vec![10, 11, 12],
    ])
    .unwrap();
    let b = Matrix::from_rows(vec![vec![1, 0], vec![0, 1], vec![2, -1]]).unwrap();
    (a, b)
}

#[tokio::test]
async fn test_two_workers_match_direct_product() {
    let (first, _h1) = start_test_worker().await;
    let (second, _h2) = start_test_worker().await;
    let (a, b) = operands();

    let coordinator: Coordinator<i64> = Coordinator::new(test_config(vec![first, second]));
    let c = coordinator.multiply(&a, &b).await.unwrap();

    assert_eq!(c.shape(), (4, 2));
    assert_eq!(c, a.multiply(&b).unwrap());
}

#[tokio::test]
async fn test_one_worker_per_row() {
    let mut hosts = Vec::new();
    for _ in 0..4 {
        hosts.push(start_test_worker().await.0);
    }
    let (a, b) = operands();

    let coordinator: Coordinator<i64> = Coordinator::new(test_config(hosts));
    assert_eq!(
        coordinator.multiply(&a, &b).await.unwrap(),
        a.multiply(&b).unwrap()
    );
}

#[tokio::test]
async fn test_late_first_partition_keeps_row_order() {
    for dispatch in [DispatchMode::Concurrent, DispatchMode::Sequential] {
        let slow = start_slow_worker(Duration::from_millis(200)).await;
        let (fast, _handle) = start_test_worker().await;
        let (a, b) = operands();

        let config = CoordinatorConfig {
            dispatch,
            ..test_config(vec![slow, fast])
        };
        let coordinator: Coordinator<i64> = Coordinator::new(config);
        assert_eq!(
            coordinator.multiply(&a, &b).await.unwrap(),
            a.multiply(&b).unwrap(),
            "{dispatch:?}"
        );
    }
}

#[tokio::test]
async fn test_silent_worker_is_named_in_failure() {
    let (good, _handle) = start_test_worker().await;
    let silent = start_silent_worker().await;
    let (a, b) = operands();

    let config = CoordinatorConfig {
        io_timeout: Duration::from_millis(200),
        ..test_config(vec![good, silent])
    };
    let coordinator: Coordinator<i64> = Coordinator::new(config);
    let err = coordinator.multiply(&a, &b).await.unwrap_err();

    assert_eq!(err.missing_partitions(), Some(&[1][..]));
    match err {
        Error::PartialComputationFailure { failures, .. } => {
            assert_eq!(failures.len(), 1);
            assert!(matches!(failures[0], (1, PartitionError::Timeout(_))));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_truncated_response_fails_only_its_partition() {
    let (good, _handle) = start_test_worker().await;
    let truncating = start_truncating_worker().await;
    let (a, b) = operands();

    let coordinator: Coordinator<i64> = Coordinator::new(test_config(vec![truncating, good]));
    match coordinator.multiply(&a, &b).await.unwrap_err() {
        Error::PartialComputationFailure { missing, failures } => {
            assert_eq!(missing, vec![0]);
            assert!(matches!(
                failures[0],
                (
                    0,
                    PartitionError::Frame(FrameError::TruncatedFrame { expected: 40, received: 0 })
                )
            ));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_oversized_response_header_fails_only_its_partition() {
    let (good, _handle) = start_test_worker().await;
    let oversized = start_oversized_worker().await;
    let (a, b) = operands();

    let coordinator: Coordinator<i64> = Coordinator::new(test_config(vec![oversized, good]));
    match coordinator.multiply(&a, &b).await.unwrap_err() {
        Error::PartialComputationFailure { missing, failures } => {
            assert_eq!(missing, vec![0]);
            // 2x2 block of i64 plus message and matrix headers.
            let limit = (6 + 9 + 2 * 2 * 8) as u64;
            match &failures[0] {
                (0, PartitionError::Frame(FrameError::FrameTooLarge { len, limit: l })) => {
                    assert_eq!(*len, u64::from(u32::MAX));
                    assert_eq!(*l, limit);
                }
                other => panic!("unexpected failure: {other:?}"),
            }
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_unreachable_worker_exhausts_retries() {
    let (good, _handle) = start_test_worker().await;
    let (closed, listener) = bind().await;
    drop(listener);
    let (a, b) = operands();

    let config = CoordinatorConfig {
        max_connect_attempts: 2,
        ..test_config(vec![good, closed.clone()])
    };
    let coordinator: Coordinator<i64> = Coordinator::new(config);
    match coordinator.multiply(&a, &b).await.unwrap_err() {
        Error::PartialComputationFailure { missing, failures } => {
            assert_eq!(missing, vec![1]);
            match &failures[0] {
                (1, PartitionError::WorkerUnreachable { host, attempts, .. }) => {
                    assert_eq!(host, &closed);
                    assert_eq!(*attempts, 2);
                }
                other => panic!("unexpected failure: {other:?}"),
            }
        }
        other => panic!("unexpected error: {other}"),
    }
}

struct CountingFleet {
    started: usize,
    stopped: usize,
}

#[async_trait::async_trait]
impl WorkerFleet for CountingFleet {
    async fn start(&mut self, hosts: &[Host]) -> Result<Readiness, Error> {
        self.started += 1;
        Ok(hosts.iter().map(|_| Ok(())).collect())
    }

    async fn shutdown(&mut self) {
        self.stopped += 1;
    }
}

#[tokio::test]
async fn test_cancel_stops_waiting_and_shuts_down_fleet() {
    let silent = start_silent_worker().await;
    let (a, b) = operands();

    let coordinator: Coordinator<i64> = Coordinator::new(test_config(vec![silent]));
    let mut fleet = CountingFleet {
        started: 0,
        stopped: 0,
    };
    let result = coordinator
        .multiply_until(&mut fleet, &a, &b, sleep(Duration::from_millis(100)))
        .await;

    assert!(matches!(result, Err(Error::Cancelled)));
    assert_eq!((fleet.started, fleet.stopped), (1, 1));
}

#[tokio::test]
async fn test_invalid_input_never_starts_fleet() {
    let (a, _) = operands();
    let coordinator: Coordinator<i64> =
        Coordinator::new(test_config(vec![Host::new("127.0.0.1", 1)]));
    let mut fleet = CountingFleet {
        started: 0,
        stopped: 0,
    };

    let result = coordinator.multiply_with_fleet(&mut fleet, &a, &a).await;
    assert!(matches!(result, Err(Error::DimensionMismatch(4, 3, 4, 3))));
    assert_eq!(fleet.started, 0);
}

#[tokio::test]
async fn test_external_fleet_round_trip() {
    let (host, _handle) = start_test_worker().await;
    let (a, b) = operands();

    let coordinator: Coordinator<i64> = Coordinator::new(test_config(vec![host]));
    let c = coordinator
        .multiply_with_fleet(&mut ExternalFleet, &a, &b)
        .await
        .unwrap();
    assert_eq!(c, a.multiply(&b).unwrap());
}

#[tokio::test]
async fn test_one_shot_worker_ignores_probes() {
    let (host, listener) = bind().await;
    let worker: Worker<i64> = Worker::new(WorkerConfig {
        once: true,
        ..WorkerConfig::default()
    });
    let handle = tokio::spawn(async move { worker.serve(listener, std::future::pending()).await });

    let probe = TcpStream::connect((host.address.as_str(), host.port))
        .await
        .unwrap();
    drop(probe);

    let (a, b) = operands();
    let coordinator: Coordinator<i64> = Coordinator::new(test_config(vec![host]));
    assert_eq!(
        coordinator.multiply(&a, &b).await.unwrap(),
        a.multiply(&b).unwrap()
    );

    let stats = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        stats,
        ServeStats {
            served: 1,
            failed: 0,
            probes: 1,
        }
    );
}

#[tokio::test]
async fn test_spawned_worker_that_exits_fails_only_its_partition() {
    // Host 0 is served in-process, so the spawned program only needs to die.
    let (served, _handle) = start_test_worker().await;
    let (dead, listener) = bind().await;
    drop(listener);
    let (a, b) = operands();

    let mut fleet = ProcessFleet::new(ProcessFleetConfig {
        program: PathBuf::from("false"),
        readiness_timeout: Duration::from_secs(3),
        ..ProcessFleetConfig::default()
    });
    let config = CoordinatorConfig {
        max_connect_attempts: 1,
        ..test_config(vec![served, dead.clone()])
    };
    let coordinator: Coordinator<i64> = Coordinator::new(config);
    let err = coordinator
        .multiply_with_fleet(&mut fleet, &a, &b)
        .await
        .unwrap_err();

    assert_eq!(err.missing_partitions(), Some(&[1][..]));
    match err {
        Error::PartialComputationFailure { failures, .. } => {
            assert_eq!(failures.len(), 1);
            match &failures[0] {
                (1, PartitionError::WorkerUnreachable { host, .. }) => assert_eq!(host, &dead),
                other => panic!("unexpected failure: {other:?}"),
            }
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(fleet.running(), 0);
}

//! Worker lifecycle: making hosts reachable before dispatch and tearing
//! them down afterwards.

use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use matmul_protocol::DType;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::Host;
use crate::error::{Error, PartitionError};

const DEFAULT_READINESS_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_millis(50);
const MAX_PROBE_INTERVAL: Duration = Duration::from_secs(1);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Whether each host, in host order, accepted connections after `start`.
pub type Readiness = Vec<Result<(), PartitionError>>;

/// Something that owns (or vouches for) the workers behind a host list.
#[async_trait]
pub trait WorkerFleet: Send {
    /// Makes every host ready to accept a task.
    ///
    /// A host that never comes up is reported in the returned [`Readiness`]
    /// and costs only its own partition. `Err` means no host can be used.
    async fn start(&mut self, hosts: &[Host]) -> Result<Readiness, Error>;

    /// Releases whatever `start` acquired. Safe to call more than once.
    async fn shutdown(&mut self);
}

/// Workers managed outside this process; assumed to be listening already.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExternalFleet;

#[async_trait]
impl WorkerFleet for ExternalFleet {
    async fn start(&mut self, hosts: &[Host]) -> Result<Readiness, Error> {
        debug!(workers = hosts.len(), "using externally managed workers");
        Ok(hosts.iter().map(|_| Ok(())).collect())
    }

    async fn shutdown(&mut self) {}
}

/// Settings for spawning `matmul-worker` subprocesses.
#[derive(Debug, Clone)]
pub struct ProcessFleetConfig {
    pub program: PathBuf,
    pub dtype: DType,
    /// How long a spawned worker may take to start accepting connections.
    pub readiness_timeout: Duration,
    /// First delay between readiness probes; doubles up to one second.
    pub probe_interval: Duration,
    pub extra_args: Vec<String>,
}

impl Default for ProcessFleetConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("matmul-worker"),
            dtype: DType::I64,
            readiness_timeout: DEFAULT_READINESS_TIMEOUT,
            probe_interval: DEFAULT_PROBE_INTERVAL,
            extra_args: Vec::new(),
        }
    }
}

/// One one-shot worker subprocess per host.
///
/// Children are killed on [`shutdown`](WorkerFleet::shutdown) and, as a last
/// resort, when the fleet is dropped.
pub struct ProcessFleet {
    config: ProcessFleetConfig,
    children: Vec<(Host, Child)>,
}

impl ProcessFleet {
    pub fn new(config: ProcessFleetConfig) -> Self {
        Self {
            config,
            children: Vec::new(),
        }
    }

    pub fn running(&self) -> usize {
        self.children.len()
    }

    fn spawn(&self, host: &Host) -> Result<Child, Error> {
        let mut command = Command::new(&self.config.program);
        command
            .arg("--host")
            .arg(&host.address)
            .arg("--port")
            .arg(host.port.to_string())
            .arg("--dtype")
            .arg(self.config.dtype.name())
            .arg("--once")
            .args(&self.config.extra_args)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        command.spawn().map_err(|e| {
            Error::fleet_with_source(
                format!(
                    "failed to spawn {} for {}",
                    self.config.program.display(),
                    host
                ),
                e,
            )
        })
    }
}

#[async_trait]
impl WorkerFleet for ProcessFleet {
    async fn start(&mut self, hosts: &[Host]) -> Result<Readiness, Error> {
        let first = self.children.len();
        for host in hosts {
            let child = self.spawn(host)?;
            info!(%host, pid = ?child.id(), "spawned worker");
            self.children.push((host.clone(), child));
        }

        let deadline = Instant::now() + self.config.readiness_timeout;
        let config = &self.config;
        let readiness = join_all(
            self.children[first..]
                .iter_mut()
                .map(|(host, child)| wait_ready(host, child, config, deadline)),
        )
        .await;

        for outcome in &readiness {
            if let Err(e) = outcome {
                warn!(error = %e, "worker not ready");
            }
        }
        Ok(readiness)
    }

    async fn shutdown(&mut self) {
        for (host, mut child) in self.children.drain(..) {
            if let Ok(Some(status)) = child.try_wait() {
                debug!(%host, %status, "worker already exited");
                continue;
            }
            if let Err(e) = child.start_kill() {
                warn!(%host, error = %e, "failed to kill worker");
                continue;
            }
            match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
                Ok(Ok(status)) => debug!(%host, %status, "worker stopped"),
                Ok(Err(e)) => warn!(%host, error = %e, "failed to reap worker"),
                Err(_) => warn!(%host, "worker did not exit after kill"),
            }
        }
    }
}

/// Polls `host` with connect attempts until it accepts, its process exits or
/// the deadline passes.
async fn wait_ready(
    host: &Host,
    child: &mut Child,
    config: &ProcessFleetConfig,
    deadline: Instant,
) -> Result<(), PartitionError> {
    let addr = (host.address.as_str(), host.port);
    let mut interval = config.probe_interval;
    let mut attempts = 0;

    loop {
        attempts += 1;
        let error = match tokio::time::timeout_at(deadline, TcpStream::connect(addr)).await {
            Ok(Ok(_probe)) => {
                debug!(%host, attempts, "worker ready");
                return Ok(());
            }
            Ok(Err(e)) => e,
            Err(_) => io::Error::new(
                io::ErrorKind::TimedOut,
                format!("not ready within {:?}", config.readiness_timeout),
            ),
        };

        if let Ok(Some(status)) = child.try_wait() {
            return Err(PartitionError::WorkerUnreachable {
                host: host.clone(),
                attempts,
                source: io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    format!("worker exited before accepting connections ({})", status),
                ),
            });
        }

        if Instant::now() + interval >= deadline {
            return Err(PartitionError::WorkerUnreachable {
                host: host.clone(),
                attempts,
                source: error,
            });
        }

        tokio::time::sleep(interval).await;
        interval = (interval * 2).min(MAX_PROBE_INTERVAL);
    }
}

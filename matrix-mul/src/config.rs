//! Coordinator configuration: worker addresses, timeouts and retry budget.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::Error;

pub const DEFAULT_ADDRESS: &str = "localhost";
pub const DEFAULT_BASE_PORT: u16 = 5000;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_CONNECT_ATTEMPTS: u32 = 5;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// One worker endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Host {
    pub address: String,
    pub port: u16,
}

impl Host {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }

    /// `count` hosts on `address` with ports `base_port, base_port + 1, ...`.
    pub fn sequential(address: &str, base_port: u16, count: usize) -> Result<Vec<Host>, Error> {
        (0..count)
            .map(|i| {
                u16::try_from(i)
                    .ok()
                    .and_then(|offset| base_port.checked_add(offset))
                    .map(|port| Host::new(address, port))
                    .ok_or(Error::PortRange { base_port, count })
            })
            .collect()
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

impl FromStr for Host {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (address, port) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("expected host:port, got '{}'", s))?;
        if address.is_empty() {
            return Err(format!("missing address in '{}'", s));
        }
        let port = port
            .parse::<u16>()
            .map_err(|e| format!("invalid port in '{}': {}", s, e))?;
        Ok(Host::new(address, port))
    }
}

/// How the per-host request cycles are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
    /// All hosts are in flight at once; results arrive in any order.
    #[default]
    Concurrent,
    /// One host at a time, in partition order.
    Sequential,
}

/// Settings for one [`Coordinator`](crate::Coordinator).
///
/// The number of hosts is the number of partitions.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub hosts: Vec<Host>,
    /// Bound on a single connection attempt.
    pub connect_timeout: Duration,
    /// Bound on sending a task and receiving its result.
    pub io_timeout: Duration,
    pub max_connect_attempts: u32,
    /// Delay before the first reconnect; doubles after every failed attempt.
    pub retry_delay: Duration,
    pub dispatch: DispatchMode,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            hosts: vec![Host::new(DEFAULT_ADDRESS, DEFAULT_BASE_PORT)],
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            io_timeout: DEFAULT_IO_TIMEOUT,
            max_connect_attempts: DEFAULT_MAX_CONNECT_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
            dispatch: DispatchMode::default(),
        }
    }
}

impl CoordinatorConfig {
    pub fn with_hosts(hosts: Vec<Host>) -> Self {
        Self {
            hosts,
            ..Self::default()
        }
    }

    /// Hosts on one address with sequential ports, one per worker.
    pub fn with_sequential_hosts(
        address: &str,
        base_port: u16,
        workers: usize,
    ) -> Result<Self, Error> {
        Ok(Self::with_hosts(Host::sequential(address, base_port, workers)?))
    }

    pub fn worker_count(&self) -> usize {
        self.hosts.len()
    }
}

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use matmul_protocol::{DType, Element, Matrix};
use matrix_mul::{
    Coordinator, CoordinatorConfig, DEFAULT_ADDRESS, DispatchMode, ExternalFleet, Host,
    ProcessFleet, ProcessFleetConfig, WorkerFleet,
};
use rand::Rng;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Distributed matrix multiplication coordinator
#[derive(Parser, Debug)]
#[command(name = "matrix-mul")]
#[command(about = "Multiplies random matrices across TCP workers")]
struct Args {
    /// Rows of matrix A
    #[arg(long)]
    rows: usize,

    /// Columns of A, which are also the rows of B
    #[arg(long)]
    inner: usize,

    /// Columns of matrix B
    #[arg(long)]
    cols: usize,

    /// Random elements are drawn from [0, max-value)
    #[arg(long, default_value = "10")]
    max_value: i64,

    /// Number of workers (1 to rows); ignored when --hosts is given
    #[arg(short, long, default_value = "1")]
    workers: usize,

    /// Explicit worker list, e.g. 10.0.0.2:5000,10.0.0.3:5000
    #[arg(long, value_delimiter = ',')]
    hosts: Vec<Host>,

    /// Worker address for sequential port assignment
    #[arg(long, default_value = DEFAULT_ADDRESS)]
    host: String,

    /// First worker port; worker i listens on base-port + i
    #[arg(long, default_value = "5000")]
    base_port: u16,

    /// Spawn one worker process per host instead of using running workers
    #[arg(long)]
    spawn_workers: bool,

    /// Worker executable used with --spawn-workers
    #[arg(long, default_value = "matmul-worker")]
    worker_bin: PathBuf,

    /// Element type (i32, i64, f32, f64)
    #[arg(long, default_value = "i64")]
    dtype: DType,

    /// Contact workers one at a time instead of all at once
    #[arg(long)]
    sequential: bool,

    /// Timeout for a single connection attempt in milliseconds
    #[arg(long, default_value = "2000")]
    connect_timeout_ms: u64,

    /// Timeout for one task round trip in milliseconds
    #[arg(long, default_value = "30000")]
    io_timeout_ms: u64,

    /// Connection attempts per worker before giving up
    #[arg(long, default_value = "5")]
    connect_attempts: u32,

    /// Print the operands and the product
    #[arg(long)]
    print: bool,

    /// Check the distributed product against a local one
    #[arg(long)]
    verify: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = tracing_subscriber::filter::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::filter::EnvFilter::new(&args.log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    if args.rows == 0 || args.inner == 0 || args.cols == 0 || args.max_value <= 0 {
        return Err("dimensions and max-value must be greater than zero".into());
    }

    let mut config = if args.hosts.is_empty() {
        if args.workers < 1 || args.workers > args.rows {
            return Err(format!("workers must be between 1 and {}", args.rows).into());
        }
        CoordinatorConfig::with_sequential_hosts(&args.host, args.base_port, args.workers)?
    } else {
        CoordinatorConfig::with_hosts(args.hosts.clone())
    };
    config.connect_timeout = Duration::from_millis(args.connect_timeout_ms);
    config.io_timeout = Duration::from_millis(args.io_timeout_ms);
    config.max_connect_attempts = args.connect_attempts;
    if args.sequential {
        config.dispatch = DispatchMode::Sequential;
    }

    match args.dtype {
        DType::I32 => run::<i32>(&args, config).await,
        DType::I64 => run::<i64>(&args, config).await,
        DType::F32 => run::<f32>(&args, config).await,
        DType::F64 => run::<f64>(&args, config).await,
    }
}

async fn run<T: Element>(
    args: &Args,
    config: CoordinatorConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let (a, b) = random_operands::<T>(args);

    if args.print {
        println!("Matrix A ({}x{}):", a.rows(), a.cols());
        print!("{}", a);
        println!("Matrix B ({}x{}):", b.rows(), b.cols());
        print!("{}", b);
    }

    let mut fleet: Box<dyn WorkerFleet> = if args.spawn_workers {
        Box::new(ProcessFleet::new(ProcessFleetConfig {
            program: args.worker_bin.clone(),
            dtype: args.dtype,
            ..ProcessFleetConfig::default()
        }))
    } else {
        Box::new(ExternalFleet)
    };

    let coordinator: Coordinator<T> = Coordinator::new(config);
    let cancel = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    let c = coordinator
        .multiply_until(fleet.as_mut(), &a, &b, cancel)
        .await?;

    tracing::info!(rows = c.rows(), cols = c.cols(), "product assembled");
    if args.print {
        println!("Matrix C ({}x{}):", c.rows(), c.cols());
        print!("{}", c);
    }

    if args.verify {
        let expected = a.multiply(&b)?;
        if c != expected {
            return Err("distributed product differs from local product".into());
        }
        println!("Verified against local product.");
    }

    Ok(())
}

/// Operands with integer-valued elements drawn from `[0, max_value)`.
fn random_operands<T: Element>(args: &Args) -> (Matrix<T>, Matrix<T>) {
    let mut rng = rand::thread_rng();
    let a = Matrix::from_fn(args.rows, args.inner, |_, _| {
        T::from_i64(rng.gen_range(0..args.max_value))
    });
    let b = Matrix::from_fn(args.inner, args.cols, |_, _| {
        T::from_i64(rng.gen_range(0..args.max_value))
    });
    (a, b)
}

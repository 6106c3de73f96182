use std::time::Duration;

use clap::Parser;
use matmul_protocol::{DType, Element};
use matmul_worker::{Worker, WorkerConfig};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Matrix multiplication worker
#[derive(Parser, Debug)]
#[command(name = "matmul-worker")]
#[command(about = "Answers framed row-block multiplication tasks over TCP")]
struct Args {
    /// Address to bind to
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value = "5000")]
    port: u16,

    /// Element type of the matrices (i32, i64, f32, f64)
    #[arg(long, default_value = "i64")]
    dtype: DType,

    /// Exit after the first task instead of serving until interrupted
    #[arg(long)]
    once: bool,

    /// Timeout for one request/response exchange in milliseconds
    #[arg(long, default_value = "30000")]
    read_timeout_ms: u64,

    /// Largest task frame accepted, in bytes
    #[arg(long, default_value = "536870912")]
    max_frame_bytes: usize,

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

    let listener = TcpListener::bind((args.host.as_str(), args.port)).await?;
    tracing::info!(addr = %listener.local_addr()?, dtype = %args.dtype, once = args.once, "worker listening");

    let config = WorkerConfig {
        read_timeout: Duration::from_millis(args.read_timeout_ms),
        max_frame_bytes: args.max_frame_bytes,
        once: args.once,
    };

    match args.dtype {
        DType::I32 => run::<i32>(listener, config).await,
        DType::I64 => run::<i64>(listener, config).await,
        DType::F32 => run::<f32>(listener, config).await,
        DType::F64 => run::<f64>(listener, config).await,
    }

    Ok(())
}

async fn run<T: Element>(listener: TcpListener, config: WorkerConfig) {
    let worker: Worker<T> = Worker::new(config);
    let stats = worker
        .serve(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await;
    tracing::info!(
        served = stats.served,
        failed = stats.failed,
        probes = stats.probes,
        "worker stopped"
    );
}

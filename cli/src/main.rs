use std::{path::PathBuf, process::ExitCode, time::Duration};

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tandem::{
    pipeline::{
        config::{DEFAULT_INPUT_PATH, DEFAULT_PULL_ADDR, DEFAULT_PUSH_ADDR, DEFAULT_REPORT_PATH},
        run_pipeline, ConnectRetry, DevicePreference, KernelConfig, PipelineConfig,
    },
    pool::{self, default_workers, PoolConfig, STABILITY_ITERATIONS},
};

/// Scores server records on a compute device and an external worker pool,
/// keeping the ones that pass both.
#[derive(Parser)]
#[command(name = "tandem", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scoring pipeline against a worker pool
    Run {
        /// Record file, a JSON object with a `servers` array
        #[arg(default_value = DEFAULT_INPUT_PATH)]
        input: PathBuf,

        /// Address record frames are pushed to
        #[arg(long, default_value = DEFAULT_PUSH_ADDR)]
        push: String,

        /// Address result frames are pulled from
        #[arg(long, default_value = DEFAULT_PULL_ADDR)]
        pull: String,

        #[arg(long, default_value = DEFAULT_REPORT_PATH)]
        report: PathBuf,

        /// Reliability iterations per record
        #[arg(long)]
        iterations: Option<u32>,

        /// Lanes per lane group
        #[arg(long)]
        lane_group: Option<u32>,

        /// auto, gpu or host
        #[arg(long, default_value = "auto")]
        device: DevicePreference,

        /// Give up on the pool after this long without a result frame
        #[arg(long)]
        receive_timeout_ms: Option<u64>,

        /// Connect attempts before the push socket gives up
        #[arg(long, default_value_t = 30)]
        connect_attempts: u32,
    },

    /// Serve stability scores as the pipeline's worker pool
    Pool {
        /// Number of stability workers (default: all CPUs but one)
        #[arg(long)]
        workers: Option<usize>,

        /// Use half of the CPUs instead
        #[arg(long)]
        half_cpu: bool,

        #[arg(long, default_value_t = STABILITY_ITERATIONS)]
        iterations: u32,

        /// Address record frames arrive on
        #[arg(long, default_value = DEFAULT_PUSH_ADDR)]
        pull: String,

        /// Address result frames are pushed to
        #[arg(long, default_value = DEFAULT_PULL_ADDR)]
        push: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match Cli::parse().command {
        Command::Run {
            input,
            push,
            pull,
            report,
            iterations,
            lane_group,
            device,
            receive_timeout_ms,
            connect_attempts,
        } => {
            let mut kernel = KernelConfig::default();
            if let Some(iterations) = iterations {
                kernel.iterations = iterations;
            }
            if let Some(lane_group) = lane_group {
                kernel.lane_group = lane_group;
            }
            let config = PipelineConfig::builder()
                .input(input)
                .report(report)
                .push_addr(push)
                .pull_addr(pull)
                .kernel(kernel)
                .device(device)
                .connect(ConnectRetry::builder().attempts(connect_attempts).build())
                .build();
            let config = match receive_timeout_ms {
                Some(ms) => PipelineConfig {
                    receive_timeout: Some(Duration::from_millis(ms)),
                    ..config
                },
                None => config,
            };

            match run_pipeline(config).await {
                Ok(summary) => {
                    info!(both = summary.both, "done");
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    error!(error = %e, "pipeline halted");
                    ExitCode::FAILURE
                }
            }
        }
        Command::Pool {
            workers,
            half_cpu,
            iterations,
            pull,
            push,
        } => {
            let config = PoolConfig::builder()
                .workers(workers.unwrap_or_else(|| default_workers(half_cpu)))
                .iterations(iterations)
                .inbound(pull)
                .outbound(push)
                .build();
            info!(workers = config.workers, iterations, "starting worker pool");

            match pool::serve(&config, &config.transport()).await {
                Ok(stats) => {
                    info!(received = stats.received, sent = stats.sent, "pool done");
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    error!(error = %e, "pool failed");
                    ExitCode::FAILURE
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_input_defaults_to_bundled_data() {
        let cli = Cli::try_parse_from(["tandem", "run"]).unwrap();
        match cli.command {
            Command::Run { input, device, .. } => {
                assert_eq!(input, PathBuf::from(DEFAULT_INPUT_PATH));
                assert_eq!(device, DevicePreference::Auto);
            }
            Command::Pool { .. } => panic!("parsed the wrong subcommand"),
        }
    }

    #[test]
    fn run_takes_an_explicit_input() {
        let args = ["tandem", "run", "other.json", "--device", "host"];
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Command::Run { input, device, .. } => {
                assert_eq!(input, PathBuf::from("other.json"));
                assert_eq!(device, DevicePreference::HostOnly);
            }
            Command::Pool { .. } => panic!("parsed the wrong subcommand"),
        }
    }
}

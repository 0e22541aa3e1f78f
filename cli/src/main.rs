use clap::{Parser, Subcommand};
use merrymaker_cli::{config::MerrymakerConfig, migrate, reaper_cmd, scan_runner_cmd, scheduler_cmd, worker_cmd};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "merrymaker")]
#[command(about = "Merrymaker control plane", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run DB migrations for the jobs and rules schemas.
    Migrate,

    /// Run the Scheduler: fires due scheduled tasks onto the job queue.
    Scheduler,

    /// Run a Job Runner: reserves and executes jobs for every registered task type.
    Worker,

    /// Run the Reaper: expires stale leases and prunes old job history.
    Reaper,

    /// Originate a scan against `url` and block until it completes or times out.
    ScanRunner {
        url: String,

        #[arg(long, default_value_t = 120)]
        timeout_secs: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = MerrymakerConfig::from_env()?;

    match cli.command {
        Command::Migrate => migrate::run(&cfg).await,
        Command::Scheduler => scheduler_cmd::run(&cfg).await,
        Command::Worker => worker_cmd::run(&cfg).await,
        Command::Reaper => reaper_cmd::run(&cfg).await,
        Command::ScanRunner { url, timeout_secs } => scan_runner_cmd::run(&cfg, url, timeout_secs).await,
    }
}

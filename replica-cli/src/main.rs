use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use replica_core::logging::{init_logging_with_config, LogLevel};
use replica_core::metrics::init_metrics;
use replica_core::Config;
use std::path::PathBuf;
use tracing::{debug, info};

mod simulate;

#[derive(Parser, Debug)]
#[command(name = "replica")]
#[command(author, version, about = "Delta replication of a host collection across a simulated boundary", long_about = None)]
struct Args {
    /// Set the log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Enable JSON formatted logging
    #[arg(long, global = true)]
    json_logs: bool,

    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Mutate a host collection and replicate it across a faulty link
    Simulate(SimulateArgs),
    /// Print the effective configuration as TOML
    PrintConfig,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct SimulateArgs {
    /// Number of host mutations
    #[arg(long, default_value_t = 200)]
    pub ops: usize,

    /// Distinct keys the workload touches
    #[arg(long, default_value_t = 32)]
    pub keys: usize,

    /// Probability of dropping a frame (overrides config)
    #[arg(long)]
    pub drop_rate: Option<f64>,

    /// Probability of delaying a frame behind the next one (overrides config)
    #[arg(long)]
    pub reorder_rate: Option<f64>,

    /// Seed for the workload and the fault injector
    #[arg(long)]
    pub seed: Option<u64>,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = Config::load(args.config.as_deref())
        .with_context(|| match &args.config {
            Some(path) => format!("loading configuration from {}", path.display()),
            None => "loading configuration from environment".to_string(),
        })?;

    if let Some(level) = &args.log_level {
        config.logging.level = level.parse::<LogLevel>()?;
    }
    if args.json_logs {
        config.logging.json_format = true;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    init_logging_with_config(&config.logging)?;
    if config.metrics.enabled {
        init_metrics();
    }
    debug!(?config, "configuration loaded");

    match args.command {
        Command::Simulate(simulate_args) => {
            let report = simulate::run(config, &simulate_args).await?;
            simulate::print(&report, simulate_args.json)?;
            if !report.converged {
                anyhow::bail!("replica diverged from host after the final resync");
            }
        }
        Command::PrintConfig => {
            print!("{}", config.to_toml()?);
        }
    }

    info!("replica CLI finished");
    Ok(())
}

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::LevelFilter;

use bayun_optimizer::query::planner::logical::Plan;
use bayun_optimizer::query::planner::{Optimizer, OptimizerConfig};

#[derive(Parser)]
#[command(author, version, about = "planopt - Rewrite a bound logical plan with the Bayun optimizer")]
struct Cli {
    /// JSON file with optimizer settings
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Skip projection elimination
    #[arg(long)]
    no_projection_elimination: bool,

    /// Skip filter pushdown
    #[arg(long)]
    no_pushdown: bool,

    /// Output format of the optimized plan
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Explain)]
    format: OutputFormat,

    /// Log rewrites to stderr (repeat for more detail)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Plan file (JSON)
    plan_file: PathBuf,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Explain,
    Json,
}

fn log_level(verbose: u8) -> LevelFilter {
    match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

fn init_logging(verbose: u8) -> Result<()> {
    env_logger::Builder::new()
        .filter_level(log_level(verbose))
        .try_init()
        .context("Failed to install logger")?;
    Ok(())
}

fn load_config(cli: &Cli) -> Result<OptimizerConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("Invalid config file {}", path.display()))?
        }
        None => OptimizerConfig::default(),
    };

    if cli.no_projection_elimination {
        config.remove_simple_projections = false;
    }
    if cli.no_pushdown {
        config.pushdown_filters = false;
    }
    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let config = load_config(&cli)?;

    let text = fs::read_to_string(&cli.plan_file)
        .with_context(|| format!("Failed to read plan file {}", cli.plan_file.display()))?;
    let mut plan: Plan = serde_json::from_str(&text)
        .with_context(|| format!("Invalid plan file {}", cli.plan_file.display()))?;

    let optimizer = Optimizer::new(config);
    optimizer
        .optimize(&mut plan)
        .context("Failed to optimize plan")?;

    match cli.format {
        OutputFormat::Explain => print!("{}", plan.explain()?),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&plan)?),
    }

    Ok(())
}

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::runtime::Runtime;

use serindb::NodeConfig;

/// SerinDB node command-line interface.
#[derive(Parser)]
#[command(name = "serindb", author, version, about = "SerinDB node", long_about = None)]
struct Cli {
    /// Path to a YAML node config; defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the config file and print the effective settings.
    CheckConfig,

    /// Run concurrent increments with duplicated client command ids against
    /// an in-memory range and print the outcome.
    Demo {
        /// Number of concurrent clients.
        #[arg(long, default_value_t = 100)]
        clients: usize,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => NodeConfig::load(path)?,
        None => NodeConfig::default(),
    };

    match cli.command {
        Commands::CheckConfig => {
            print!("{}", serde_yaml::to_string(&config)?);
        }
        Commands::Demo { clients } => {
            let _log = serin_log::init(config.log.dir.as_deref(), &config.log.level)?;
            let rt = Runtime::new()?;
            let report = rt.block_on(serindb::run_demo(&config, clients))?;
            println!("counter: {}", report.counter);
            println!("stats: {:?}", report.stats);
            print!("{}", serin_metrics::encode_text()?);
        }
    }
    Ok(())
}

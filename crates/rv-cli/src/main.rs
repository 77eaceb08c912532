use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod cmd_explain;
mod cmd_run;

#[derive(Parser)]
#[command(name = "rivulet", about = "Run pipeline scripts over JSON-lines event streams")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the configured pipeline from stdin (or --input) to stdout
    Run {
        /// Path to rivulet.toml
        #[arg(short, long)]
        config: PathBuf,
        /// Read events from this file instead of stdin
        #[arg(short, long)]
        input: Option<PathBuf>,
    },
    /// Check a pipeline script and print its canonical form
    Explain {
        /// Pipeline script
        script: PathBuf,
        /// Variable substitution, repeatable (KEY=VALUE)
        #[arg(long = "var")]
        vars: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, input } => cmd_run::run(config, input).await,
        Commands::Explain { script, vars } => cmd_explain::run(script, vars),
    }
}

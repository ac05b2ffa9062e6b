//! NetworkPolicy analyzer, simulator and conformance tester

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};

#[derive(Parser, Debug)]
#[command(name = "netpol", version)]
#[command(about = "Analyze, simulate and test Kubernetes NetworkPolicies")]
struct Cli {
    /// Enable debug logging
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Config file (TOML), layered over the user and built-in config
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile policies and explain, query or simulate them
    Analyze(commands::analyze::AnalyzeArgs),
    /// Deploy probe pods and compare one cluster probe with the simulation
    Probe(commands::probe::ProbeArgs),
    /// Run generated conformance test cases against a cluster
    Generate(commands::generate::GenerateArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .init();

    let config = commands::load_config(cli.config.as_deref())?;
    let verbose = cli.verbose || config.common.verbose;

    match cli.command {
        Command::Analyze(args) => commands::analyze::run(args, config).await,
        Command::Probe(args) => commands::probe::run(args, config, verbose).await,
        Command::Generate(args) => commands::generate::run(args, config, verbose).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["netpol", "generate", "--dry-run", "-v"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Command::Generate(_)));
    }
}

//! Handover CLI - AI-assisted codebase documentation generator.

use clap::Parser;

mod cli;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    let result = match cli.command {
        Commands::Generate(args) => cli::generate_command(args).await,
        Commands::Analyze(args) => cli::analyze_command(args).await,
        Commands::Estimate(args) => cli::estimate_command(args).await,
        Commands::PrintDefaultConfig => cli::print_default_config().await,
        Commands::InitConfig(args) => cli::init_config(args).await,
        Commands::ValidateConfig(args) => cli::validate_config(args).await,
    };

    if let Err(err) = result {
        cli::print_error(&err);
        std::process::exit(1);
    }
}

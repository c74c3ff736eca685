//! CLI argument structures for the handover binary.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// AI-assisted codebase documentation generator
#[derive(Parser)]
#[command(name = "handover")]
#[command(version = VERSION)]
#[command(about = "Generate cross-referenced handover documentation for a codebase")]
#[command(long_about = "
Analyze a repository and generate a set of markdown documents describing its
architecture, modules, data flow, interfaces, and onboarding path.

Common Usage:

  # Generate documentation for the current directory
  handover generate

  # Re-run ignoring cached round results
  handover generate --no-cache

  # Static analysis only, no AI calls
  handover generate --static-only

  # Price a run before committing to it
  handover estimate

Results land in handover-docs/ by default; round results are cached under
.handover/cache/ so unchanged repositories re-run almost for free.
")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging for debugging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate the documentation set for a repository
    Generate(GenerateArgs),

    /// Run static analysis and report what a generate run would see
    Analyze(AnalyzeArgs),

    /// Estimate the token and dollar cost of a generate run
    Estimate(EstimateArgs),

    /// Print the default configuration in YAML format
    #[command(name = "print-default-config")]
    PrintDefaultConfig,

    /// Initialize a configuration file with defaults
    #[command(name = "init-config")]
    InitConfig(InitConfigArgs),

    /// Validate a handover configuration file
    #[command(name = "validate-config")]
    ValidateConfig(ValidateConfigArgs),
}

#[derive(Args)]
pub struct GenerateArgs {
    /// Repository to analyze (defaults to the current directory)
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Provider implementation (anthropic, openai, ollama)
    #[arg(long)]
    pub provider: Option<String>,

    /// Model identifier passed on each request
    #[arg(long)]
    pub model: Option<String>,

    /// Comma-separated round numbers to run; the rest emit empty sections
    #[arg(long, value_delimiter = ',')]
    pub only: Vec<String>,

    /// Target audience for the rendered documents
    #[arg(long, value_enum)]
    pub audience: Option<AudienceArg>,

    /// Skip all AI rounds and render from static analysis alone
    #[arg(long)]
    pub static_only: bool,

    /// Ignore cached round results (cache writes still happen)
    #[arg(long)]
    pub no_cache: bool,

    /// Output directory for rendered documents
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Args)]
pub struct AnalyzeArgs {
    /// Repository to analyze (defaults to the current directory)
    #[arg(default_value = ".")]
    pub path: PathBuf,
}

#[derive(Args)]
pub struct EstimateArgs {
    /// Repository to analyze (defaults to the current directory)
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Model to price against (defaults to the configured model)
    #[arg(long)]
    pub model: Option<String>,
}

#[derive(Args)]
pub struct InitConfigArgs {
    /// Where to write the configuration file
    #[arg(default_value = "handover.yml")]
    pub path: PathBuf,

    /// Overwrite an existing file
    #[arg(long)]
    pub force: bool,
}

#[derive(Args)]
pub struct ValidateConfigArgs {
    /// Configuration file to validate
    #[arg(default_value = "handover.yml")]
    pub path: PathBuf,
}

/// Audience flag values.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum AudienceArg {
    /// Prose-first documents for developers
    Human,
    /// Terse, structured documents for coding agents
    Ai,
}

impl From<AudienceArg> for handover_rs::core::config::Audience {
    fn from(arg: AudienceArg) -> Self {
        match arg {
            AudienceArg::Human => Self::Human,
            AudienceArg::Ai => Self::Ai,
        }
    }
}

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use tunegate_core::decision::policy::TrustTier;

#[derive(Debug, Parser)]
#[command(
    name = "tunegate",
    version,
    about = "Ingestion and safety validation for ECU tune uploads"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run one tune file through the pipeline and print its report
    Check(CheckArgs),

    /// List accepted tune-file extensions
    Formats {
        /// Output format
        #[arg(long, default_value = "text")]
        format: OutputFormat,
    },
}

#[derive(Debug, ClapArgs)]
pub struct CheckArgs {
    /// Path to the tune file
    pub path: PathBuf,

    /// Trust tier of the submitting tuner
    #[arg(long, default_value = "unverified")]
    pub tier: Tier,

    /// Policy configuration (TOML); defaults are used when omitted
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Reasoning service endpoint, overrides the config file
    #[arg(long)]
    pub reasoning_url: Option<String>,

    /// Declared motorcycle make
    #[arg(long)]
    pub make: Option<String>,

    /// Declared motorcycle model
    #[arg(long)]
    pub model: Option<String>,

    /// Declared model year
    #[arg(long)]
    pub year: Option<u16>,

    /// Output format
    #[arg(long, default_value = "json")]
    pub format: OutputFormat,

    /// Write output to a file instead of stdout
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Optional git commit hash for tool metadata
    #[arg(long)]
    pub commit: Option<String>,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    Json,
    Text,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Tier {
    Unverified,
    Verified,
    Trusted,
    Partner,
}

impl From<Tier> for TrustTier {
    fn from(tier: Tier) -> Self {
        match tier {
            Tier::Unverified => TrustTier::Unverified,
            Tier::Verified => TrustTier::Verified,
            Tier::Trusted => TrustTier::Trusted,
            Tier::Partner => TrustTier::Partner,
        }
    }
}

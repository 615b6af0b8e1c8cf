use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use tunegate_core::check_file;
use tunegate_core::config::PolicyConfig;
use tunegate_core::format::detect::supported_formats;
use tunegate_core::pipeline::{Compatibility, Pipeline};
use tunegate_core::report::{model::ToolInfo, render};

mod args;

use args::{CheckArgs, Command, OutputFormat};

fn main() -> Result<()> {
    let args = args::Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        Command::Check(check) => run_check(check),
        Command::Formats { format } => {
            let formats = supported_formats();
            let output = match format {
                OutputFormat::Json => serde_json::to_string_pretty(&formats)?,
                OutputFormat::Text => formats
                    .iter()
                    .map(|f| {
                        format!(".{:<5} {} (min {} bytes)\n", f.extension, f.description, f.min_size_bytes)
                    })
                    .collect(),
            };
            print!("{output}");
            Ok(())
        }
    }
}

fn run_check(args: CheckArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => PolicyConfig::load(path)?,
        None => PolicyConfig::default(),
    };
    if let Some(url) = args.reasoning_url {
        config.reasoning.endpoint = Some(url);
    }
    let pipeline = Pipeline::from_config(config)?;

    let tool = ToolInfo {
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        commit: args.commit.clone(),
    };
    let compatibility = Compatibility {
        make: args.make,
        model: args.model,
        year: args.year,
    };

    tracing::debug!(path = %args.path.display(), tier = ?args.tier, "checking tune file");
    let report = check_file(&args.path, &pipeline, args.tier.into(), compatibility, tool)?;

    let output = match args.format {
        OutputFormat::Json => serde_json::to_string_pretty(&report)?,
        OutputFormat::Text => render::render_text(&report),
    };

    match args.out {
        Some(path) => std::fs::write(path, &output)?,
        None => print!("{output}"),
    }

    std::process::exit(report.exit_code);
}

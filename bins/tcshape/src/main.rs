//! tcshape - per-interface upload and download limits.
//!
//! Thin front end over the `tcshape` library: apply, clear, and show a flat
//! tbf limit on each direction of an interface.

mod commands;
mod output;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tcshape::ShaperConfig;

use output::{OutputFormat, OutputOptions};

#[derive(Parser)]
#[command(name = "tcshape", version, about = "Interface upload/download rate limiter")]
struct Cli {
    /// Output JSON.
    #[arg(short = 'j', long, global = true)]
    json: bool,

    /// Pretty print JSON.
    #[arg(short = 'p', long, global = true)]
    pretty: bool,

    /// Configuration file (YAML, or JSON with a .json extension).
    #[arg(short = 'c', long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Run tc/ip/modprobe through `sudo -n`.
    #[arg(long, global = true)]
    sudo: bool,

    /// Per-command timeout in seconds.
    #[arg(long, global = true, value_name = "SECS")]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Limit upload and/or download on an interface.
    #[command(visible_alias = "a")]
    Apply(commands::apply::ApplyCmd),

    /// Remove both limits from an interface.
    #[command(visible_alias = "c")]
    Clear(commands::clear::ClearCmd),

    /// Show the active limits on an interface.
    #[command(visible_alias = "s", visible_alias = "show")]
    Status(commands::status::StatusCmd),

    /// List network interfaces.
    #[command(visible_alias = "ls")]
    Interfaces(commands::interfaces::InterfacesCmd),
}

impl Cli {
    fn load_config(&self) -> tcshape::Result<ShaperConfig> {
        let mut config = match &self.config {
            Some(path) => ShaperConfig::from_file(path)?,
            None => ShaperConfig::default(),
        };

        if self.sudo {
            config.privilege = vec!["sudo".to_string(), "-n".to_string()];
        }
        if let Some(secs) = self.timeout {
            config.timeout_secs = secs;
        }

        config.validate()?;
        Ok(config)
    }
}

async fn run(cli: Cli, format: OutputFormat, opts: &OutputOptions) -> anyhow::Result<()> {
    let config = cli.load_config()?;

    match cli.command {
        Command::Apply(cmd) => cmd.run(&config, format, opts).await,
        Command::Clear(cmd) => cmd.run(&config, format, opts).await,
        Command::Status(cmd) => cmd.run(&config, format, opts).await,
        Command::Interfaces(cmd) => cmd.run(&config, format, opts),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };
    let opts = OutputOptions { pretty: cli.pretty };

    let result = run(cli, format, &opts).await;

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    Ok(())
}

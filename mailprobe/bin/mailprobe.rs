#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

use std::{path::PathBuf, process::ExitCode};

use clap::{Parser, Subcommand};
use mailprobe::{CONFIG_ENV, Format, Settings};
use mailprobe_coord::Coordinator;
use mailprobe_verify::Verifier;

/// Checks whether mailboxes exist without sending mail
#[derive(Parser, Debug)]
#[command(name = "mailprobe")]
#[command(version, long_about = None)]
struct Cli {
    /// Settings file (TOML). Falls back to MAILPROBE_CONFIG, ./mailprobe.toml
    /// and /etc/mailprobe/mailprobe.toml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Share throttle state and caches through this Redis server
    #[arg(long, global = true)]
    redis_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Verify one or more addresses
    Verify {
        #[arg(required = true)]
        addresses: Vec<String>,

        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,

        /// Connect to this port instead of 25
        #[arg(long)]
        port: Option<u16>,
    },
    /// Print the effective settings
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    mailprobe_common::logging::init();

    let cli = Cli::parse();
    let mut settings = Settings::discover(
        cli.config.as_deref(),
        std::env::var_os(CONFIG_ENV).map(PathBuf::from),
    )?;

    if let Some(url) = cli.redis_url {
        settings.coordination.redis_url = Some(url);
    }

    match cli.command {
        Commands::Config => {
            print!("{}", toml::to_string(&settings)?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Verify {
            addresses,
            format,
            port,
        } => {
            if let Some(port) = port {
                settings.validation.port = port;
                settings.validation.validate()?;
            }

            let coordinator = Coordinator::start(&settings.coordination);
            let verifier = Verifier::with_coordinator(&coordinator)?;

            let results = mailprobe::verify_all(&verifier, &addresses, &settings.validation).await?;
            print!("{}", mailprobe::render(&results, format)?);

            let status = results
                .iter()
                .map(|(_, outcome)| mailprobe::exit_status(outcome.verdict))
                .max()
                .unwrap_or_default();

            Ok(ExitCode::from(status))
        }
    }
}

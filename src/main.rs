//! envpilot - headless orchestration for local Python environments
//!
//! This is the binary entry point. All logic lives in the library crates.

use std::io::BufReader;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;

use envpilot::inspect;
use envpilot_app::config;
use envpilot_core::HostOs;

/// envpilot - Python environments, backend services and Jupyter servers
#[derive(Parser, Debug)]
#[command(name = "envpilot")]
#[command(about = "Headless orchestration for local Python environments", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run against the host: NDJSON intents on stdin, NDJSON events on stdout
    Headless {
        /// Config directory (defaults to the platform config dir)
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Check a backend start command against the safety rules
    Validate {
        /// Command line to check
        #[arg(required = true, num_args = 1.., trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,

        /// Target OS: linux, macos or windows
        #[arg(long)]
        os: Option<HostOs>,
    },

    /// Classify log lines read from stdin
    Classify,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();

    match args.command {
        Command::Headless { config } => {
            envpilot_core::logging::init()?;
            let config_dir = config.unwrap_or_else(config::default_config_dir);
            envpilot::run_headless(&config_dir).await?;
        }
        Command::Validate { command, os } => {
            let command = command.join(" ");
            let (verdict, text) = inspect::validate(&command, os.unwrap_or_else(HostOs::current));
            println!("{}", text);
            if !verdict.is_valid() {
                std::process::exit(1);
            }
        }
        Command::Classify => {
            let settings = config::load_settings(&config::default_config_dir());
            let stdin = BufReader::new(std::io::stdin());
            inspect::classify(
                stdin,
                &mut std::io::stdout(),
                settings.monitor.collector_config(),
            )?;
        }
    }

    Ok(())
}

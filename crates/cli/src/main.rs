//! Careline CLI: the main entry point.
//!
//! Commands:
//! - `process`: Run patient messages through the pipeline
//! - `verify`: Send the verification prompt to a patient
//! - `sweep`: Deactivate expired conversation states
//! - `stats`: Show conversation counts for a patient
//! - `history`: Show the message log for a phone number
//! - `usage`: Show usage ceilings or estimate a call's cost
//! - `pricing`: List model pricing
//! - `doctor`: Diagnose configuration and storage

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "careline",
    about = "Careline — patient messaging orchestration for palliative care",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ~/.careline/config.toml)
    #[arg(short, long, global = true, env = "CARELINE_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Process inbound patient messages
    Process {
        /// Sender phone number
        #[arg(short, long)]
        phone: String,

        /// Process a single message instead of reading lines from stdin
        #[arg(short, long)]
        message: Option<String>,

        /// JSON file mapping phone numbers to patient context
        #[arg(long)]
        patients: Option<PathBuf>,

        /// Print the full processing outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Send the verification prompt to a patient
    Verify {
        /// Patient phone number
        #[arg(short, long)]
        phone: String,

        /// JSON file mapping phone numbers to patient context
        #[arg(long)]
        patients: Option<PathBuf>,
    },

    /// Deactivate expired conversation states
    Sweep {
        /// Keep sweeping on the configured interval until Ctrl+C
        #[arg(short, long)]
        watch: bool,
    },

    /// Show conversation counts for a patient
    Stats {
        /// Patient id
        patient_id: String,
    },

    /// Show the message log of the active conversation for a phone number
    History {
        phone: String,

        /// Maximum messages to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Show usage ceilings, or estimate the cost of a call
    Usage {
        #[command(subcommand)]
        action: Option<UsageAction>,
    },

    /// List model pricing
    Pricing,

    /// Diagnose configuration and storage
    Doctor,
}

#[derive(Subcommand)]
enum UsageAction {
    /// Estimate the cost of a call
    Estimate {
        model: String,
        input_tokens: u32,
        output_tokens: u32,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Process {
            phone,
            message,
            patients,
            json,
        } => {
            commands::process::run(config_path, &phone, message, patients.as_deref(), json).await?
        }
        Commands::Verify { phone, patients } => {
            commands::verify::run(config_path, &phone, patients.as_deref()).await?
        }
        Commands::Sweep { watch } => commands::sweep::run(config_path, watch).await?,
        Commands::Stats { patient_id } => commands::stats::run(config_path, &patient_id).await?,
        Commands::History { phone, limit } => {
            commands::history::run(config_path, &phone, limit).await?
        }
        Commands::Usage { action } => match action {
            None => commands::usage::show(config_path).await?,
            Some(UsageAction::Estimate {
                model,
                input_tokens,
                output_tokens,
            }) => commands::usage::estimate(config_path, &model, input_tokens, output_tokens).await?,
        },
        Commands::Pricing => commands::usage::pricing(config_path).await?,
        Commands::Doctor => commands::doctor::run(config_path).await?,
    }

    Ok(())
}

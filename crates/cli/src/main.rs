// Pressluft CLI
//
// Design Decision: Use clap derive for ergonomic argument parsing.
// Design Decision: Support text/json/yaml output formats for scripting.
// Design Decision: All HTTP and streaming goes through pressluft-stream; the CLI only formats.

mod commands;
mod output;

use std::time::Duration;

use clap::{Parser, Subcommand};
use pressluft_stream::{init_telemetry, ApiClient, ClientConfig, TelemetryConfig};

#[derive(Parser)]
#[command(name = "pressluft")]
#[command(about = "Pressluft CLI - Follow activity and background jobs")]
#[command(version)]
pub struct Cli {
    /// API base URL
    #[arg(long, env = "PRESSLUFT_API_URL")]
    pub api_url: Option<String>,

    /// Polling interval in milliseconds when push is unavailable
    #[arg(long)]
    pub poll_interval_ms: Option<u64>,

    /// Output format
    #[arg(long, short, default_value = "text", value_parser = ["text", "json", "yaml"])]
    pub output: String,

    /// Suppress non-essential output
    #[arg(long, short)]
    pub quiet: bool,

    /// Log delivery internals to stderr
    #[arg(long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Browse and follow the activity feed
    Activity {
        #[command(subcommand)]
        command: commands::activity::ActivityCommand,
    },

    /// Create and watch background jobs
    Jobs {
        #[command(subcommand)]
        command: commands::jobs::JobsCommand,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut telemetry = TelemetryConfig::from_env().with_service_name("pressluft-cli");
    if telemetry.log_filter.is_none() {
        telemetry = telemetry.with_log_filter(if cli.verbose { "debug" } else { "warn" });
    }
    init_telemetry(telemetry);

    let mut config = ClientConfig::from_env()?;
    if let Some(api_url) = &cli.api_url {
        config = config.with_api_url(api_url.as_str());
    }
    if let Some(ms) = cli.poll_interval_ms {
        config = config.with_poll_interval(Duration::from_millis(ms));
    }

    let client = ApiClient::new(&config)?;
    let output_format = output::OutputFormat::from_str(&cli.output);

    match cli.command {
        Commands::Activity { command } => {
            commands::activity::run(command, client, &config, output_format, cli.quiet).await
        }
        Commands::Jobs { command } => {
            commands::jobs::run(command, client, &config, output_format, cli.quiet).await
        }
    }
}

//! genflow CLI — run content-generation flows from the command line.
//!
//! Uses the same orchestration (genflow-core) that HTTP route handlers call:
//! every command prints JSON on stdout, either the flow output or an error
//! envelope `{ kind, message, details? }`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use genflow_cli::commands::{self, print_json, CommandError, Runtime};
use genflow_core::{FanOutPolicy, GenflowConfig};
use serde_json::Value;

/// genflow — generative flow orchestration
#[derive(Parser)]
#[command(name = "genflow", version, about = "genflow — generative flow orchestration")]
pub struct Cli {
    /// Path to a YAML configuration file
    #[arg(long, env = "GENFLOW_CONFIG")]
    config: Option<String>,

    /// Directory of extra YAML flow definitions
    #[arg(long, env = "GENFLOW_FLOWS_DIR")]
    flows_dir: Option<String>,

    /// Backend API key (overrides the configuration)
    #[arg(long, env = "GENFLOW_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Per backend call timeout in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Fan-out policy: wait-all | fail-fast
    #[arg(long)]
    policy: Option<FanOutPolicy>,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect registered flows
    Flows {
        #[command(subcommand)]
        action: FlowsAction,
    },

    /// Validate input against a flow's input shape (no backend call)
    Validate {
        /// Flow name
        flow: String,
        /// Input as JSON, or @file
        #[arg(long)]
        input: String,
    },

    /// Run a single flow
    Run {
        /// Flow name
        flow: String,
        /// Input as JSON, or @file
        #[arg(long)]
        input: String,
    },

    /// Generate a set of three logos
    Logos {
        /// Input as JSON, or @file
        #[arg(long)]
        input: String,
    },

    /// Generate description, specification, images and tagline for a product
    ProductDetails {
        /// Input as JSON, or @file
        #[arg(long)]
        input: String,
    },
}

#[derive(Subcommand)]
enum FlowsAction {
    /// List registered flows
    List,
    /// Show a flow's shapes and template
    Show {
        /// Flow name
        name: String,
    },
}

/// Load `.env.local`, then `.env`. Variables already set are never overridden.
fn load_dotenv() -> Vec<PathBuf> {
    [".env.local", ".env"]
        .into_iter()
        .filter_map(|filename| dotenvy::from_filename(filename).ok())
        .collect()
}

fn load_config(cli: &Cli) -> Result<GenflowConfig, CommandError> {
    let mut config = match cli.config.as_deref() {
        Some(path) => GenflowConfig::from_file(path)?,
        None => GenflowConfig::from_env()?,
    };
    if let Some(key) = &cli.api_key {
        config.backend.api_key = key.clone();
    }
    if let Some(secs) = cli.timeout_secs {
        config.timeout_secs = secs;
    }
    if let Some(policy) = cli.policy {
        config.fan_out_policy = policy;
    }
    Ok(config)
}

async fn execute(cli: &Cli) -> Result<Option<Value>, CommandError> {
    let registry = commands::load_registry(cli.flows_dir.as_deref())?;

    match &cli.command {
        Commands::Flows { action } => match action {
            FlowsAction::List => {
                print!("{}", commands::flows::list(&registry));
                Ok(None)
            }
            FlowsAction::Show { name } => commands::flows::show(&registry, name).map(Some),
        },
        Commands::Validate { flow, input } => {
            let input = commands::parse_input(input)?;
            commands::run::validate(&registry, flow, &input).map(Some)
        }
        Commands::Run { flow, input } => {
            let input = commands::parse_input(input)?;
            let runtime = Runtime::from_config(&load_config(cli)?, registry)?;
            commands::run::run(&runtime, flow, input).await.map(Some)
        }
        Commands::Logos { input } => {
            let input = commands::parse_input(input)?;
            let runtime = Runtime::from_config(&load_config(cli)?, registry)?;
            commands::run::logos(&runtime, input).await.map(Some)
        }
        Commands::ProductDetails { input } => {
            let input = commands::parse_input(input)?;
            let runtime = Runtime::from_config(&load_config(cli)?, registry)?;
            commands::run::product_details(&runtime, input).await.map(Some)
        }
    }
}

#[tokio::main]
async fn main() {
    // Before parsing, so `env = ...` arguments see values from .env files
    let env_files = load_dotenv();
    let cli = Cli::parse();

    // Initialize tracing
    let default_filter = if cli.verbose {
        "genflow=debug,genflow_core=debug,genflow_cli=debug"
    } else {
        "genflow=info,genflow_core=info,genflow_cli=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    for path in &env_files {
        tracing::debug!("[genflow] Loaded environment from {}", path.display());
    }

    match execute(&cli).await {
        Ok(Some(value)) => print_json(&value),
        Ok(None) => {}
        Err(e) => {
            print_json(&e.to_json());
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

//! stack-policy - validate and probe orchestration API authorization rules.

mod commands;
mod error;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser, Subcommand};
use stack_policy::{PolicyConfig, RuleIndex};
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

use error::CliError;

#[derive(Debug, Parser)]
#[command(name = "stack-policy")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Validate and probe orchestration API authorization rules", long_about = None)]
struct Cli {
    /// Sets the level of verbosity
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file (TOML)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Rule file to use instead of the configured one
    #[arg(short, long, value_name = "FILE", global = true)]
    rules: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Load the rule set and report authoring problems
    Validate,

    /// Evaluate one call for a set of personas
    Check {
        /// Scope of the call, e.g. stacks
        #[arg(long)]
        scope: String,

        /// Action within the scope, e.g. create
        #[arg(long)]
        action: String,

        /// Personas held by the caller (repeat or comma-separate)
        #[arg(short, long = "persona", value_delimiter = ',')]
        personas: Vec<String>,

        /// Print the decision as JSON
        #[arg(long)]
        json: bool,
    },

    /// List every covered call and the rule that governs it
    Coverage,

    /// Print the persona matrix for every covered call
    Matrix,
}

fn init_logging(verbose: u8, config: &PolicyConfig) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&config.log_filter))
            .unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> Result<PolicyConfig, CliError> {
    let mut config = match &cli.config {
        Some(path) => PolicyConfig::from_file(path)?,
        None => PolicyConfig::default(),
    };
    if let Some(rules) = &cli.rules {
        config.rules_file = Some(rules.clone());
    }
    Ok(config)
}

fn run(cli: Cli, config: PolicyConfig) -> Result<u8, CliError> {
    // `validate` prints gaps itself, so skip the load-time warnings there.
    let load_config = PolicyConfig {
        warn_on_hierarchy_gaps: config.warn_on_hierarchy_gaps
            && !matches!(cli.command, Commands::Validate),
        ..config
    };
    let index: RuleIndex = load_config.load_index()?;
    debug!(rules = index.len(), "Rule set ready");

    match cli.command {
        Commands::Validate => commands::validate(&index),
        Commands::Check {
            scope,
            action,
            personas,
            json,
        } => commands::check(index, &scope, &action, &personas, json),
        Commands::Coverage => commands::coverage(&index),
        Commands::Matrix => commands::matrix(&index),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    init_logging(cli.verbose, &config);

    match run(cli, config) {
        Ok(status) => ExitCode::from(status),
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

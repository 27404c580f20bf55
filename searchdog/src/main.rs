use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use searchdog::config;

/// SearchDog is a distributed full-text search and analytics cluster.
#[derive(Parser, Debug)]
#[command(name = "searchdog", version)]
struct Cli {
    /// Path to the configuration file. Default: "searchdog.toml"
    #[arg(short, long, default_value = "searchdog.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone)]
enum Commands {
    /// Start this node (role comes from the config file's `general.role`).
    Run,

    /// Check the configuration file for errors without starting anything.
    Configcheck,

    /// Parse a `_search` request body and print its query plan (complexity
    /// score, cacheability, UDF push-down decision) without running it.
    Validate {
        /// Path to a JSON file containing the request body.
        #[arg(short, long)]
        path: PathBuf,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command.clone().unwrap_or(Commands::Run) {
        Commands::Configcheck => {
            match config::Config::load(&cli.config) {
                Ok(_) => {
                    println!("\"{}\" is valid", cli.config.display());
                    Ok(())
                }
                Err(err) => {
                    eprintln!("{err}");
                    std::process::exit(1);
                }
            }
        }
        Commands::Validate { path } => validate(&path),
        Commands::Run => {
            init_tracing();
            config::load(&cli.config)?;
            let cfg: Arc<config::Config> = config::config();
            tracing::info!(role = %cfg.general.role, "starting searchdog");
            searchdog::run(cfg).await
        }
    }
}

/// Offline query-plan check for a `_search` body: parse the DSL, run it
/// through the planner, and report what would happen without needing a
/// live cluster.
fn validate(path: &PathBuf) -> anyhow::Result<()> {
    let contents = std::fs::read_to_string(path)?;
    let body: serde_json::Value = serde_json::from_str(&contents)?;
    let parsed = searchdog::coordination::dsl::parse_search(&body).map_err(|e| anyhow::anyhow!("{}: {}", e.path, e.message))?;

    let budget = searchdog::coordination::planner::PushdownBudget { max_wall_time_ms: 5_000, max_memory_pages: 256 };
    let plan = searchdog::coordination::planner::plan(&parsed, None, budget);

    println!("complexity:    {}", plan.complexity);
    println!("cacheable:     {}", plan.cacheable);
    println!("udf_placement: {:?}", plan.udf_placement);
    Ok(())
}

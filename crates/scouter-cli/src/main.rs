//! scouter: fetch character pages, escalating to a browser when needed.

use std::path::PathBuf;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

mod config;
mod inspect_cmd;
mod output;
mod run_cmd;
mod sqlite;
mod targets;

/// Database used when a run names no other destination.
const DEFAULT_DB: &str = "data/characters.db";

#[derive(Parser)]
#[command(
    name = "scouter",
    about = "Fetch character wiki pages into structured records, rendering in a browser only when needed",
    version,
    after_help = "Run 'scouter <command> --help' for details on each command."
)]
struct Cli {
    /// Config file (JSON). Defaults to $SCOUTER_CONFIG, then ./scouter.json.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output results as JSON (machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Log level (trace, debug, info, warn, error). RUST_LOG takes precedence.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch every target and store the records.
    ///
    /// Examples:
    ///   scouter run Goku Vegeta "Master Roshi"
    ///   scouter run --catalog targets.txt --out records.jsonl --no-db
    Run {
        /// Target ids; a trailing '!' marks a page known to need rendering.
        ids: Vec<String>,

        /// Catalog file (JSON array or one 'id [path]' per line).
        #[arg(long)]
        catalog: Option<PathBuf>,

        /// Append records as JSON lines to this file.
        #[arg(long)]
        out: Option<PathBuf>,

        /// SQLite database for records [default: data/characters.db unless --out is given]
        #[arg(long)]
        db: Option<PathBuf>,

        /// Do not write to SQLite.
        #[arg(long, conflicts_with = "db")]
        no_db: bool,

        /// Maximum targets in flight.
        #[arg(long, short)]
        concurrency: Option<usize>,

        /// Never launch a browser; render attempts fail.
        #[arg(long)]
        http_only: bool,

        /// Show the browser window.
        #[arg(long)]
        no_headless: bool,

        /// Stream run events as JSON lines on stderr.
        #[arg(long)]
        events: bool,
    },

    /// Fetch one page once and show the verdict and extracted fields.
    Inspect {
        /// Target id.
        id: String,

        /// Path or absolute URL overriding the URL template.
        #[arg(long)]
        path: Option<String>,

        /// Use the browser instead of a plain HTTP request.
        #[arg(long)]
        render: bool,
    },

    /// Print the effective configuration.
    Config,

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   scouter completions bash > ~/.local/share/bash-completion/completions/scouter
    ///   scouter completions zsh > ~/.zfunc/_scouter
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

fn init_tracing(level: &str, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_json);

    match execute(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    }
}

async fn execute(cli: Cli) -> Result<i32> {
    let mut config = config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            ids,
            catalog,
            out,
            db,
            no_db,
            concurrency,
            http_only,
            no_headless,
            events,
        } => {
            if let Some(n) = concurrency {
                config.concurrency = n;
            }
            if no_headless {
                config.render.headless = false;
            }
            let db = match (db, no_db) {
                (_, true) => None,
                (None, false) if out.is_none() => Some(PathBuf::from(DEFAULT_DB)),
                (db, false) => db,
            };
            if db.is_none() && out.is_none() {
                anyhow::bail!("--no-db needs --out, otherwise records are not stored anywhere");
            }

            let args = run_cmd::RunArgs {
                ids,
                catalog,
                out,
                db,
                http_only,
                events,
            };
            let report = run_cmd::run(config, args).await?;
            if cli.json {
                println!("{}", output::render_json(&report));
            } else {
                print!("{}", output::render_human(&report));
            }
            Ok(output::exit_code(&report))
        }

        Commands::Inspect { id, path, render } => {
            let args = inspect_cmd::InspectArgs { id, path, render };
            inspect_cmd::run(config, args, cli.json).await?;
            Ok(0)
        }

        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(0)
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "scouter", &mut std::io::stdout());
            Ok(0)
        }
    }
}

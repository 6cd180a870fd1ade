//! xcell command-line tool
//!
//! Evaluates expressions and cell sheets in a sandboxed engine.

mod commands;
mod sheet;

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};
use tokio::task::LocalSet;
use tracing_subscriber::EnvFilter;
use xcell_engine::Engine;

use crate::commands::display;
use crate::sheet::Sheet;

#[derive(Parser)]
#[command(name = "xcell")]
#[command(about = "Reactive sandboxed JavaScript cells", long_about = None)]
#[command(version)]
struct Cli {
    /// Engine options file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// More log output (-v info, -vv debug, -vvv trace); RUST_LOG wins when set
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate one expression and print it as JSON
    Eval {
        /// Expression (JSX allowed)
        code: String,
    },

    /// Evaluate every cell in a sheet
    Run {
        /// Sheet file
        sheet: PathBuf,
        /// Print each cell's diagnostics
        #[arg(long)]
        debug: bool,
    },

    /// Print the compiled form of a snippet
    Compile {
        /// Source (JSX allowed)
        code: String,
    },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let options = commands::load_options(cli.config.as_deref())?;

    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    LocalSet::new().block_on(&runtime, async move {
        let engine = Engine::new(options)?;
        match cli.command {
            Commands::Eval { code } => {
                let value = commands::eval::execute(&engine, &code).await?;
                println!("{}", display(&value));
            }

            Commands::Run { sheet, debug } => {
                let loaded = Sheet::load(&sheet)?;
                tracing::info!(sheet = %sheet.display(), cells = loaded.cell_count(), "running sheet");
                let outcomes = commands::run::execute(&engine, &loaded).await?;
                let mut failed = 0;
                for outcome in &outcomes {
                    match &outcome.result {
                        Ok(value) => println!("{} = {}", outcome.label, display(value)),
                        Err(err) => {
                            failed += 1;
                            println!("{} ! {}", outcome.label, err);
                        }
                    }
                    if debug {
                        println!("{}", serde_json::to_string_pretty(&outcome.diagnostics)?);
                    }
                }
                if failed > 0 {
                    anyhow::bail!("{} of {} cells failed", failed, outcomes.len());
                }
            }

            Commands::Compile { code } => {
                println!("{}", commands::compile::execute(&engine.options().jsx, &code)?);
            }
        }
        if let Err(err) = engine.dispose() {
            tracing::warn!("engine teardown: {}", err);
        }
        Ok::<(), anyhow::Error>(())
    })
}

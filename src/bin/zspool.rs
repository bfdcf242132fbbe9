//! zspool command-line tool
//!
//! Inspect size class layouts and drive an allocator from a script:
//! - Show the class table for a configuration
//! - Print the effective configuration
//! - Run put/get/del scripts against a fresh pool
//!
//! # Examples
//!
//! ```bash
//! # Show classes for a 1 MiB budget
//! ZSPOOL_TOTAL_BUDGET=1048576 zspool classes
//!
//! # Run a script from a file
//! zspool --config zspool.toml run ops.txt
//!
//! # Run commands from stdin
//! echo "put greeting hello" | zspool run
//! ```

use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;
use tracing::info;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use zspool::shell::Shell;
use zspool::{Allocator, AllocatorConfig};

/// zspool - keyed slab memory pool
#[derive(Parser, Debug)]
#[command(name = "zspool")]
#[command(version = zspool::VERSION)]
#[command(about = "zspool - keyed slab memory pool", long_about = None)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML)
    #[arg(long, global = true, env = "ZSPOOL_CONFIG")]
    config: Option<PathBuf>,

    /// Also write logs to daily files in this directory
    #[arg(long, global = true, env = "ZSPOOL_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the size class table
    Classes,

    /// Print the effective configuration as TOML
    Config,

    /// Execute a command script against a fresh allocator
    Run {
        /// Script file (reads stdin when omitted)
        script: Option<PathBuf>,

        /// Print statistics after the script finishes
        #[arg(long)]
        stats: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    setup_logging(&cli)?;

    let config = AllocatorConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Classes => classes_command(&config),
        Commands::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
        Commands::Run { script, stats } => run_command(&config, script, stats),
    }
}

/// Setup logging to stderr and, optionally, rolling files
fn setup_logging(cli: &Cli) -> anyhow::Result<()> {
    let log_level = cli
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::WARN);

    let file_layer = match &cli.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file_appender = RollingFileAppender::new(Rotation::DAILY, dir, "zspool.log");
            Some(fmt::layer().with_writer(file_appender).with_ansi(false))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(io::stderr)
                .with_ansi(!cli.no_color),
        )
        .with(file_layer)
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .init();

    Ok(())
}

/// Classes command - print the block layout
fn classes_command(config: &AllocatorConfig) -> anyhow::Result<()> {
    let allocator = Allocator::with_config(config)?;
    let stats = allocator.stats();

    println!("Size classes ({})", stats.size_classes.len());
    println!("───────────────────────────────");
    println!("{:>5}  {:>8}  {:>8}  {:>10}", "index", "block", "blocks", "bytes");
    for class in &stats.size_classes {
        println!(
            "{:>5}  {:>8}  {:>8}  {:>10}",
            class.index,
            class.block_size,
            class.capacity,
            class.block_size * class.capacity
        );
    }
    println!("───────────────────────────────");
    println!(
        "Budget: {} bytes, carved: {} bytes",
        stats.total_budget, stats.carved_bytes
    );
    Ok(())
}

/// Run command - execute a script
fn run_command(config: &AllocatorConfig, script: Option<PathBuf>, stats: bool) -> anyhow::Result<()> {
    let mut shell = Shell::new(Allocator::with_config(config)?);
    let stdout = io::stdout();

    let summary = match &script {
        Some(path) => {
            info!(path = ?path, "Running script");
            let file = File::open(path)?;
            shell.run_script(BufReader::new(file), stdout.lock())?
        }
        None => shell.run_script(io::stdin().lock(), stdout.lock())?,
    };

    if stats {
        println!("{}", serde_json::to_string_pretty(&shell.allocator().stats())?);
    }

    info!(
        executed = summary.executed,
        failed = summary.failed,
        "Script complete"
    );
    if summary.failed > 0 {
        eprintln!("{} of {} commands failed", summary.failed, summary.executed);
    }
    Ok(())
}

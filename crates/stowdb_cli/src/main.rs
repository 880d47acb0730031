//! StowDB CLI
//!
//! Command-line tools for StowDB data files.
//!
//! # Commands
//!
//! - `inspect` - Show size accounting and the compaction verdict
//! - `compact` - Compact a data file by policy or on demand
//! - `verify` - Check every record in a data file
//! - `put` / `get` / `delete` - Edit single keys
//! - `login` - Log in to an auth service and print the session

mod commands;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use stowdb_core::SizeRatioPolicy;
use tracing_subscriber::EnvFilter;

const MIB: u64 = 1024 * 1024;

/// StowDB command-line tools.
#[derive(Parser)]
#[command(name = "stowdb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the data file
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Thresholds for the size/ratio compaction policy.
#[derive(Args, Debug, Clone, Copy)]
struct PolicyArgs {
    /// Only files larger than this many MiB are compacted
    #[arg(long, default_value_t = 100)]
    min_total_mib: u64,

    /// Only files whose live/total ratio is below this are compacted
    #[arg(long, default_value_t = 0.5)]
    max_used_ratio: f64,
}

impl PolicyArgs {
    fn policy(&self) -> SizeRatioPolicy {
        SizeRatioPolicy::new(self.min_total_mib.saturating_mul(MIB), self.max_used_ratio)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Show size accounting and whether the policy would compact
    Inspect {
        #[command(flatten)]
        policy: PolicyArgs,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Compact the data file
    Compact {
        #[command(flatten)]
        policy: PolicyArgs,

        /// Compact regardless of the policy
        #[arg(long)]
        force: bool,

        /// Dry run - show what would be done
        #[arg(short, long)]
        dry_run: bool,

        /// Fail instead of keeping the uncompacted file
        #[arg(long)]
        strict: bool,

        /// Compact on a background thread
        #[arg(long = "async")]
        background: bool,
    },

    /// Verify every record checksum
    Verify,

    /// Store a value
    Put {
        /// Key
        key: String,
        /// Value
        value: String,
    },

    /// Print a value
    Get {
        /// Key
        key: String,
    },

    /// Delete a key
    Delete {
        /// Key
        key: String,
    },

    /// Log in and print the session
    Login(commands::login::LoginArgs),

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { policy, format } => {
            let path = cli.path.ok_or("Data file path required for inspect")?;
            commands::inspect::run(&path, &policy.policy(), &format)?;
        }
        Commands::Compact {
            policy,
            force,
            dry_run,
            strict,
            background,
        } => {
            let path = cli.path.ok_or("Data file path required for compact")?;
            let options = commands::compact::CompactOptions {
                force,
                dry_run,
                strict,
                background,
            };
            commands::compact::run(&path, &policy.policy(), options)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Data file path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Put { key, value } => {
            let path = cli.path.ok_or("Data file path required for put")?;
            commands::kv::put(&path, &key, &value)?;
        }
        Commands::Get { key } => {
            let path = cli.path.ok_or("Data file path required for get")?;
            commands::kv::get(&path, &key)?;
        }
        Commands::Delete { key } => {
            let path = cli.path.ok_or("Data file path required for delete")?;
            commands::kv::delete(&path, &key)?;
        }
        Commands::Login(args) => {
            commands::login::run(&args)?;
        }
        Commands::Version => {
            println!("StowDB CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("StowDB Core v{}", stowdb_core::VERSION);
        }
    }

    Ok(())
}

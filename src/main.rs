use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use resumable::logging::{init_logging, LoggingConfig};
use resumable::{CheckpointName, CheckpointStore, GuardConfig, GuardError};

#[derive(Parser, Debug)]
#[command(name = "resumable")]
#[command(version)]
#[command(about = "Inspect and manage resumable iteration checkpoints")]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Checkpoint directory (overrides the configuration)
    #[arg(long, short = 'd', global = true)]
    dir: Option<PathBuf>,

    /// Suppress all output except errors
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Increase verbosity (-v, -vv)
    #[arg(long, short, action = ArgAction::Count, global = true, conflicts_with = "quiet")]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List stored checkpoint names
    List,

    /// Print a checkpoint's metadata and remaining items
    Show {
        /// Checkpoint name
        name: String,
    },

    /// Delete a checkpoint (succeeds if none exists)
    Clear {
        /// Checkpoint name
        name: String,
    },

    /// Print the file path a checkpoint name maps to
    Path {
        /// Checkpoint name
        name: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(LoggingConfig::from_flags(cli.verbose, cli.quiet).with_timestamps(false));

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            if e.is_construction_error() {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

fn run(cli: Cli) -> Result<(), GuardError> {
    let mut config = match &cli.config {
        Some(path) => GuardConfig::load(path)?,
        None => GuardConfig::from_env()?,
    };
    if let Some(dir) = cli.dir {
        config = config.with_base_dir(dir);
    }
    let store = config.open_store()?;

    match cli.command {
        Commands::List => {
            let names = store.list()?;
            if names.is_empty() && !cli.quiet {
                eprintln!("no checkpoints in {}", store.base_dir().display());
            }
            for name in names {
                println!("{}", name);
            }
        }
        Commands::Show { name } => show(&store, &CheckpointName::parse(&name)?)?,
        Commands::Clear { name } => {
            let name = CheckpointName::parse(&name)?;
            let existed = store.exists(&name);
            store.delete(&name)?;
            if !cli.quiet {
                if existed {
                    println!("cleared checkpoint '{}'", name);
                } else {
                    println!("no checkpoint named '{}'", name);
                }
            }
        }
        Commands::Path { name } => {
            let name = CheckpointName::parse(&name)?;
            println!("{}", store.path_for(&name).display());
        }
    }

    Ok(())
}

fn show(store: &CheckpointStore, name: &CheckpointName) -> Result<(), GuardError> {
    let checkpoint = store.inspect(name)?;

    println!("name:       {}", name);
    println!("path:       {}", store.path_for(name).display());
    println!("created_at: {}", checkpoint.created_at.to_rfc3339());
    println!("in_flight:  {}", checkpoint.in_flight);
    println!("items:      {}", checkpoint.items.len());
    for (index, item) in checkpoint.items.iter().enumerate() {
        let marker = if index == 0 && checkpoint.in_flight {
            "*"
        } else {
            " "
        };
        println!("{} {:>5}  {}", marker, index, item);
    }

    Ok(())
}

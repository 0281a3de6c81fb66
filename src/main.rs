use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;

use digital_library::{scan_orphans, Library, LibraryConfig, Migrator};

#[derive(Parser)]
#[command(name = "library-migrate", version, about = "Moves legacy book files into the blob store")]
struct Cli {
    /// JSON configuration file
    #[arg(long, env = "LIBRARY_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database, overrides the configured one
    #[arg(long, env = "LIBRARY_DATABASE")]
    database: Option<PathBuf>,

    /// Directory legacy paths are resolved against
    #[arg(long)]
    legacy_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Copy legacy files and covers into blobs
    Migrate,
    /// Check stored blobs and stamp intact records
    Verify {
        #[arg(long)]
        sample: Option<usize>,
    },
    /// Clear legacy paths from verified records
    Cleanup,
    /// List files and blobs no record references
    Orphans,
    Stats,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => LibraryConfig::load(path)?,
        None => LibraryConfig::default(),
    };
    if let Some(database) = cli.database {
        config.database_path = database;
    }
    if let Some(root) = cli.legacy_root {
        config.legacy_root = root;
    }

    let library = Library::open(config)?;
    let migrator = Migrator::new(&library);
    match cli.command {
        Command::Migrate => print_json(&migrator.migrate()?),
        Command::Verify { sample } => print_json(&migrator.verify(sample)?),
        Command::Cleanup => print_json(&migrator.cleanup()?),
        Command::Orphans => print_json(&scan_orphans(&library)?),
        Command::Stats => print_json(&library.stats()?),
    }
}

fn print_json<T: Serialize>(report: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use grim_save::report::{inspect_bytes, registry_value, render_text};

/// Inspects save files written by the engine.
#[derive(Parser, Debug)]
#[command(about = "Inspect Grim save files and registry dumps", version)]
struct Args {
    /// Log graph and registry decoding details
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Summarise every payload in a save file
    Inspect {
        /// Save or registry file to read
        file: PathBuf,

        /// Emit the summary as JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Print one value from the registry payload of a file
    Registry {
        /// Save or registry file to read
        file: PathBuf,

        /// Dotted path to look up, for example `options.subtitles`
        #[arg(long)]
        get: String,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    match args.command {
        Command::Inspect { file, json } => {
            let bytes = read_file(&file)?;
            let reports = inspect_bytes(&bytes)
                .with_context(|| format!("failed to inspect {}", file.display()))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&reports)?);
            } else {
                print!("{}", render_text(&reports));
            }
        }
        Command::Registry { file, get } => {
            let bytes = read_file(&file)?;
            let value = registry_value(&bytes, &get)
                .with_context(|| format!("failed to read registry from {}", file.display()))?;
            println!("{value}");
        }
    }
    Ok(())
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}

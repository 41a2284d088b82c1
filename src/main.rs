use anyhow::Result;
use clap::{Parser, Subcommand};
use mcsync::config::{Config, CONFIG_FILE};
use mcsync::device::DeviceClient;
use mcsync::reconcile::resolve::TerminalPrompt;
use mcsync::sync::{run_sync, SyncOptions};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "mcsync",
    version,
    about = "Sync a directory with a microcontroller filesystem",
    after_help = "mcsync does not monitor the device program's output after a sync; \
                  attach to the device's own console for that."
)]
struct Cli {
    /// Path to the project config file
    #[arg(short, long, global = true, default_value = CONFIG_FILE)]
    config: PathBuf,

    /// Verbose logging (repeat for more)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Reconcile the sync directory with the device filesystem
    Sync {
        /// Show the planned operations without transferring anything
        #[arg(long)]
        dry_run: bool,

        /// Restart the running program after device-side changes
        #[arg(long, conflicts_with = "no_restart")]
        restart: bool,

        /// Never restart the program
        #[arg(long)]
        no_restart: bool,

        /// Skip the pre-upload source transformation
        #[arg(long)]
        no_transpile: bool,
    },
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "mcsync=info",
        1 => "mcsync=debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Sync {
            dry_run,
            restart,
            no_restart,
            no_transpile,
        } => {
            let config = Config::load(&cli.config)?;
            let device = DeviceClient::new(&config.device_url)?;
            let options = SyncOptions {
                dry_run,
                restart: match (restart, no_restart) {
                    (true, _) => Some(true),
                    (_, true) => Some(false),
                    _ => None,
                },
                transpile: no_transpile.then_some(false),
            };

            let mut prompt = TerminalPrompt;
            let summary = run_sync(&config, &device, &options, &mut prompt).await?;

            if summary.aborted {
                println!("Synchronization aborted.");
                return Ok(ExitCode::FAILURE);
            }
            if summary.lines.is_empty() && summary.failed.is_empty() {
                println!("Nothing to synchronize.");
            }
            for line in &summary.lines {
                println!("{}", line);
            }
            if !summary.failed.is_empty() {
                eprintln!("The following paths did not synchronize:");
                for (path, error) in &summary.failed {
                    eprintln!("  {}: {}", path, error);
                }
                return Ok(ExitCode::FAILURE);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

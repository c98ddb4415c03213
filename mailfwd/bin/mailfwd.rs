#[cfg(not(any(target_os = "macos", unix)))]
compile_error!("Only macos and unix are currently supported");

use std::{path::PathBuf, sync::Arc};

use clap::{Parser, Subcommand};
use mailfwd::{Disposition, Mailfwd, controller::find_config_file};
use mailfwd_common::logging;
use mailfwd_dispatch::LogInvoker;
use tokio::io::AsyncReadExt;

/// Forward inbound mail to per-domain alias destinations
#[derive(Parser, Debug)]
#[command(name = "mailfwd")]
#[command(version)]
struct Cli {
    /// Configuration file (overrides `MAILFWD_CONFIG` and the default paths)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Compiled table to dispatch with (overrides `compiled_table`)
    #[arg(short, long)]
    table: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile the domain rules and print the resulting table
    Compile {
        /// Write the table to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Dispatch a single notification envelope
    Dispatch {
        /// File holding the envelope; reads stdin when omitted or `-`
        envelope: Option<PathBuf>,
    },
    /// Republish dead-lettered events once
    Retry {
        /// Most entries to republish (defaults to `retry.max_batch`)
        #[arg(long)]
        max_batch: Option<usize>,
    },
    /// Process the inbox and retry failures until shut down (default)
    Serve,
}

async fn read_envelope(source: Option<PathBuf>) -> anyhow::Result<String> {
    match source {
        Some(path) if path.as_os_str() != "-" => tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read envelope {}: {e}", path.display())),
        _ => {
            let mut envelope = String::new();
            tokio::io::stdin().read_to_string(&mut envelope).await?;
            Ok(envelope)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init();

    let mut config = Mailfwd::from_file(&find_config_file(cli.config)?)?;
    if let Some(table) = cli.table {
        config.compiled_table = Some(table);
    }

    match cli.command.unwrap_or(Command::Serve) {
        Command::Compile { output } => {
            let table = config.compile()?;
            let rendered = ron::ser::to_string_pretty(&table, ron::ser::PrettyConfig::default())?;

            match output {
                Some(path) => std::fs::write(&path, rendered).map_err(|e| {
                    anyhow::anyhow!("Failed to write table to {}: {e}", path.display())
                })?,
                None => println!("{rendered}"),
            }
        }
        Command::Dispatch { envelope } => {
            let envelope = read_envelope(envelope).await?;
            let runtime = config.init(Arc::new(LogInvoker)).await?;

            match runtime.handle(&envelope).await? {
                Disposition::Delivered(delivery) => {
                    println!(
                        "delivered {} to {}",
                        delivery.message_id,
                        delivery.destinations.join(", ")
                    );
                }
                Disposition::Dropped { message_id, reason } => {
                    println!("dropped {message_id}: {reason}");
                }
                Disposition::DeadLettered(id) => println!("dead-lettered as {id}"),
                Disposition::Rejected(e) => anyhow::bail!("rejected: {e}"),
            }
        }
        Command::Retry { max_batch } => {
            let runtime = config.init(Arc::new(LogInvoker)).await?;
            let count = runtime.retry(max_batch).await?;
            println!("republished {count}");
        }
        Command::Serve => config.run().await?,
    }

    Ok(())
}

//! mailroom - drains the email outbox through Resend.

mod app;
mod commands;
mod http;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use dispatcher_config_and_utils::{init_logging, init_logging_to_file, Config, Paths};

/// mailroom command-line interface.
#[derive(Parser)]
#[command(name = "mailroom")]
#[command(about = "Email outbox dispatcher with a Resend provider")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error). Defaults to the configured level
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Base directory for runtime files (database, logs, config). Defaults to ~/.mailroom
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    /// Configuration file. Defaults to <base-dir>/config.json
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP dispatch endpoint
    Serve,
    /// Run one dispatch batch and print the result as JSON
    Dispatch {
        /// Items to fetch (clamped to the configured maximum)
        #[arg(short, long)]
        batch_size: Option<usize>,
        /// Classify only; never send or touch the queue
        #[arg(long)]
        dry_run: bool,
    },
    /// Queue one email (sqlite backend)
    Enqueue {
        #[arg(long)]
        template: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        idempotency_key: String,
        /// Template variables as a JSON object
        #[arg(long)]
        payload: Option<String>,
    },
    /// Manage stored templates (sqlite backend)
    Template {
        #[command(subcommand)]
        action: TemplateCommand,
    },
    /// Print queue counters as JSON
    Stats,
}

#[derive(Subcommand)]
enum TemplateCommand {
    /// Create or replace a template
    Set {
        #[arg(long)]
        name: String,
        #[arg(long)]
        subject: String,
        /// File holding the HTML body
        #[arg(long)]
        html_file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    let config = match &cli.config {
        Some(path) => Config::load_with_file(path)?,
        None => Config::load(&paths)?,
    };

    // Initialize logging
    let level = cli.log_level.as_deref().unwrap_or(&config.log_level).to_string();
    match cli.command {
        None | Some(Commands::Serve) => {
            paths.ensure_dirs()?;
            init_logging_to_file(&level, &paths);
        }
        Some(_) => init_logging(&level),
    }

    match cli.command {
        None | Some(Commands::Serve) => commands::serve(config, &paths).await?,
        Some(Commands::Dispatch {
            batch_size,
            dry_run,
        }) => commands::dispatch(config, &paths, batch_size, dry_run).await?,
        Some(Commands::Enqueue {
            template,
            to,
            idempotency_key,
            payload,
        }) => {
            commands::enqueue(config, &paths, template, to, idempotency_key, payload.as_deref())
                .await?
        }
        Some(Commands::Template {
            action:
                TemplateCommand::Set {
                    name,
                    subject,
                    html_file,
                },
        }) => commands::set_template(config, &paths, &name, &subject, &html_file).await?,
        Some(Commands::Stats) => commands::stats(config, &paths).await?,
    }

    Ok(())
}

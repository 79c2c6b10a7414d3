//! `devtest` command-line front end.
//!
//! # Responsibility
//! - Expose list/page/show/save/delete over the DevTest controller.
//! - Print results as JSON on stdout and errors on stderr (exit code 1).

use clap::{Args, Parser, Subcommand};
use devtest_core::{
    default_log_level, init_logging, ChangeNotifier, DevTestController, DevTestView, EntityId,
    StoreConfig,
};
use log::{debug, error};
use serde::Serialize;
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(name = "devtest", version, about = "Manage DevTest campaign metrics")]
struct Cli {
    /// SQLite database file (defaults to $DEVTEST_DB_PATH, then the temp dir).
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Absolute directory for rolling log files; logging is off when omitted.
    #[arg(long, global = true)]
    log_dir: Option<String>,

    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List every row ordered by id.
    List,
    /// Show one page of rows.
    Page {
        /// Zero-based page index.
        #[arg(default_value_t = 0)]
        index: u64,
        #[arg(long)]
        size: Option<u64>,
    },
    /// Show one row.
    Show { id: EntityId },
    /// Insert (no --id) or update a row.
    Save(SaveArgs),
    /// Delete one row.
    Delete { id: EntityId },
}

#[derive(Debug, Args)]
struct SaveArgs {
    #[arg(long, default_value_t = 0)]
    id: EntityId,
    #[arg(long)]
    campaign: Option<String>,
    /// yyyy/MM/dd, yyyy-MM-dd or an ISO datetime.
    #[arg(long)]
    date: Option<String>,
    #[arg(long)]
    clicks: Option<i32>,
    #[arg(long)]
    conversions: Option<i32>,
    #[arg(long)]
    impressions: Option<i32>,
    #[arg(long)]
    affiliate: Option<String>,
    /// Version echoed from `show`; enables the stale-write check.
    #[arg(long, default_value_t = 0)]
    row_version: i64,
}

impl From<SaveArgs> for DevTestView {
    fn from(args: SaveArgs) -> Self {
        Self {
            id: args.id,
            campaign_name: args.campaign,
            date: args.date.unwrap_or_default(),
            clicks: args.clicks,
            conversions: args.conversions,
            impressions: args.impressions,
            affiliate_name: args.affiliate,
            row_version: args.row_version,
        }
    }
}

#[derive(Serialize)]
struct Saved {
    id: EntityId,
}

#[derive(Serialize)]
struct Deleted {
    deleted: EntityId,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Some(log_dir) = cli.log_dir.as_deref() {
        let level = cli.log_level.as_deref().unwrap_or(default_log_level());
        if let Err(err) = init_logging(level, log_dir) {
            eprintln!("devtest: {err}");
            return ExitCode::FAILURE;
        }
    }

    match run(cli).await {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("event=cli_command module=cli status=error error={err}");
            eprintln!("devtest: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<String, Box<dyn Error>> {
    let mut config = match cli.db {
        Some(path) => StoreConfig::file(path),
        None => StoreConfig::from_env(),
    };
    if let Command::Page {
        size: Some(size), ..
    } = cli.command
    {
        config = config.with_page_size(size);
    }
    let controller = DevTestController::new(config, ChangeNotifier::new());

    let output = match cli.command {
        Command::List => serde_json::to_string_pretty(&controller.list().await?)?,
        Command::Page { index, .. } => {
            let page = controller.page(index).await?;
            serde_json::to_string_pretty(&serde_json::json!({
                "items": page.items,
                "total": page.total,
                "page_index": page.page_index,
                "page_size": page.page_size,
                "page_count": page.page_count(),
            }))?
        }
        Command::Show { id } => serde_json::to_string_pretty(&controller.edit(id).await?)?,
        Command::Save(args) => {
            let id = controller.save(DevTestView::from(args)).await?;
            serde_json::to_string(&Saved { id })?
        }
        Command::Delete { id } => {
            controller.delete(id).await?;
            serde_json::to_string(&Deleted { deleted: id })?
        }
    };
    debug!("event=cli_command module=cli status=ok");
    Ok(output)
}

pub mod report;

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{bail, Result};
use chrono::Utc;
use clap::{CommandFactory, Parser, Subcommand};
use report::HistoryRange;
use tokio::io::AsyncReadExt;
use tracing::level_filters::LevelFilter;

use crate::{
    daemon::{
        start_daemon,
        storage::playtime_store::{PlaytimeStore, DB_FILE_NAME},
        DEFAULT_COLLECTION_INTERVAL,
    },
    snapshot_api::{command::CommandSource, parse_snapshots, AppSnapshot, SnapshotSource},
    utils::{
        dir::create_application_default_path,
        logging::{enable_logging, CLI_PREFIX, DAEMON_PREFIX},
    },
};

#[derive(Parser, Debug)]
#[command(name = "Playtally", version, long_about = None)]
#[command(about = "Tracks how long your applications are used each day", long_about = None)]
struct Args {
    #[command(subcommand)]
    commands: Commands,
    #[arg(long, help = "Enable logging")]
    log: bool,
    #[arg(
        long,
        global = true,
        help = "Application directory. By default tries to save into $XDG_STATE_HOME or $HOME/.local/state"
    )]
    dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
#[command(version, about, long_about = None)]
enum Commands {
    #[command(about = "Run the collection daemon in the current console")]
    Serve {
        #[arg(
            long,
            help = "Command that prints the current usage snapshots as a json array"
        )]
        command: String,
        #[arg(
            long,
            default_value_t = DEFAULT_COLLECTION_INTERVAL.as_secs() / 60,
            help = "Minutes between collection rounds"
        )]
        interval: u64,
    },
    #[command(about = "Record one batch of snapshots and exit")]
    Ingest {
        #[arg(long, help = "Command that prints the snapshots as a json array")]
        command: Option<String>,
        #[arg(long, help = "File with the snapshots. Pass - to read stdin")]
        file: Option<PathBuf>,
    },
    #[command(about = "Display every application active over the last week")]
    Overview {
        #[arg(long, help = "Print as json")]
        json: bool,
    },
    #[command(about = "Display one application in detail")]
    Show {
        app_id: i64,
        #[arg(long, help = "Print as json")]
        json: bool,
    },
    #[command(about = "Display raw records of one application")]
    History {
        app_id: i64,
        #[command(flatten)]
        range: HistoryRange,
        #[arg(long, help = "Print as json")]
        json: bool,
    },
    #[command(about = "Remove records that fell out of the week window")]
    Prune {},
}

pub async fn run_cli() -> Result<()> {
    let args = Args::parse();

    let logging_level = if args.log {
        Some(LevelFilter::TRACE)
    } else {
        None
    };
    let app_dir = match args.dir {
        Some(dir) => dir,
        None => create_application_default_path()?,
    };
    let prefix = if matches!(args.commands, Commands::Serve { .. }) {
        DAEMON_PREFIX
    } else {
        CLI_PREFIX
    };
    enable_logging(prefix, &app_dir, logging_level, args.log)?;

    let today = Utc::now().date_naive();

    match args.commands {
        Commands::Serve { command, interval } => {
            start_daemon(app_dir, command, collection_interval(interval)?).await?;
            Ok(())
        }
        Commands::Ingest { command, file } => {
            let snapshots = fetch_snapshots(command, file).await?;
            let store = PlaytimeStore::open(&app_dir.join(DB_FILE_NAME))?;
            let written = store.ingest_batch(&snapshots, Utc::now())?;
            println!("Recorded {written} snapshots");
            Ok(())
        }
        Commands::Overview { json } => {
            let store = PlaytimeStore::open(&app_dir.join(DB_FILE_NAME))?;
            report::print_activities(&store.overview(today)?, json)
        }
        Commands::Show { app_id, json } => {
            let store = PlaytimeStore::open(&app_dir.join(DB_FILE_NAME))?;
            let Some(detail) = store.app_detail(app_id, today)? else {
                bail!("No records for app {app_id}");
            };
            report::print_detail(&detail, json)
        }
        Commands::History {
            app_id,
            range,
            json,
        } => {
            let (since, until) = range.resolve()?;
            let store = PlaytimeStore::open(&app_dir.join(DB_FILE_NAME))?;
            report::print_records(&store.history(app_id, since, until)?, json)
        }
        Commands::Prune {} => {
            let store = PlaytimeStore::open(&app_dir.join(DB_FILE_NAME))?;
            let deleted = store.prune(today)?;
            println!("Deleted {deleted} records");
            Ok(())
        }
    }
}

const MAX_INTERVAL_MINUTES: u64 = 24 * 60;

/// Checks the bounds before the seconds conversion, so no `--interval` value can overflow.
fn collection_interval(minutes: u64) -> Result<Duration> {
    if minutes == 0 || minutes > MAX_INTERVAL_MINUTES {
        return Err(Args::command()
            .error(
                clap::error::ErrorKind::ValueValidation,
                format!("Interval must be between 1 and {MAX_INTERVAL_MINUTES} minutes"),
            )
            .into());
    }
    Ok(Duration::from_secs(minutes * 60))
}

async fn fetch_snapshots(
    command: Option<String>,
    file: Option<PathBuf>,
) -> Result<Vec<AppSnapshot>> {
    match (command, file) {
        (Some(command), None) => {
            let mut source = CommandSource::new(command);
            source.fetch().await
        }
        (None, Some(file)) => read_snapshot_file(&file).await,
        _ => Err(Args::command()
            .error(
                clap::error::ErrorKind::ValueValidation,
                "Ingest needs exactly one of --command or --file",
            )
            .into()),
    }
}

async fn read_snapshot_file(file: &Path) -> Result<Vec<AppSnapshot>> {
    let payload = if file == Path::new("-") {
        let mut payload = String::new();
        tokio::io::stdin().read_to_string(&mut payload).await?;
        payload
    } else {
        tokio::fs::read_to_string(file).await?
    };
    parse_snapshots(&payload)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::collection_interval;

    #[test]
    fn interval_bounds_are_enforced() {
        assert!(collection_interval(0).is_err());
        assert!(collection_interval(24 * 60 + 1).is_err());
        assert!(collection_interval(u64::MAX).is_err());
        assert_eq!(collection_interval(20).unwrap(), Duration::from_secs(1200));
        assert_eq!(
            collection_interval(24 * 60).unwrap(),
            Duration::from_secs(86400)
        );
    }
}

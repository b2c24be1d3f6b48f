//! encore — listening tracker CLI.
//!
//! Drives the tracker service from the command line: the playback
//! engine calls `record` with what it observed, everything else is
//! for the user. Usage:
//!   encore record <track.json> <listened_ms>
//!   encore sync
//!   encore stats <from_ms> <to_ms>
//!   encore export [path]
//!   encore import <path>
//!   encore reset

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing_subscriber::EnvFilter;

use encore::config::Config;
use encore::event::{PlayEvent, TrackInfo};
use encore::namespace::{NamespaceCredentials, SecretToken};
use encore::pending::JsonFileStore;
use encore::remote::RemoteClient;
use encore::sync::SyncOutcome;
use encore::tracker::{RecordOutcome, Tracker};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        usage();
    }

    let config = Config::load()?;

    match args[1].as_str() {
        "record" if args.len() >= 4 => cmd_record(&config, &args[2], &args[3]).await,
        "sync" => cmd_sync(&config).await,
        "stats" if args.len() >= 4 => cmd_stats(&config, &args[2], &args[3]).await,
        "export" => cmd_export(&config, args.get(2).map(String::as_str)).await,
        "import" if args.len() >= 3 => cmd_import(&config, &args[2]).await,
        "reset" => cmd_reset(&config).await,
        _ => usage(),
    }
}

fn usage() -> ! {
    eprintln!(
        "Usage: encore record <track.json> <listened_ms>\n       \
         encore sync\n       \
         encore stats <from_ms> <to_ms>\n       \
         encore export [path]\n       \
         encore import <path>\n       \
         encore reset"
    );
    std::process::exit(1);
}

fn build_tracker(config: &Config) -> Result<Tracker> {
    if config.identity.server_id.is_empty() || config.identity.user_id.is_empty() {
        bail!(
            "No identity configured. Set [identity] server_id and user_id in {}",
            Config::config_path()?.display()
        );
    }

    let secret = SecretToken::load_or_generate(&SecretToken::default_path()?)?;
    let creds = NamespaceCredentials::derive(
        &config.identity.server_id,
        &config.identity.user_id,
        &secret,
    );

    let client = RemoteClient::new(
        &config.remote.base_url,
        Duration::from_secs(config.remote.request_timeout_secs),
    )?;
    let queue_path = match config.storage.data_dir.as_deref() {
        Some(dir) => {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create data directory {dir}"))?;
            JsonFileStore::path_in(Path::new(dir))
        }
        None => JsonFileStore::default_path()?,
    };
    let store = JsonFileStore::new(queue_path);

    Ok(Tracker::new(
        Box::new(store),
        Box::new(client),
        creds,
        config.sync.auto_sync_threshold,
    ))
}

async fn cmd_record(config: &Config, track_path: &str, listened: &str) -> Result<()> {
    let listened_ms: u64 = listened
        .parse()
        .with_context(|| format!("Invalid listened_ms: {listened}"))?;
    let contents = fs::read_to_string(track_path)
        .with_context(|| format!("Failed to read track file {track_path}"))?;
    let track: TrackInfo =
        serde_json::from_str(&contents).context("Failed to parse track JSON")?;

    let mut tracker = build_tracker(config)?;
    let outcome = tracker.record_play(&track, listened_ms).await?;
    match outcome {
        RecordOutcome::Skipped => println!("skipped (below recording threshold)"),
        RecordOutcome::Recorded { sync } => {
            println!("recorded ({} pending)", tracker.pending_len());
            if let Some(outcome) = sync {
                print_sync_outcome(outcome);
            }
        }
    }

    // the host may kill us right after; push what we can
    tracker.flush_on_exit();
    Ok(())
}

async fn cmd_sync(config: &Config) -> Result<()> {
    let mut tracker = build_tracker(config)?;
    let outcome = tracker.sync_now().await?;
    print_sync_outcome(outcome);
    Ok(())
}

fn print_sync_outcome(outcome: SyncOutcome) {
    match outcome {
        SyncOutcome::Synced { accepted, skipped } => {
            println!("synced: {accepted} accepted, {skipped} skipped");
        }
        SyncOutcome::NothingToSync => println!("nothing to sync"),
        SyncOutcome::Failed => println!("sync failed, events kept for retry"),
    }
}

async fn cmd_stats(config: &Config, from: &str, to: &str) -> Result<()> {
    let from: i64 = from.parse().with_context(|| format!("Invalid from: {from}"))?;
    let to: i64 = to.parse().with_context(|| format!("Invalid to: {to}"))?;

    let mut tracker = build_tracker(config)?;
    let stats = tracker.stats(from, to).await?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

async fn cmd_export(config: &Config, path: Option<&str>) -> Result<()> {
    let mut tracker = build_tracker(config)?;
    let events = tracker.export().await?;
    let json = serde_json::to_string_pretty(&events)?;

    match path {
        Some(path) => {
            fs::write(path, json).with_context(|| format!("Failed to write {path}"))?;
            eprintln!("exported {} events to {path}", events.len());
        }
        None => println!("{json}"),
    }
    Ok(())
}

async fn cmd_import(config: &Config, path: &str) -> Result<()> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("Failed to read {path}"))?;
    let events: Vec<PlayEvent> =
        serde_json::from_str(&contents).context("Failed to parse event array")?;

    let mut tracker = build_tracker(config)?;
    let summary = tracker.import(events).await?;
    println!(
        "imported: {} uploaded, {} duplicates, {} invalid",
        summary.uploaded, summary.duplicates, summary.invalid
    );
    Ok(())
}

async fn cmd_reset(config: &Config) -> Result<()> {
    let mut tracker = build_tracker(config)?;
    let deleted = tracker.reset().await?;
    println!("reset: {deleted} events deleted");
    Ok(())
}

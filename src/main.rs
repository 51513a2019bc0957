use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use feedsync::config::{Config, DatabaseKind};
use feedsync::feed::{fetch_metadata, Fetcher};
use feedsync::storage::{CategorySettings, Database, DatabaseError, FeedSettings, UpdatePolicy};
use feedsync::sync::{Scheduler, SyncEvent, UpdateSelection, UpdateSummary, UpdateTrigger};

/// Get the config directory path (~/.config/feedsync/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("feedsync"))
}

fn ensure_config_dir(config_dir: &Path) -> Result<()> {
    if !config_dir.exists() {
        std::fs::create_dir_all(config_dir).context("Failed to create config directory")?;
        tracing::info!(path = %config_dir.display(), "Created config directory");
    }

    // SEC-007: Set directory permissions on Unix (user-only access)
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        match std::fs::metadata(config_dir) {
            Ok(metadata) => {
                let mut perms = metadata.permissions();
                perms.set_mode(0o700);
                if let Err(e) = std::fs::set_permissions(config_dir, perms) {
                    tracing::warn!(
                        path = %config_dir.display(),
                        error = %e,
                        "Failed to set config directory permissions to 0700"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(
                    path = %config_dir.display(),
                    error = %e,
                    "Failed to read config directory metadata"
                );
            }
        }
    }
    Ok(())
}

#[derive(Parser, Debug)]
#[command(name = "feedsync", version, about = "Scheduled RSS/ATOM/RDF feed synchronization")]
struct Args {
    /// Configuration file (default: ~/.config/feedsync/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Message store (default: ~/.config/feedsync/messages.db)
    #[arg(long, value_name = "FILE", global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scheduler until interrupted
    Run,
    /// Update feeds now (all feeds when no selection is given)
    Update {
        #[arg(long = "feed", value_name = "ID")]
        feeds: Vec<i64>,
        #[arg(long = "category", value_name = "ID")]
        categories: Vec<i64>,
        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Subscribe to a feed
    AddFeed {
        url: String,
        #[arg(long, value_name = "ID")]
        category: Option<i64>,
        /// Own update interval in minutes
        #[arg(long, value_name = "MIN", conflicts_with = "no_auto_update")]
        interval: Option<u32>,
        /// Only update on explicit request
        #[arg(long)]
        no_auto_update: bool,
    },
    /// Create a category
    AddCategory {
        title: String,
        #[arg(long, value_name = "ID")]
        parent: Option<i64>,
    },
    /// List categories and feeds
    List,
    /// Compact the message store
    Defragment,
    /// Permanently remove deleted messages
    Purge,
    /// Show what a feed says about itself without subscribing
    Metadata { url: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing for debug logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => {
            ensure_config_dir(&config_dir)?;
            config_dir.join("config.toml")
        }
    };
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let fetcher = Fetcher::new(&config).context("Failed to build HTTP client")?;

    // Previewing a feed needs no store
    if let Command::Metadata { url } = &args.command {
        let preview = fetch_metadata(&fetcher, url, None)
            .await
            .with_context(|| format!("Failed to read feed {}", url))?;
        println!("{}", serde_json::to_string_pretty(&preview)?);
        return Ok(());
    }

    let db_path = match (&args.database, config.database) {
        (Some(path), _) => path.clone(),
        (None, DatabaseKind::Memory) => PathBuf::from(Database::IN_MEMORY),
        (None, DatabaseKind::File) => {
            ensure_config_dir(&config_dir)?;
            config_dir.join("messages.db")
        }
    };
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!(
                "Error: Another instance of feedsync appears to be running. Please close it and try again."
            );
            std::process::exit(1);
        }
        Err(e) => {
            return Err(anyhow::anyhow!("Failed to open database: {}", e));
        }
    };

    let (event_tx, event_rx) = mpsc::channel::<SyncEvent>(32);
    let reporter = tokio::spawn(report_events(event_rx));
    let scheduler = Scheduler::new(db.clone(), fetcher.clone(), &config, Some(event_tx));

    let outcome = execute(args.command, &scheduler, &fetcher).await;

    drop(scheduler);
    if let Err(e) = reporter.await {
        tracing::debug!(error = %e, "Event reporter stopped");
    }
    db.close().await;
    outcome
}

async fn execute(command: Command, scheduler: &Scheduler, fetcher: &Fetcher) -> Result<()> {
    match command {
        Command::Run => {
            let shutdown = CancellationToken::new();
            let signal = shutdown.clone();
            tokio::spawn(async move {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "Failed to listen for Ctrl-C");
                }
                signal.cancel();
            });
            println!("Scheduler running, press Ctrl-C to stop.");
            scheduler.run(shutdown).await;
        }
        Command::Update {
            feeds,
            categories,
            json,
        } => {
            let selection = if feeds.is_empty() && categories.is_empty() {
                UpdateSelection::All
            } else {
                UpdateSelection::Items { feeds, categories }
            };
            let summary = scheduler
                .request_update(selection, UpdateTrigger::Manual)?
                .wait()
                .await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print_summary(&summary);
            }
        }
        Command::AddFeed {
            url,
            category,
            interval,
            no_auto_update,
        } => {
            let preview = fetch_metadata(fetcher, &url, None)
                .await
                .with_context(|| format!("Failed to read feed {}", url))?;
            let update_policy = match (interval, no_auto_update) {
                (_, true) => UpdatePolicy::Disabled,
                (Some(minutes), false) => UpdatePolicy::Custom(minutes),
                (None, false) => UpdatePolicy::Global,
            };
            let id = scheduler
                .add_feed(&FeedSettings {
                    category_id: category,
                    title: preview.title.clone(),
                    description: preview.description,
                    url: preview.url,
                    format: Some(preview.format),
                    update_policy,
                    icon_url: preview.icon_url,
                    ..Default::default()
                })
                .await?;
            println!(
                "Added feed {}: {} ({}, {} items)",
                id,
                preview.title,
                preview.format.as_str(),
                preview.item_count
            );
        }
        Command::AddCategory { title, parent } => {
            let id = scheduler
                .add_category(&CategorySettings {
                    parent_id: parent,
                    title,
                    ..Default::default()
                })
                .await?;
            println!("Added category {}", id);
        }
        Command::List => list(scheduler).await?,
        Command::Defragment => {
            let outcome = scheduler.defragment().await?;
            println!("Defragment: {:?}", outcome);
        }
        Command::Purge => {
            let purged = scheduler.purge_deleted().await?;
            println!("Purged {} deleted messages", purged);
        }
        Command::Metadata { .. } => {}
    }
    Ok(())
}

async fn list(scheduler: &Scheduler) -> Result<()> {
    let db = scheduler.database();
    let categories = db.get_categories().await?;
    let feeds = db.get_feeds().await?;
    let unread: std::collections::HashMap<i64, i64> =
        db.unread_counts().await?.into_iter().collect();
    let now = Utc::now();

    for category in &categories {
        match category.parent_id {
            Some(parent) => println!("[{}] {} (in {})", category.id, category.title, parent),
            None => println!("[{}] {}", category.id, category.title),
        }
    }
    for feed in &feeds {
        let next = match scheduler.minutes_until_due(feed, now) {
            Some(0) => "due".to_string(),
            Some(minutes) => format!("in {} min", minutes),
            None => "manual".to_string(),
        };
        println!(
            "{:>4}  {:<40} unread {:>4}  next {:<10} {}",
            feed.id,
            feed.title,
            unread.get(&feed.id).copied().unwrap_or(0),
            next,
            feed.last_error.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

fn print_summary(summary: &UpdateSummary) {
    println!(
        "{} feeds: {} new, {} updated, {} unchanged, {} failed, {} skipped{}",
        summary.feeds_total,
        summary.new,
        summary.updated,
        summary.unchanged,
        summary.failed,
        summary.skipped,
        if summary.cancelled { " (cancelled)" } else { "" }
    );
    for failure in &summary.errors {
        println!("  [{}] {}: {}", failure.feed_id, failure.title, failure.error);
    }
}

async fn report_events(mut rx: mpsc::Receiver<SyncEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            SyncEvent::UpdateStarted {
                trigger,
                feeds_total,
            } => {
                tracing::info!(trigger = ?trigger, feeds = feeds_total, "Updating feeds");
            }
            SyncEvent::FeedUpdated {
                title,
                current,
                total,
                ..
            } => {
                tracing::info!(current, total, "Updated feed '{}'", title);
            }
            SyncEvent::UpdateFinished(summary) => {
                if summary.trigger != UpdateTrigger::Manual {
                    print_summary(&summary);
                }
            }
            SyncEvent::DefragmentFinished(outcome) => {
                tracing::debug!(outcome = ?outcome, "Defragment finished");
            }
        }
    }
}

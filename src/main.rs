use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use feedwatch::config::Config;
use feedwatch::feed::ReqwestFetcher;
use feedwatch::storage::{Database, StoreError};
use feedwatch::util::domain_from_url;
use feedwatch::watcher::{FeedWatcher, RegistrationKind, WatchOptions};

/// Get the config directory path (~/.config/feedwatch/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    let config_dir = PathBuf::from(home).join(".config").join("feedwatch");
    Ok(config_dir)
}

/// Create the config directory with user-only access
fn ensure_config_dir(config_dir: &std::path::Path) -> Result<()> {
    if !config_dir.exists() {
        std::fs::create_dir_all(config_dir).context("Failed to create config directory")?;
        println!("Created config directory: {}", config_dir.display());
    }

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
#[command(name = "feedwatch", about = "Watch site feeds for new items")]
struct Args {
    /// Config file (default: ~/.config/feedwatch/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Database file (default: ~/.config/feedwatch/feeds.db)
    #[arg(long, value_name = "FILE", global = true)]
    db: Option<PathBuf>,

    /// Reset database (delete and recreate)
    #[arg(long, global = true)]
    reset_db: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Watch the feed of the site that PAGE_URL belongs to
    Add {
        page_url: String,
        /// Feed location, absolute or relative to the page
        feed_url: String,
    },
    /// Stop watching a domain
    Remove { domain: String },
    /// Show every watched feed and its unread count
    Status,
    /// Check one domain, or every watched feed
    Check { domain: Option<String> },
    /// Mark a domain's feed as read
    Seen { domain: String },
    /// Check all feeds periodically until interrupted
    Watch {
        /// Minutes between rounds (default: refresh_interval_minutes)
        #[arg(long, value_name = "MINUTES")]
        interval: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let db_path = match &args.db {
        Some(path) => path.clone(),
        None => {
            ensure_config_dir(&config_dir)?;
            config_dir.join("feeds.db")
        }
    };

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    if args.reset_db && db_path.exists() {
        std::fs::remove_file(&db_path).context("Failed to delete database")?;
        println!("Database reset.");
    }

    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(StoreError::InstanceLocked) => {
            eprintln!(
                "Error: Another instance of feedwatch appears to be running. Please close it and try again."
            );
            std::process::exit(1);
        }
        Err(e) => {
            return Err(anyhow::anyhow!("Failed to open database: {}", e));
        }
    };

    let fetcher = ReqwestFetcher::with_user_agent(
        &config.user_agent,
        config.check_timeout(),
        config.max_retries,
    )
    .context("Failed to build HTTP client")?;

    let watcher = FeedWatcher::load(
        Arc::new(fetcher),
        Arc::new(db),
        WatchOptions::from(&config),
    )
    .await
    .context("Failed to load watched feeds")?;

    match args.command {
        Command::Add { page_url, feed_url } => add(&watcher, &page_url, &feed_url).await,
        Command::Remove { domain } => {
            if watcher.unregister(&domain).await? {
                println!("Stopped watching {}", domain);
            } else {
                println!("{} is not watched", domain);
            }
            Ok(())
        }
        Command::Status => {
            print_status(&watcher);
            Ok(())
        }
        Command::Check { domain: Some(domain) } => {
            match watcher.check(&domain).await {
                None => println!("{} is not watched", domain),
                Some(None) => println!("{}: check failed", domain),
                Some(Some(_)) => println!("{}: {}", domain, watcher.status(&domain)),
            }
            Ok(())
        }
        Command::Check { domain: None } => {
            check_round(&watcher).await;
            Ok(())
        }
        Command::Seen { domain } => {
            if watcher.mark_caught_up(&domain).await? {
                println!("{}: {}", domain, watcher.status(&domain));
            } else {
                println!("{} is not watched", domain);
            }
            Ok(())
        }
        Command::Watch { interval } => {
            let period = match interval {
                Some(0) => None,
                Some(minutes) => Some(Duration::from_secs(minutes.saturating_mul(60))),
                None => config.refresh_interval(),
            };
            let Some(period) = period else {
                anyhow::bail!(
                    "No refresh interval: set refresh_interval_minutes in {} or pass --interval",
                    config_path.display()
                );
            };
            watch(&watcher, period).await
        }
    }
}

async fn add(watcher: &FeedWatcher, page_url: &str, feed_url: &str) -> Result<()> {
    let domain = domain_from_url(page_url)
        .ok_or_else(|| anyhow::anyhow!("'{}' is not a page URL with a host", page_url))?;

    if !watcher.feeds_found(page_url, &[feed_url]) {
        if watcher.has_registration(&domain) {
            println!("{} already has a feed", domain);
            return Ok(());
        }
        anyhow::bail!("'{}' is not an acceptable feed URL", feed_url);
    }

    watcher
        .commit(&domain)
        .await
        .with_context(|| format!("Failed to save feed for {}", domain))?;
    println!("Watching {}", domain);

    match watcher.check(&domain).await {
        Some(Some(_)) => println!("{}: {}", domain, watcher.status(&domain)),
        _ => println!("{}: first check failed, will retry on next check", domain),
    }
    Ok(())
}

fn print_status(watcher: &FeedWatcher) {
    let registrations = watcher.registrations();
    if registrations.is_empty() {
        println!("No feeds watched. Add one with: feedwatch add <page-url> <feed-url>");
        return;
    }
    for (registration, kind) in registrations {
        if kind == RegistrationKind::Committed {
            println!(
                "{:<32} {:<16} {}",
                registration.domain,
                watcher.status(&registration.domain).to_string(),
                registration.feed_url
            );
        }
    }
}

async fn check_round(watcher: &FeedWatcher) {
    let results = watcher.check_all().await;
    let failed = results.iter().filter(|(_, unread)| unread.is_none()).count();
    tracing::info!(checked = results.len(), failed = failed, "Check round finished");

    for (domain, unread) in results {
        match unread {
            Some(count) if count > 0 => println!("{}: {} new", domain, count),
            Some(_) => {}
            None => println!("{}: check failed", domain),
        }
    }
}

async fn watch(watcher: &FeedWatcher, period: Duration) -> Result<()> {
    println!(
        "Checking {} feeds every {} minutes. Press Ctrl+C to stop.",
        watcher.registrations().len(),
        period.as_secs() / 60
    );

    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = ticker.tick() => check_round(watcher).await,
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl+C")?;
                println!("Goodbye!");
                return Ok(());
            }
        }
    }
}

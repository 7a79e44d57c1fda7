#![forbid(unsafe_code)]

//! Maintenance CLI for the sitemap database the edge server writes to.

use std::{
    fs,
    io::{self, Write},
    path::PathBuf,
};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, TimeDelta, Utc};
use clap::{Parser, Subcommand};
use flexiyo_edge::config::{RuntimeOverrides, resolve_runtime_config};
use flexiyo_edge::security::ensure_not_root;
use flexiyo_edge::sitemap::SitemapStore;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sitemap")]
#[command(about = "Inspect and maintain the Flexiyo sitemap database", long_about = None)]
struct Cli {
    /// Directory holding sitemap.db (defaults to DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Env file with configuration overrides
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// Render the sitemap, honoring the stored snapshot
    Export {
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print entry count and snapshot age
    Stats,
    /// Drop entries not played within the given number of days
    Prune {
        #[arg(long)]
        older_than_days: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(io::stderr)
        .try_init();

    let cli = Cli::parse();
    ensure_not_root("sitemap")?;
    run(cli, Utc::now(), &mut io::stdout().lock()).await
}

async fn run(cli: Cli, now: DateTime<Utc>, out: &mut impl Write) -> Result<()> {
    let config = resolve_runtime_config(RuntimeOverrides {
        data_dir: cli.data_dir,
        env_path: cli.env_file,
        ..RuntimeOverrides::default()
    })?;
    let db_path = config.sitemap_db_path();
    let store = SitemapStore::open(&db_path).await?;

    match cli.command {
        Command::Export { output } => {
            let xml = store.render(&config.site_origin, now).await?;
            match output {
                Some(path) => {
                    fs::write(&path, &xml)
                        .with_context(|| format!("writing sitemap to {}", path.display()))?;
                    info!(path = %path.display(), bytes = xml.len(), "sitemap exported");
                }
                None => writeln!(out, "{xml}")?,
            }
        }
        Command::Stats => {
            writeln!(out, "database: {}", db_path.display())?;
            writeln!(out, "entries: {}", store.entry_count().await?)?;
            let snapshot = match store.snapshot().await? {
                None => "none".to_string(),
                Some(snapshot) => match snapshot.age(now) {
                    Some(age) => format!(
                        "{}h old ({})",
                        age.num_hours(),
                        if snapshot.is_fresh(now) {
                            "fresh"
                        } else {
                            "expired"
                        }
                    ),
                    None => format!("unreadable timestamp {:?}", snapshot.created_at),
                },
            };
            writeln!(out, "snapshot: {snapshot}")?;
        }
        Command::Prune { older_than_days } => {
            if older_than_days == 0 {
                bail!("--older-than-days must be at least 1");
            }
            let cutoff = now - TimeDelta::days(i64::from(older_than_days));
            let removed = store.prune_older_than(cutoff).await?;
            info!(removed, %cutoff, "pruned sitemap entries");
            writeln!(out, "removed {removed} entries")?;
        }
    }
    Ok(())
}

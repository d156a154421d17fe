//! Bucket Backup - Main entry point
//!
//! Runs one incremental backup of the configured folder and exits.

use anyhow::{bail, Result};
use bucket_backup::config::Settings;
use bucket_backup::fs::IgnoreSet;
use bucket_backup::sync::IndexStore;
use bucket_backup::transfer::format::format_elapsed;
use bucket_backup::transfer::ObjectStoreUploader;
use bucket_backup::{utils, FailurePolicy, IndexHandle, SyncEngine, SyncOptions};
use clap::Parser;
use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a TOML configuration file (environment variables override it)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Keep going after a file fails and report failures at the end
    #[arg(long)]
    continue_on_error: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Configuration errors are fatal before anything touches the source or bucket
    let mut settings = Settings::load(args.config.as_deref())?;
    if args.continue_on_error {
        settings.failure_policy = FailurePolicy::Continue;
    }

    let log_level = args.log_level.as_deref().unwrap_or(&settings.log_level);
    utils::logger::init(log_level)?;

    tracing::info!(
        "Starting bucket-backup v{} ({} -> s3://{}/{})",
        env!("CARGO_PKG_VERSION"),
        settings.backup_folder.display(),
        settings.bucket,
        settings.upload_root_folder
    );

    let ignore = IgnoreSet::load(&settings.ignore_file)?;
    let uploader = ObjectStoreUploader::s3(&settings)?;
    let engine = SyncEngine::new(
        &settings.backup_folder,
        &ignore,
        &uploader,
        SyncOptions::from_settings(&settings),
    );

    let start = Instant::now();
    let report = match &settings.cache_file {
        Some(path) => {
            let store = IndexStore::new(path);
            let mut index = store.load_or_empty(settings.hash_algorithm);
            engine
                .run(Some(IndexHandle {
                    index: &mut index,
                    store: &store,
                }))
                .await?
        }
        None => engine.run(None).await?,
    };

    println!("{} in {}", report, format_elapsed(start.elapsed().as_millis()));

    if !report.is_success() {
        for failure in &report.failed {
            eprintln!("failed: {}", failure.error);
        }
        bail!("{} file(s) could not be backed up", report.failed.len());
    }

    Ok(())
}

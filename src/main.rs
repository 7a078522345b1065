#![allow(clippy::multiple_crate_versions)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use edgellm::config::Config;
use edgellm::models::download::format_bytes;
use edgellm::models::{
    checksum, AssetLocator, DownloadProgress, HttpTransport, ModelDescriptor, ModelManifest,
    ModelStore, ProgressHandler, Transport,
};
use edgellm::{RuntimeFetcher, RuntimeStatus};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "edgellm")]
#[command(about = "Fetch, verify and install on-device LLM assets", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List built-in models and where they are available locally
    Models,
    /// Resolve a model identifier to a ready directory, downloading if needed
    Resolve {
        /// Model identifier, e.g. Qwen2-0.5B-Instruct-q0f16-MLC
        id: String,
    },
    /// Install a model from a manifest into the content-addressed store
    Install {
        /// Path to manifest JSON
        manifest: PathBuf,
        /// Prefer the manifest's premium URL
        #[arg(long)]
        premium: bool,
    },
    /// List installed models
    Installed,
    /// Remove an installed model by checksum
    Remove {
        sha256: String,
    },
    /// Install the native runtime bundle
    Runtime,
    /// Print the payload digest of a directory
    Digest {
        dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load().context("Failed to load configuration")?;

    match cli.command {
        Commands::Models => list_models(&config),
        Commands::Resolve { id } => resolve(&config, &id).await,
        Commands::Install { manifest, premium } => install(&config, &manifest, premium).await,
        Commands::Installed => list_installed(&config),
        Commands::Remove { sha256 } => {
            store(&config)?.remove(&sha256)?;
            println!("Removed {sha256}");
            Ok(())
        }
        Commands::Runtime => install_runtime(&config).await,
        Commands::Digest { dir } => {
            println!("{}", checksum::sha256_dir(&dir)?);
            Ok(())
        }
    }
}

fn transport(config: &Config) -> Result<Arc<dyn Transport>> {
    let transport = HttpTransport::new(Duration::from_secs(config.download.timeout_secs))?;
    Ok(Arc::new(transport))
}

fn store(config: &Config) -> Result<Arc<ModelStore>> {
    let store = ModelStore::new(&config.storage, config.download.clone(), transport(config)?)?;
    Ok(Arc::new(store))
}

fn progress_bar() -> Result<(ProgressBar, ProgressHandler)> {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] {bar:30} {bytes}/{total_bytes} {msg}")?,
    );
    pb.enable_steady_tick(Duration::from_millis(120));

    let handle = pb.clone();
    let handler: ProgressHandler = Arc::new(move |p: &DownloadProgress| {
        handle.set_message(p.file_name.clone());
        handle.set_length(p.total_bytes);
        handle.set_position(p.bytes_written);
    });

    Ok((pb, handler))
}

fn list_models(config: &Config) -> Result<()> {
    let locator = AssetLocator::new(&config.storage, store(config)?);

    for model in edgellm::models::registry::MODELS {
        let location = match locator.locate(model) {
            Some((path, origin)) => format!("{origin:?} {}", path.display()),
            None => "not downloaded".to_string(),
        };
        println!("{:<40} {:<14} {location}", model.id, model.display_name);
    }

    Ok(())
}

async fn resolve(config: &Config, id: &str) -> Result<()> {
    let Some(model) = ModelDescriptor::find(id) else {
        if let Some(suggestion) = ModelDescriptor::suggest(id) {
            eprintln!("Did you mean '{suggestion}'?");
        }
        anyhow::bail!("Unknown model '{id}'. Run `edgellm models` to list available models");
    };

    let locator = AssetLocator::new(&config.storage, store(config)?);
    let (pb, handler) = progress_bar()?;
    let result = locator.resolve(model, Some(handler)).await;
    pb.finish_and_clear();

    let (path, origin) = result?;
    println!("{} ({origin:?})", path.display());
    Ok(())
}

async fn install(config: &Config, manifest_path: &std::path::Path, premium: bool) -> Result<()> {
    let manifest = ModelManifest::load(manifest_path)
        .with_context(|| format!("Failed to read manifest {}", manifest_path.display()))?;

    let mut download = config.download.clone();
    download.premium |= premium;

    let store = ModelStore::new(&config.storage, download, transport(config)?)?;
    let (pb, handler) = progress_bar()?;
    let result = store.ensure_ready(&manifest, Some(handler)).await;
    pb.finish_and_clear();

    let path = result?;
    println!("Installed {} {} at {}", manifest.model_id, manifest.version, path.display());
    Ok(())
}

fn list_installed(config: &Config) -> Result<()> {
    let records = store(config)?.list_installed()?;
    if records.is_empty() {
        println!("No models installed in {}", config.storage.root.display());
        return Ok(());
    }

    for record in records {
        println!(
            "{:<40} {:<10} {:>10}  {}",
            record.model_id,
            record.version,
            format_bytes(record.size_bytes),
            record.sha256
        );
    }

    Ok(())
}

async fn install_runtime(config: &Config) -> Result<()> {
    let fetcher = RuntimeFetcher::new(config.runtime.clone(), transport(config)?);
    let mut status = fetcher.subscribe();

    let pb = ProgressBar::new(100);
    pb.set_style(ProgressStyle::default_bar().template("{spinner:.green} {bar:30} {pos}% {msg}")?);
    let watcher = {
        let pb = pb.clone();
        tokio::spawn(async move {
            while status.changed().await.is_ok() {
                let current = status.borrow_and_update().clone();
                if let RuntimeStatus::Downloading(fraction) = current {
                    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                    pb.set_position((fraction * 100.0) as u64);
                    pb.set_message("downloading runtime");
                }
            }
        })
    };

    let result = fetcher.ensure_installed().await;
    watcher.abort();
    pb.finish_and_clear();
    result?;

    let size = fetcher.installed_size_bytes().unwrap_or(0);
    println!(
        "Runtime installed at {} ({})",
        fetcher.install_dir().display(),
        format_bytes(size)
    );
    Ok(())
}

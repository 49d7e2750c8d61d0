use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use feature_pipeline::config::PipelineConfig;
use feature_pipeline::controller::controller::Controller;
use feature_pipeline::controller::pool::PoolHandle;
use feature_pipeline::controller::types::JobOutcome;
use feature_pipeline::jobs::extraction::FeatureExtractionJob;
use feature_pipeline::jobs::neighbors::NeighborSearchJob;
use feature_pipeline::queue::client::QueueClient;
use feature_pipeline::queue::server::QueueServer;
use feature_pipeline::queue::types::QueueAddress;
use feature_pipeline::storage::journal::JournalStore;
use feature_pipeline::storage::store::FeatureStore;
use feature_pipeline::worker::codebook::Codebook;
use feature_pipeline::worker::extract::ColorDescriptorExtractor;
use feature_pipeline::worker::runtime::Worker;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "feature-pipeline")]
#[command(about = "Distributed image feature extraction and codebook neighbor search")]
#[command(version)]
struct Cli {
    /// Pipeline configuration file (TOML)
    #[arg(short, long, global = true, env = "PIPELINE_CONFIG")]
    config: Option<PathBuf>,

    /// Queue secret (overrides the config file)
    #[arg(long, global = true, env = "PIPELINE_SECRET", hide_env_values = true)]
    secret: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the queue service alone until Ctrl+C, for workers started elsewhere
    Serve,

    /// Attach one worker to the queue service named in the address file
    Worker {
        /// Worker index, used to name its scratch directory
        #[arg(long)]
        index: usize,
    },

    /// Register every file under the image root that the store does not know yet
    Import {
        /// Class label given to the imported images
        #[arg(long)]
        class: Option<u8>,
    },

    /// Extract features for every image that has none
    Extract,

    /// Compute codebook neighbors for every region that has none
    Neighbors,

    /// Extract features, then compute neighbors on the same pool
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "feature_pipeline=debug"
    } else {
        "feature_pipeline=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    let mut config = PipelineConfig::load(cli.config.as_deref())?;
    if let Some(secret) = &cli.secret {
        config.queue.secret = secret.clone();
    }

    let launcher = WorkerLauncher {
        exe: std::env::current_exe().context("locating the pipeline executable")?,
        config: cli.config.clone(),
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::Serve => serve(&config).await,
        Commands::Worker { index } => run_worker(&config, index).await,
        Commands::Import { class } => import(&config, class),
        Commands::Extract => extract(&config, &launcher).await,
        Commands::Neighbors => neighbors(&config, &launcher).await,
        Commands::Run => run_all(&config, &launcher).await,
    }
}

/// Builds the command line of worker processes: this executable, same config.
struct WorkerLauncher {
    exe: PathBuf,
    config: Option<PathBuf>,
    verbose: bool,
}

impl WorkerLauncher {
    fn command(&self, index: usize) -> Command {
        let mut command = Command::new(&self.exe);
        if let Some(config) = &self.config {
            command.arg("--config").arg(config);
        }
        if self.verbose {
            command.arg("--verbose");
        }
        command.arg("worker").arg("--index").arg(index.to_string());
        command
    }
}

fn open_store(config: &PipelineConfig) -> Result<Arc<JournalStore>> {
    let store = JournalStore::open(&config.store.path)
        .with_context(|| format!("opening store {}", config.store.path.display()))?;
    tracing::info!(
        "Store {}: {} images, {} regions",
        config.store.path.display(),
        store.image_count(),
        store.region_count()
    );
    Ok(Arc::new(store))
}

fn report(outcome: &JobOutcome) {
    let summary = outcome.summary();
    match outcome {
        JobOutcome::NothingToDo(_) => {
            tracing::info!("{}: nothing to do", summary.job);
        }
        JobOutcome::Completed(_) => {
            tracing::info!(
                "{}: {} tasks, {} failed, {} checkpoints, {:.1?}",
                summary.job,
                summary.tasks,
                summary.failures,
                summary.checkpoints,
                summary.elapsed
            );
        }
    }
}

async fn serve(config: &PipelineConfig) -> Result<()> {
    let queue = &config.queue;
    let server = QueueServer::new(queue.capacity, queue.secret.clone())
        .bind(
            &queue.host,
            queue.port,
            queue.advertise_host.as_deref(),
            &queue.secret,
        )
        .await?;
    server.address().write_to(&queue.address_file)?;
    server.serve_until_interrupted().await
}

async fn run_worker(config: &PipelineConfig, index: usize) -> Result<()> {
    let address = QueueAddress::read_from(&config.queue.address_file)?;
    let client = QueueClient::connect(&address, config.pool.connect_attempts)
        .await
        .with_context(|| format!("worker {} connecting to {}", index, address.base_url()))?;

    let codebook_path = &config.neighbors.codebook;
    let codebook = if codebook_path.exists() {
        Some(Arc::new(Codebook::load(codebook_path)?))
    } else {
        tracing::debug!(
            "Worker {}: no codebook at {}, neighbor tasks will fail",
            index,
            codebook_path.display()
        );
        None
    };

    let mut extractor =
        ColorDescriptorExtractor::new(&config.extract.binary, config.extract.max_regions);
    extractor.detector = config.extract.detector.clone();
    extractor.descriptor = config.extract.descriptor.clone();

    let worker = Worker::new(
        index,
        client,
        extractor,
        codebook,
        config.neighbors.count,
        &config.pool.scratch_dir,
    );
    worker.run().await?;
    Ok(())
}

fn import(config: &PipelineConfig, class: Option<u8>) -> Result<()> {
    let store = open_store(config)?;
    let root = &config.extract.image_root;

    let mut files = Vec::new();
    collect_files(root, Path::new(""), &mut files)
        .with_context(|| format!("scanning {}", root.display()))?;
    files.sort();

    let known = store.known_files();
    let mut added = 0usize;
    for file in files.iter().filter(|file| !known.contains(*file)) {
        store.add_image(file, class)?;
        added += 1;
    }
    store.flush()?;

    tracing::info!(
        "Imported {} new images ({} already known)",
        added,
        files.len() - added
    );
    Ok(())
}

/// Collects files below `root`, as paths relative to it.
fn collect_files(root: &Path, relative: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(root.join(relative))? {
        let entry = entry?;
        let path = relative.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            collect_files(root, &path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

async fn extract(config: &PipelineConfig, launcher: &WorkerLauncher) -> Result<()> {
    let store = open_store(config)?;
    if store.images_without_features()?.is_empty() {
        tracing::info!("feature-extraction: nothing to do");
        return Ok(());
    }

    let mut job = FeatureExtractionJob::new(store, &config.extract.image_root);
    let workers = config.pool.workers;
    let mut pool = PoolHandle::start(&config.queue).await?;
    if let Err(e) = pool.grow_processes(workers, |index| launcher.command(index)) {
        pool.abort().await?;
        return Err(e);
    }

    let controller = Controller::new(
        QueueClient::new(pool.address()),
        config.pool.controller(workers, true),
    );
    match controller.run(&mut job).await {
        Ok(outcome) => report(&outcome),
        Err(e) => {
            pool.abort().await?;
            return Err(e.into());
        }
    }
    pool.finalize().await?;
    Ok(())
}

async fn neighbors(config: &PipelineConfig, launcher: &WorkerLauncher) -> Result<()> {
    let store = open_store(config)?;
    let mut job = NeighborSearchJob::new(store, config.neighbors.batch_size);
    if job.pending()? == 0 {
        tracing::info!("neighbor-search: nothing to do");
        return Ok(());
    }

    let workers = config.pool.workers;
    let mut pool = PoolHandle::start(&config.queue).await?;
    if let Err(e) = pool.grow_processes(workers, |index| launcher.command(index)) {
        pool.abort().await?;
        return Err(e);
    }

    let controller = Controller::new(
        QueueClient::new(pool.address()),
        config.pool.controller(workers, true),
    );
    match controller.run(&mut job).await {
        Ok(outcome) => report(&outcome),
        Err(e) => {
            pool.abort().await?;
            return Err(e.into());
        }
    }
    pool.finalize().await?;
    Ok(())
}

/// Extraction on part of the pool, then neighbor search on all of it.
async fn run_all(config: &PipelineConfig, launcher: &WorkerLauncher) -> Result<()> {
    let store = open_store(config)?;
    let workers = config.pool.workers;
    let extract_workers = config.pool.extract_workers();

    let mut pool = PoolHandle::start(&config.queue).await?;
    match run_jobs(config, launcher, store, &mut pool, extract_workers, workers).await {
        Ok(()) => {
            pool.finalize().await?;
            Ok(())
        }
        Err(e) => {
            pool.abort().await?;
            Err(e)
        }
    }
}

async fn run_jobs(
    config: &PipelineConfig,
    launcher: &WorkerLauncher,
    store: Arc<JournalStore>,
    pool: &mut PoolHandle,
    extract_workers: usize,
    workers: usize,
) -> Result<()> {
    let client = QueueClient::new(pool.address());

    pool.grow_processes(extract_workers, |index| launcher.command(index))?;
    let extraction = Controller::new(
        client.clone(),
        config.pool.controller(extract_workers, false),
    );
    let mut extract_job = FeatureExtractionJob::new(store.clone(), &config.extract.image_root);
    report(&extraction.run(&mut extract_job).await?);

    pool.grow_processes(workers - extract_workers, |index| launcher.command(index))?;
    let search = Controller::new(client, config.pool.controller(pool.size(), true));
    let mut neighbor_job = NeighborSearchJob::new(store, config.neighbors.batch_size);
    if neighbor_job.pending()? == 0 {
        tracing::info!("neighbor-search: nothing to do");
        search.release_workers().await?;
    } else {
        report(&search.run(&mut neighbor_job).await?);
    }
    Ok(())
}

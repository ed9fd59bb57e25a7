use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use autoscribe::cli::{Cli, Commands, OutputFormat};
use autoscribe::config::{BackendConfig, Config};
use autoscribe::pipeline::{JobQueue, TranscriptionPipeline, TranscriptionRequest, Worker, WorkerSummary};
use autoscribe::store::{JsonFileVideoStore, VideoStore};
use autoscribe::transcribe::{Credentials, ProviderRegistry, ProviderResolver};
use autoscribe::{output, utils};

const QUEUE_CAPACITY: usize = 64;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "autoscribe=debug"
    } else {
        "autoscribe=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::load(cli.config.as_deref()).await?;

    match cli.command {
        Commands::Transcribe {
            videos,
            provider,
            language,
            api_key,
        } => {
            let video_ids = parse_video_ids(&videos)?;
            warn_missing_dependencies(&config).await;

            let request = TranscriptionRequest {
                provider,
                credentials: credentials(&config, api_key),
                language,
            };

            let (queue, worker) = start_worker(&config).await?;
            queue.bulk_start_transcription(&video_ids, request).await?;
            let summary = wait_for_worker(
                queue,
                worker,
                cli.quiet,
                format!("Transcribing {} video(s)...", video_ids.len()),
            )
            .await?;

            print_records(&config, &video_ids).await?;
            finish(&summary)?;
        }
        Commands::ExtractAudio { video } => {
            let video_id = parse_video_id(&video)?;
            warn_missing_dependencies(&config).await;

            let (queue, worker) = start_worker(&config).await?;
            queue.extract_audio_only(&video_id).await?;
            let summary =
                wait_for_worker(queue, worker, cli.quiet, "Extracting audio...".to_string()).await?;

            print_records(&config, std::slice::from_ref(&video_id)).await?;
            finish(&summary)?;
        }
        Commands::Ingest {
            video,
            title,
            api_key,
        } => {
            let video_id = parse_video_id(&video)?;

            let (queue, worker) = start_worker(&config).await?;
            queue
                .on_video_ingested(&video_id, title, credentials(&config, api_key))
                .await?;
            let summary =
                wait_for_worker(queue, worker, cli.quiet, "Processing new video...".to_string())
                    .await?;

            print_records(&config, std::slice::from_ref(&video_id)).await?;
            finish(&summary)?;
        }
        Commands::Status { video, format } => {
            let video_id = parse_video_id(&video)?;
            let store = JsonFileVideoStore::new(config.storage.videos_path.clone());

            let record = store
                .get_video(&video_id)
                .await?
                .with_context(|| format!("No record for video {}", video_id))?;
            output::print_video(&record, &format)?;
        }
        Commands::Reconcile { older_than_minutes } => {
            let window = older_than_minutes
                .map(|minutes| Duration::from_secs(minutes * 60))
                .unwrap_or_else(|| config.transcription.poll.window());

            let pipeline = TranscriptionPipeline::from_config(&config);
            let reset = pipeline.reconcile_stale(window).await?;

            if reset.is_empty() {
                println!("No stale records found");
            } else {
                println!("Reset {} stale record(s):", reset.len());
                for video_id in reset {
                    println!("  • {}", video_id);
                }
            }
        }
        Commands::Config { show } => {
            if show {
                config.display();
            } else {
                let path = match cli.config {
                    Some(path) => path,
                    None => Config::config_path()?,
                };
                config.save_to(&path).await?;
                println!("Configuration written to: {}", path.display());
            }
        }
        Commands::Providers => {
            let registry = ProviderRegistry::new(config.clone());

            println!("Transcription providers:");
            for name in registry.available() {
                println!("  • {}", name);
            }
            println!("Audio backends (in priority order):");
            for backend in &config.extraction.backends {
                println!("  • {}", backend.name());
            }
        }
    }

    Ok(())
}

fn parse_video_id(input: &str) -> Result<String> {
    utils::extract_video_id(input)
        .with_context(|| format!("Not a YouTube video id or URL: {}", input))
}

fn parse_video_ids(inputs: &[String]) -> Result<Vec<String>> {
    let mut ids: Vec<String> = Vec::with_capacity(inputs.len());
    for input in inputs {
        let id = parse_video_id(input)?;
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    Ok(ids)
}

fn credentials(config: &Config, api_key: Option<String>) -> Credentials {
    Credentials::resolve(api_key, &config.transcription.api_key_env)
}

async fn warn_missing_dependencies(config: &Config) {
    let binary = config.extraction.backends.iter().find_map(|backend| match backend {
        BackendConfig::YtDlp { binary, .. } => Some(binary.as_str()),
        _ => None,
    });

    let missing = utils::check_dependencies(binary).await;
    if !missing.is_empty() {
        eprintln!("⚠️  Dependency check warnings:");
        for dep in missing {
            eprintln!("   • {}", dep);
        }
        eprintln!("   (Continuing anyway - other backends may still work)");
    }
}

/// Build the pipeline, recover interrupted records and spawn the worker
async fn start_worker(config: &Config) -> Result<(JobQueue, JoinHandle<WorkerSummary>)> {
    let pipeline = Arc::new(TranscriptionPipeline::from_config(config));

    let reset = pipeline
        .reconcile_stale(config.transcription.poll.window())
        .await?;
    if !reset.is_empty() {
        tracing::warn!(count = reset.len(), "Reset records interrupted by an earlier run");
    }

    let (queue, receiver) = JobQueue::channel(QUEUE_CAPACITY);
    let worker = tokio::spawn(Worker::new(receiver, pipeline).run());
    Ok((queue, worker))
}

async fn wait_for_worker(
    queue: JobQueue,
    worker: JoinHandle<WorkerSummary>,
    quiet: bool,
    message: String,
) -> Result<WorkerSummary> {
    // The worker stops once the last queue handle is gone
    drop(queue);

    let progress = if quiet {
        ProgressBar::hidden()
    } else {
        let progress = ProgressBar::new_spinner();
        progress.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .context("Invalid progress template")?,
        );
        progress
    };
    progress.set_message(message);
    progress.enable_steady_tick(Duration::from_millis(120));

    let summary = worker.await.context("Worker task failed")?;
    progress.finish_and_clear();
    Ok(summary)
}

async fn print_records(config: &Config, video_ids: &[String]) -> Result<()> {
    let store = JsonFileVideoStore::new(config.storage.videos_path.clone());

    for video_id in video_ids {
        if let Some(record) = store.get_video(video_id).await? {
            output::print_video(&record, &OutputFormat::Text)?;
            println!();
        }
    }
    Ok(())
}

fn finish(summary: &WorkerSummary) -> Result<()> {
    println!("Done: {}", output::format_summary(summary));
    if summary.failed > 0 || summary.crashed > 0 {
        anyhow::bail!("{} job(s) did not complete", summary.failed + summary.crashed);
    }
    Ok(())
}

//! Skatehive ingestion CLI.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use skatehive_media::{detect, open_source, Classifier, FrameRelayEngine};
use skatehive_models::{EnvironmentSnapshot, ProgressReporter};
use skatehive_pipeline::{
    host_snapshot, IngestRequest, PipelineConfig, ResourceManager, VideoPipeline,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "skatehive-ingest", version, about = "Prepare and upload skate videos")]
struct Cli {
    /// Print Prometheus metrics to stderr on exit
    #[arg(long, global = true, env = "SKATEHIVE_PRINT_METRICS")]
    print_metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate, transcode if needed, and upload a video
    Ingest {
        file: PathBuf,
        /// Reputation score of the uploader
        #[arg(long, default_value_t = 0.0)]
        hp: f64,
        /// Account name stored with the upload
        #[arg(long, env = "SKATEHIVE_CREATOR")]
        creator: Option<String>,
        #[command(flatten)]
        device: DeviceArgs,
    },
    /// Show the processing decision for a video without uploading
    Classify {
        file: PathBuf,
        #[command(flatten)]
        device: DeviceArgs,
    },
    /// Extract and upload a thumbnail
    Thumbnail {
        file: PathBuf,
        #[arg(long, env = "SKATEHIVE_CREATOR")]
        creator: Option<String>,
    },
    /// Check that the engines and work directory are usable
    Selfcheck,
}

/// Describe the uploading device; defaults to this machine.
#[derive(Debug, clap::Args)]
struct DeviceArgs {
    /// Browser user agent of the uploading device
    #[arg(long)]
    user_agent: Option<String>,
    /// Reported device memory in GB
    #[arg(long)]
    device_memory: Option<f32>,
    /// Reported touch points
    #[arg(long, default_value_t = 0)]
    touch_points: u32,
    /// Platform identifier (e.g. "MacIntel")
    #[arg(long)]
    platform: Option<String>,
}

impl DeviceArgs {
    /// Snapshot of the described device; without a user agent, of this
    /// host using the configured FFmpeg binary.
    fn snapshot(&self, ffmpeg: Option<&Path>) -> EnvironmentSnapshot {
        let Some(ua) = &self.user_agent else {
            return host_snapshot(ffmpeg);
        };
        let mut snapshot = EnvironmentSnapshot::from_user_agent(ua.clone())
            .with_touch_points(self.touch_points);
        if let Some(gb) = self.device_memory {
            snapshot = snapshot.with_device_memory(gb);
        }
        if let Some(platform) = &self.platform {
            snapshot = snapshot.with_platform(platform.clone());
        }
        snapshot
    }
}

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let metrics = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| warn!("Metrics recorder unavailable: {}", e))
        .ok();

    let code = match run(cli.command).await {
        Ok(()) => 0,
        Err(e) => {
            error!("{:#}", e);
            1
        }
    };

    if cli.print_metrics {
        print_metrics(metrics.as_ref());
    }
    std::process::exit(code);
}

fn init_tracing() {
    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("skatehive_media=info,skatehive_storage=info,skatehive_pipeline=info,skatehive_ingest=info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .with(env_filter)
            .init();
    }
}

fn print_metrics(handle: Option<&PrometheusHandle>) {
    if let Some(handle) = handle {
        eprintln!("{}", handle.render());
    }
}

async fn run(command: Command) -> anyhow::Result<()> {
    let config = PipelineConfig::from_env().context("loading configuration")?;

    match command {
        Command::Ingest {
            file,
            hp,
            creator,
            device,
        } => {
            let snapshot = device.snapshot(config.ffmpeg_path.as_deref());
            let resources = Arc::new(ResourceManager::from_config(&config)?);
            let pipeline = VideoPipeline::new(Arc::clone(&resources), config);

            let mut request = IngestRequest::new(hp, snapshot);
            if let Some(creator) = creator {
                request = request.with_creator(creator);
            }

            let progress = ProgressReporter::new(|event| {
                info!(stage = %event.stage, percent = event.percent, "Progress");
            });
            let cancel = shutdown_token();

            let result = pipeline
                .process_path(&file, &request, &progress, &cancel)
                .await;
            resources.shutdown().await;

            match result {
                Ok(outcome) => {
                    println!("{}", serde_json::to_string_pretty(&outcome)?);
                    Ok(())
                }
                Err(e) => Err(anyhow::anyhow!(e.user_message()).context(e.to_string())),
            }
        }
        Command::Classify { file, device } => {
            let source = open_source(&file).await?;
            let profile = detect(&device.snapshot(config.ffmpeg_path.as_deref()));
            let decision = Classifier::new(config.classifier)
                .classify_file(&source, &profile)
                .await;
            let out = serde_json::json!({
                "file": source.name,
                "size": source.size,
                "device": profile,
                "decision": decision,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
            Ok(())
        }
        Command::Thumbnail { file, creator } => {
            let resources = Arc::new(ResourceManager::from_config(&config)?);
            let pipeline = VideoPipeline::new(Arc::clone(&resources), config);
            let source = open_source(&file).await?;

            let url = pipeline
                .extract_thumbnail(&source, creator, &shutdown_token())
                .await;
            resources.shutdown().await;

            let url = url.context("no thumbnail could be produced")?;
            println!("{}", url);
            Ok(())
        }
        Command::Selfcheck => selfcheck(&config).await,
    }
}

/// Token cancelled on Ctrl-C.
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal, cancelling");
            child.cancel();
        }
    });
    token
}

async fn selfcheck(config: &PipelineConfig) -> anyhow::Result<()> {
    if let Some(dir) = &config.work_dir {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("creating work dir {}", dir.display()))?;
    }

    let resources = ResourceManager::from_config(config)?;
    let cancel = CancellationToken::new();

    let engine = resources
        .engine()
        .get(&cancel)
        .await
        .context("primary engine unavailable")?;
    println!(
        "primary engine: {} ({})",
        engine.name(),
        resources.engine().state()
    );

    let ffmpeg = config
        .ffmpeg_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("ffmpeg"));
    match FrameRelayEngine::new(&ffmpeg).negotiate().await {
        Ok(format) => println!("fallback recorder: {} via {}", format.mime_type, format.encoder),
        Err(e) => println!("fallback recorder: unavailable ({})", e),
    }

    let ffprobe = match &config.ffprobe_path {
        Some(path) => which::which(path).map_err(|_| skatehive_media::MediaError::FfprobeNotFound),
        None => skatehive_media::check_ffprobe(),
    };
    match ffprobe {
        Ok(path) => println!("ffprobe: {}", path.display()),
        Err(e) => println!("ffprobe: unavailable ({}), metadata will be unknown", e),
    }

    let snapshot = host_snapshot(config.ffmpeg_path.as_deref());
    let profile = detect(&snapshot);
    println!(
        "host: {} memory={:?} engine_supported={}",
        profile.platform, profile.memory, profile.wasm_transcode_supported
    );

    resources.shutdown().await;
    println!("skatehive-ingest selfcheck: ok");
    Ok(())
}

mod artifacts;
mod cli;
mod error;
mod pipeline;
mod video;
mod web;

use anyhow::{Context, Result};
use cli::Args;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use artifacts::ArtifactStore;
use pipeline::annotate::Annotator;
use pipeline::detection::{FrameDetector, RtDetrDetector};
use pipeline::orchestrator::MediaPipeline;
use pipeline::transcode::{DisabledTranscoder, FfmpegTranscoder, Transcoder};
use video::OpencvBackend;
use web::api::AppState;
use web::server::run_server;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse_args();

    let store = ArtifactStore::open(&args.upload_dir, args.image_naming, args.retain_images)
        .with_context(|| format!("Failed to prepare upload dir {:?}", args.upload_dir))?;

    let detector = RtDetrDetector::load(&args.model_path).context("Detector startup failed")?;

    let annotator = match &args.label_font {
        Some(path) => Annotator::with_font_file(path)?,
        None => {
            tracing::info!("No label font configured, drawing boxes without labels");
            Annotator::default()
        }
    };

    let transcoder: Arc<dyn Transcoder> = if args.no_transcode {
        tracing::info!("Transcoding disabled, serving intermediate videos");
        Arc::new(DisabledTranscoder)
    } else {
        Arc::new(FfmpegTranscoder::new(&args.ffmpeg))
    };

    let config = args.pipeline_config();
    let pipeline = MediaPipeline::new(
        FrameDetector::new(Arc::new(detector), Arc::new(annotator), config.min_confidence),
        Arc::new(OpencvBackend::new(args.fourcc)),
        transcoder,
        Arc::new(store),
        config,
    );

    let state = AppState {
        pipeline: Arc::new(pipeline),
    };
    run_server(args.host, args.port, state, args.max_upload_bytes()).await?;

    Ok(())
}

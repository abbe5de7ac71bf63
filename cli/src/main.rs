mod sampler;
mod sink;

use bytes::Bytes;
use frame_distill_common::config::Config;
use frame_distill_common::frame::{FrameWarning, RetainedFrame};
use frame_distill_pipeline::{CancelSignal, Pipeline, PipelineConfig};
use sampler::FfmpegSampler;
use sink::DiskSink;
use std::path::PathBuf;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let mut args = std::env::args().skip(1);
    let Some(video_path) = args.next().map(PathBuf::from) else {
        eprintln!("usage: frame-distill <video> [config.toml]");
        std::process::exit(2);
    };

    let config = match args.next().map(PathBuf::from) {
        Some(config_path) => match Config::load(&config_path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Failed to load config from {}: {e}", config_path.display());
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        video = video_path.display().to_string(),
        stride = config.sampler.stride,
        width = config.sampler.width,
        height = config.sampler.height,
        diff_threshold = config.filter.diff_threshold,
        concurrency = config.pipeline.concurrency,
        "starting frame-distill"
    );

    sampler::check_ffmpeg_available(&config.sampler.ffmpeg_path).await;

    let video = match tokio::fs::read(&video_path).await {
        Ok(v) => Bytes::from(v),
        Err(e) => {
            error!(path = video_path.display().to_string(), error = %e, "failed to read video");
            std::process::exit(1);
        }
    };

    let frames = match FfmpegSampler::new(config.sampler.clone()).sample(video).await {
        Ok(f) => f,
        Err(e) => {
            error!(error = %e, "frame sampling failed");
            std::process::exit(1);
        }
    };

    let pipeline = match Pipeline::new(PipelineConfig::from_config(&config)) {
        Ok(p) => p,
        Err(e) => {
            error!(error = %e, "invalid pipeline configuration");
            std::process::exit(1);
        }
    };

    let cancel = CancelSignal::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing current frame");
            interrupt.cancel();
        }
    });

    let mut exit_code = 0;
    let (retained, warnings) = match pipeline.run(frames, &cancel).await {
        Ok(outcome) => {
            info!(
                retained = outcome.stats.retained,
                discarded = outcome.stats.discarded,
                skipped = outcome.warnings.len(),
                cancelled = outcome.cancelled,
                "unique frames selected"
            );
            (outcome.retained, outcome.warnings)
        }
        Err(e) => {
            error!(error = %e, "pipeline failed");
            let Some(partial) = e.into_partial() else {
                std::process::exit(1);
            };
            warn!(
                kept = partial.retained.len(),
                skipped = partial.warnings.len(),
                "keeping frames selected before the failure"
            );
            exit_code = 1;
            (partial.retained, partial.warnings)
        }
    };

    if config.output.save && !persist(&config, &retained, &warnings).await {
        exit_code = 1;
    }

    std::process::exit(exit_code);
}

/// Write retained frames to the configured directory. Returns `false` if
/// anything failed to persist.
async fn persist(config: &Config, retained: &[RetainedFrame], warnings: &[FrameWarning]) -> bool {
    let sink = DiskSink::new(config.output.dir.clone(), config.output.format);
    match sink.persist(retained, warnings).await {
        Ok(report) if report.failures.is_empty() => true,
        Ok(report) => {
            for failure in &report.failures {
                error!(
                    position = failure.position,
                    index = failure.index,
                    error = %failure.error,
                    "retained frame not saved"
                );
            }
            false
        }
        Err(e) => {
            error!(dir = config.output.dir.display().to_string(), error = %e, "failed to persist retained frames");
            false
        }
    }
}

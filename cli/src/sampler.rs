use bytes::Bytes;
use frame_distill_common::config::SamplerConfig;
use frame_distill_common::frame::SampledFrame;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

static STAGING_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, thiserror::Error)]
pub enum SamplerError {
    #[error("video input is empty")]
    EmptyInput,
    #[error("failed to spawn ffmpeg: {0}")]
    Spawn(String),
    #[error("failed to stream video to ffmpeg stdin: {0}")]
    Write(String),
    #[error("failed to wait for ffmpeg: {0}")]
    Wait(String),
    #[error("ffmpeg exited with non-zero status: {0}")]
    FfmpegFailed(String),
    #[error("staging directory {0}: {1}")]
    Staging(String, std::io::Error),
    #[error("ffmpeg produced no frames")]
    NoFrames,
    #[error("frame {0} exceeds the addressable index range")]
    IndexOverflow(usize),
}

/// Turns a video byte stream into strided, resized still frames using an
/// ffmpeg subprocess.
///
/// Frames are staged as PNG files in a private temporary directory which is
/// removed before `sample` returns. Each frame's index is its source frame
/// number, so indices step by `stride`.
pub struct FfmpegSampler {
    config: SamplerConfig,
}

impl FfmpegSampler {
    pub fn new(config: SamplerConfig) -> Self {
        Self { config }
    }

    /// ffmpeg filtergraph: keep every `stride`-th source frame, then resize
    /// only the frames that survived selection.
    pub fn filter_graph(&self) -> String {
        format!(
            "select='not(mod(n\\,{stride}))',scale={w}:{h}",
            w = self.config.width,
            h = self.config.height,
            stride = self.config.stride,
        )
    }

    pub async fn sample(&self, video: Bytes) -> Result<Vec<SampledFrame>, SamplerError> {
        if video.is_empty() {
            return Err(SamplerError::EmptyInput);
        }

        let staging = staging_dir();
        tokio::fs::create_dir_all(&staging)
            .await
            .map_err(|e| SamplerError::Staging(staging.display().to_string(), e))?;

        let result = match self.extract_into(video, &staging).await {
            Ok(()) => read_staged_frames(&staging, self.config.stride).await,
            Err(e) => Err(e),
        };

        if let Err(e) = tokio::fs::remove_dir_all(&staging).await {
            warn!(path = staging.display().to_string(), error = %e, "failed to delete staging directory");
        }

        let frames = result?;
        info!(
            frames = frames.len(),
            stride = self.config.stride,
            width = self.config.width,
            height = self.config.height,
            "video sampled"
        );
        Ok(frames)
    }

    async fn extract_into(&self, video: Bytes, dir: &Path) -> Result<(), SamplerError> {
        let graph = self.filter_graph();
        let pattern = dir.join("frame-%06d.png");

        let mut cmd = Command::new(&self.config.ffmpeg_path);
        cmd.args([
            "-hide_banner",
            "-loglevel", "error",
            "-i", "pipe:0",
            "-vf", graph.as_str(),
            "-vsync", "vfr",
            "-y",
        ])
        .arg(&pattern)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| SamplerError::Spawn(e.to_string()))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| SamplerError::Spawn("could not get stdin handle".into()))?;

        debug!(
            ffmpeg = self.config.ffmpeg_path,
            filter = graph,
            bytes = video.len(),
            "ffmpeg sampler started"
        );

        // Feed stdin from its own task so ffmpeg's stderr is drained concurrently.
        let writer = tokio::spawn(async move {
            let written = stdin.write_all(&video).await;
            drop(stdin);
            written
        });

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| SamplerError::Wait(e.to_string()))?;
        let written = writer
            .await
            .map_err(|e| SamplerError::Write(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!(stderr = %stderr, "ffmpeg exited with error");
            return Err(SamplerError::FfmpegFailed(stderr.into_owned()));
        }

        // ffmpeg may stop reading once it has what it needs.
        if let Err(e) = written {
            debug!(error = %e, "ffmpeg closed stdin before the whole video was written");
        }
        Ok(())
    }
}

fn staging_dir() -> PathBuf {
    let seq = STAGING_COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("frame-distill-{}-{seq}", std::process::id()))
}

/// Load staged PNGs in file-name order. The n-th file is source frame `n * stride`.
async fn read_staged_frames(dir: &Path, stride: u32) -> Result<Vec<SampledFrame>, SamplerError> {
    let staging_err = |e| SamplerError::Staging(dir.display().to_string(), e);

    let mut entries = tokio::fs::read_dir(dir).await.map_err(staging_err)?;
    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(staging_err)? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "png") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut frames = Vec::with_capacity(paths.len());
    for (position, path) in paths.iter().enumerate() {
        let index = u32::try_from(position)
            .ok()
            .and_then(|p| p.checked_mul(stride))
            .ok_or(SamplerError::IndexOverflow(position))?;
        let data = tokio::fs::read(path).await.map_err(staging_err)?;
        frames.push(SampledFrame::new(index, data));
    }

    if frames.is_empty() {
        return Err(SamplerError::NoFrames);
    }
    Ok(frames)
}

/// Check whether ffmpeg is available. Logs a warning if not found.
pub async fn check_ffmpeg_available(ffmpeg_path: &str) {
    match Command::new(ffmpeg_path).arg("-version").output().await {
        Ok(out) if out.status.success() => {
            debug!(ffmpeg = ffmpeg_path, "ffmpeg is available");
        }
        Ok(_) => {
            warn!(ffmpeg = ffmpeg_path, "ffmpeg returned non-zero for -version; sampling may fail");
        }
        Err(e) => {
            warn!(
                ffmpeg = ffmpeg_path,
                error = %e,
                "ffmpeg not found; frame sampling will fail. Install ffmpeg or set sampler.ffmpeg_path."
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sampler(ffmpeg_path: &str) -> FfmpegSampler {
        FfmpegSampler::new(SamplerConfig {
            ffmpeg_path: ffmpeg_path.into(),
            ..Default::default()
        })
    }

    #[test]
    fn filter_graph_selects_before_scaling() {
        assert_eq!(
            sampler("ffmpeg").filter_graph(),
            "select='not(mod(n\\,10))',scale=640:360"
        );
        let custom = FfmpegSampler::new(SamplerConfig {
            stride: 5,
            width: 320,
            height: 180,
            ..Default::default()
        });
        assert_eq!(custom.filter_graph(), "select='not(mod(n\\,5))',scale=320:180");
    }

    #[test]
    fn staging_dirs_are_unique() {
        assert_ne!(staging_dir(), staging_dir());
    }

    #[tokio::test]
    async fn empty_video_rejected() {
        let err = sampler("ffmpeg").sample(Bytes::new()).await.unwrap_err();
        assert!(matches!(err, SamplerError::EmptyInput));
    }

    #[tokio::test]
    async fn missing_ffmpeg_is_spawn_error() {
        let err = sampler("/nonexistent/bin/ffmpeg")
            .sample(Bytes::from_static(b"not really a video"))
            .await
            .unwrap_err();
        assert!(matches!(err, SamplerError::Spawn(_)));
    }

    #[tokio::test]
    async fn staged_frames_read_in_name_order() {
        let dir = staging_dir();
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join("frame-000002.png"), b"second").await.unwrap();
        tokio::fs::write(dir.join("frame-000001.png"), b"first").await.unwrap();
        tokio::fs::write(dir.join("notes.txt"), b"ignored").await.unwrap();

        let frames = read_staged_frames(&dir, 10).await.unwrap();
        tokio::fs::remove_dir_all(&dir).await.unwrap();

        assert_eq!(frames.len(), 2);
        assert_eq!((frames[0].index, frames[0].encoded.as_ref()), (0, &b"first"[..]));
        assert_eq!((frames[1].index, frames[1].encoded.as_ref()), (10, &b"second"[..]));
    }

    #[tokio::test]
    async fn empty_staging_dir_means_no_frames() {
        let dir = staging_dir();
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let err = read_staged_frames(&dir, 10).await.unwrap_err();
        tokio::fs::remove_dir_all(&dir).await.unwrap();
        assert!(matches!(err, SamplerError::NoFrames));
    }
}

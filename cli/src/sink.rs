use frame_distill_common::config::OutputFormat;
use frame_distill_common::frame::{FrameWarning, RetainedFrame};
use futures_util::future::join_all;
use serde::Serialize;
use std::path::PathBuf;
use tracing::{debug, info, warn};

const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("failed to create output directory {0}: {1}")]
    CreateDir(String, std::io::Error),
    #[error("failed to serialize manifest: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to write manifest {0}: {1}")]
    WriteManifest(String, std::io::Error),
}

/// One retained frame that could not be written.
#[derive(Debug)]
pub struct SinkFailure {
    pub position: usize,
    pub index: u32,
    pub error: std::io::Error,
}

#[derive(Debug, Default)]
pub struct SinkReport {
    pub written: Vec<PathBuf>,
    pub failures: Vec<SinkFailure>,
    pub manifest: PathBuf,
}

#[derive(Serialize)]
struct Manifest<'a> {
    frames: Vec<ManifestEntry>,
    skipped: Vec<ManifestSkip<'a>>,
}

#[derive(Serialize)]
struct ManifestEntry {
    position: usize,
    index: u32,
    file: String,
    bytes: usize,
}

#[derive(Serialize)]
struct ManifestSkip<'a> {
    index: u32,
    reason: &'a str,
}

/// Writes retained frames to a directory as `unique-frame-{position}.{ext}`,
/// plus a `manifest.json` mapping each position back to its source index.
pub struct DiskSink {
    dir: PathBuf,
    format: OutputFormat,
}

impl DiskSink {
    pub fn new(dir: impl Into<PathBuf>, format: OutputFormat) -> Self {
        Self {
            dir: dir.into(),
            format,
        }
    }

    /// Persist all frames concurrently. A failed frame write is reported in
    /// the returned [`SinkReport`] and does not stop the others.
    pub async fn persist(
        &self,
        frames: &[RetainedFrame],
        warnings: &[FrameWarning],
    ) -> Result<SinkReport, SinkError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| SinkError::CreateDir(self.dir.display().to_string(), e))?;

        let ext = self.format.extension();
        let writes = frames.iter().enumerate().map(|(position, frame)| {
            let file = RetainedFrame::file_name(position, ext);
            let path = self.dir.join(&file);
            async move {
                let result = tokio::fs::write(&path, &frame.encoded).await;
                (position, frame, file, path, result)
            }
        });

        let mut report = SinkReport::default();
        let mut entries = Vec::with_capacity(frames.len());
        for (position, frame, file, path, result) in join_all(writes).await {
            match result {
                Ok(()) => {
                    debug!(path = path.display().to_string(), index = frame.index, "frame written");
                    entries.push(ManifestEntry {
                        position,
                        index: frame.index,
                        file,
                        bytes: frame.encoded.len(),
                    });
                    report.written.push(path);
                }
                Err(error) => {
                    warn!(path = path.display().to_string(), index = frame.index, error = %error, "failed to write frame");
                    report.failures.push(SinkFailure {
                        position,
                        index: frame.index,
                        error,
                    });
                }
            }
        }

        let manifest = Manifest {
            frames: entries,
            skipped: warnings
                .iter()
                .map(|w| ManifestSkip {
                    index: w.index,
                    reason: &w.reason,
                })
                .collect(),
        };
        let manifest_path = self.dir.join(MANIFEST_FILE);
        let body = serde_json::to_vec_pretty(&manifest)?;
        tokio::fs::write(&manifest_path, body)
            .await
            .map_err(|e| SinkError::WriteManifest(manifest_path.display().to_string(), e))?;
        report.manifest = manifest_path;

        info!(
            dir = self.dir.display().to_string(),
            written = report.written.len(),
            failed = report.failures.len(),
            "retained frames persisted"
        );
        Ok(report)
    }
}

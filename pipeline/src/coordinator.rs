use frame_distill_common::config::{Config, OutputFormat};
use frame_distill_common::frame::{FrameWarning, RetainedFrame, SampledFrame};
use futures_util::stream::{FuturesUnordered, StreamExt};
use std::future::Future;
use tracing::{debug, error, info, warn};

use crate::cancel::CancelSignal;
use crate::decoder::{self, DecodeError, DecodedFrame, EncodeError};
use crate::filter::{DedupFilter, FrameFilter, Verdict};
use crate::reorder::ReorderBuffer;
use crate::scorer::{DimensionMismatch, PixelDiffScorer};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub diff_threshold: f64,
    pub pixel_tolerance: f64,
    /// Maximum number of frames decoding or waiting for their filter turn.
    pub concurrency: usize,
    pub output_format: OutputFormat,
    pub jpeg_quality: u8,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            diff_threshold: 0.3,
            pixel_tolerance: 0.1,
            concurrency: 4,
            output_format: OutputFormat::Png,
            jpeg_quality: 85,
        }
    }
}

impl PipelineConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            diff_threshold: config.filter.diff_threshold,
            pixel_tolerance: config.filter.pixel_tolerance,
            concurrency: config.pipeline.concurrency,
            output_format: config.output.format,
            jpeg_quality: config.output.jpeg_quality,
        }
    }

    fn validate(&self) -> Result<(), PipelineError> {
        if !(0.0..=1.0).contains(&self.diff_threshold) {
            return Err(PipelineError::Config(format!(
                "diff threshold must be within [0, 1], got {}",
                self.diff_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.pixel_tolerance) {
            return Err(PipelineError::Config(format!(
                "pixel tolerance must be within [0, 1], got {}",
                self.pixel_tolerance
            )));
        }
        if self.concurrency == 0 {
            return Err(PipelineError::Config("concurrency must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DistillStats {
    /// Frames taken from the input.
    pub sampled: u32,
    pub decoded: u32,
    pub failed: u32,
    pub retained: u32,
    pub discarded: u32,
}

/// Result of one pipeline run.
#[derive(Debug, Clone, Default)]
pub struct DistillOutcome {
    /// Retained frames in strictly increasing index order.
    pub retained: Vec<RetainedFrame>,
    /// Skipped frames in index order.
    pub warnings: Vec<FrameWarning>,
    pub stats: DistillStats,
    /// The run was cut short; `retained` is the prefix finalized before that.
    pub cancelled: bool,
}

impl DistillOutcome {
    pub fn retained_indices(&self) -> Vec<u32> {
        self.retained.iter().map(|f| f.index).collect()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("invalid pipeline config: {0}")]
    Config(String),
    #[error("sampled frame index {got} does not follow {previous}")]
    IndexOrder { previous: u32, got: u32 },
    /// The input changed resolution mid-stream. `partial` holds the frames
    /// finalized and skipped before the failing comparison.
    #[error("{source}")]
    DimensionMismatch {
        source: DimensionMismatch,
        partial: DistillOutcome,
    },
    #[error("filter retained frame {index} but did not expose it as baseline")]
    BaselineMissing { index: u32 },
    #[error("{source}")]
    Encode {
        source: EncodeError,
        partial: DistillOutcome,
    },
}

impl PipelineError {
    /// The best-effort outcome gathered before a fatal error, if the error
    /// carries one.
    pub fn partial(&self) -> Option<&DistillOutcome> {
        match self {
            Self::DimensionMismatch { partial, .. } | Self::Encode { partial, .. } => Some(partial),
            _ => None,
        }
    }

    pub fn into_partial(self) -> Option<DistillOutcome> {
        match self {
            Self::DimensionMismatch { partial, .. } | Self::Encode { partial, .. } => Some(partial),
            _ => None,
        }
    }
}

#[derive(Default)]
struct RunState {
    retained: Vec<RetainedFrame>,
    warnings: Vec<FrameWarning>,
    stats: DistillStats,
}

impl RunState {
    fn take_partial(&mut self) -> DistillOutcome {
        DistillOutcome {
            retained: std::mem::take(&mut self.retained),
            warnings: std::mem::take(&mut self.warnings),
            stats: self.stats,
            cancelled: false,
        }
    }
}

/// Drives decode, scoring and deduplication over a sampled-frame sequence.
///
/// Decoding runs on the blocking pool, up to `concurrency` frames at a time.
/// Finished decodes land in a reorder buffer and are handed to the filter
/// strictly in input order, so the result never depends on which decode
/// finishes first. Dispatch stalls while `concurrency` frames are
/// outstanding, which bounds the buffer.
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run with the default pixel-difference deduplication filter.
    pub async fn run<I>(
        &self,
        frames: I,
        cancel: &CancelSignal,
    ) -> Result<DistillOutcome, PipelineError>
    where
        I: IntoIterator<Item = SampledFrame>,
    {
        let scorer = PixelDiffScorer::new(self.config.pixel_tolerance);
        let filter = DedupFilter::with_scorer(scorer, self.config.diff_threshold);
        self.run_with(frames, filter, cancel).await
    }

    /// Run with a caller-supplied filter. The filter is owned by this call and
    /// only ever sees frames one at a time, in index order.
    pub async fn run_with<I, F>(
        &self,
        frames: I,
        mut filter: F,
        cancel: &CancelSignal,
    ) -> Result<DistillOutcome, PipelineError>
    where
        I: IntoIterator<Item = SampledFrame>,
        F: FrameFilter,
    {
        let window = self.config.concurrency;
        let mut source = frames.into_iter();
        let mut exhausted = false;
        let mut last_index: Option<u32> = None;
        let mut cancelled = false;

        let mut reorder: ReorderBuffer<Result<DecodedFrame, DecodeError>> = ReorderBuffer::new();
        let mut in_flight = FuturesUnordered::new();
        let mut run = RunState::default();

        info!(
            threshold = self.config.diff_threshold,
            concurrency = window,
            filter = filter.name(),
            "pipeline started"
        );

        loop {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            while !exhausted && reorder.outstanding() < window {
                let Some(frame) = source.next() else {
                    exhausted = true;
                    break;
                };
                if let Some(previous) = last_index {
                    if frame.index <= previous {
                        error!(previous, got = frame.index, "sampled frames out of order");
                        return Err(PipelineError::IndexOrder {
                            previous,
                            got: frame.index,
                        });
                    }
                }
                last_index = Some(frame.index);
                run.stats.sampled += 1;
                reorder.reserve(frame.index);
                in_flight.push(decode_task(frame));
            }

            let (index, result) = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                done = in_flight.next() => match done {
                    Some(done) => done,
                    None => break,
                },
            };

            let reserved = reorder.complete(index, result);
            debug_assert!(reserved, "decode finished for unreserved index {index}");
            if !reserved {
                error!(index, "decode result has no reserved turn, dropping it");
            }
            debug!(
                index,
                buffered = reorder.buffered(),
                outstanding = reorder.outstanding(),
                "decode finished"
            );

            while let Some((index, result)) = reorder.pop_ready() {
                self.apply_turn(index, result, &mut filter, &mut run)?;
                if cancel.is_cancelled() {
                    break;
                }
            }
        }

        if cancelled {
            warn!(
                retained = run.retained.len(),
                abandoned = reorder.outstanding(),
                "pipeline cancelled, returning finalized prefix"
            );
        }

        info!(
            sampled = run.stats.sampled,
            decoded = run.stats.decoded,
            failed = run.stats.failed,
            retained = run.stats.retained,
            discarded = run.stats.discarded,
            cancelled,
            "pipeline finished"
        );

        Ok(DistillOutcome {
            retained: run.retained,
            warnings: run.warnings,
            stats: run.stats,
            cancelled,
        })
    }

    fn apply_turn<F: FrameFilter>(
        &self,
        index: u32,
        result: Result<DecodedFrame, DecodeError>,
        filter: &mut F,
        run: &mut RunState,
    ) -> Result<(), PipelineError> {
        let frame = match result {
            Ok(frame) => frame,
            Err(e) => {
                warn!(index, error = %e, "skipping frame that failed to decode");
                run.stats.failed += 1;
                run.warnings.push(FrameWarning::new(index, e.to_string()));
                return Ok(());
            }
        };
        run.stats.decoded += 1;

        let verdict = match filter.apply(frame) {
            Ok(v) => v,
            Err(source) => {
                error!(error = %source, retained = run.retained.len(), "frame dimensions changed mid-stream");
                return Err(PipelineError::DimensionMismatch {
                    source,
                    partial: run.take_partial(),
                });
            }
        };

        match verdict {
            Verdict::Discarded { .. } => {
                run.stats.discarded += 1;
            }
            Verdict::Retained { score } => {
                let baseline = filter
                    .baseline()
                    .filter(|b| b.index == index)
                    .ok_or(PipelineError::BaselineMissing { index })?;
                let encoded = match decoder::encode(
                    baseline,
                    self.config.output_format,
                    self.config.jpeg_quality,
                ) {
                    Ok(encoded) => encoded,
                    Err(source) => {
                        error!(error = %source, retained = run.retained.len(), "failed to re-encode retained frame");
                        return Err(PipelineError::Encode {
                            source,
                            partial: run.take_partial(),
                        });
                    }
                };
                debug!(index, score = ?score, bytes = encoded.len(), "frame retained");
                run.stats.retained += 1;
                run.retained.push(RetainedFrame { index, encoded });
            }
        }
        Ok(())
    }
}

fn decode_task(
    frame: SampledFrame,
) -> impl Future<Output = (u32, Result<DecodedFrame, DecodeError>)> {
    let index = frame.index;
    async move {
        let result = match tokio::task::spawn_blocking(move || decoder::decode(&frame)).await {
            Ok(decoded) => decoded,
            Err(e) => Err(DecodeError::Worker(e.to_string())),
        };
        (index, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{corrupt, frame_png, noise_png, sampled};

    fn pipeline(concurrency: usize) -> Pipeline {
        Pipeline::new(PipelineConfig {
            concurrency,
            ..Default::default()
        })
        .unwrap()
    }

    fn synthetic_sequence(len: u32) -> Vec<SampledFrame> {
        (0..len)
            .map(|i| {
                if i == 7 {
                    corrupt(i)
                } else {
                    sampled(i, (i * 37) % 101)
                }
            })
            .collect()
    }

    /// Same-size frames whose decode cost alternates between heavy noise and
    /// near-empty rasters, so later light frames finish before earlier heavy ones.
    fn uneven_cost_sequence(len: u32) -> Vec<SampledFrame> {
        (0..len)
            .map(|i| {
                let png = if i % 2 == 0 {
                    noise_png(480, 480, i + 1)
                } else {
                    frame_png(480, 480, (i * 20_000) % (480 * 480))
                };
                SampledFrame::new(i, png)
            })
            .collect()
    }

    fn assert_strictly_increasing(indices: &[u32]) {
        assert!(
            indices.windows(2).all(|w| w[0] < w[1]),
            "indices not strictly increasing: {indices:?}"
        );
    }

    #[tokio::test]
    async fn empty_input_yields_empty_outcome() {
        let outcome = pipeline(4)
            .run(Vec::new(), &CancelSignal::new())
            .await
            .unwrap();
        assert!(outcome.retained.is_empty());
        assert!(outcome.warnings.is_empty());
        assert!(!outcome.cancelled);
        assert_eq!(outcome.stats, DistillStats::default());
    }

    #[tokio::test]
    async fn slow_drift_keeps_first_and_first_frame_past_threshold() {
        let frames: Vec<_> = (0..6).map(|i| sampled(i, i * 10)).collect();
        let outcome = pipeline(3).run(frames, &CancelSignal::new()).await.unwrap();
        assert_eq!(outcome.retained_indices(), vec![0, 4]);
        assert_eq!(outcome.stats.discarded, 4);
    }

    #[tokio::test]
    async fn decode_failure_skips_only_that_frame() {
        let frames = vec![
            sampled(0, 0),
            sampled(1, 10),
            corrupt(2),
            sampled(3, 50),
            sampled(4, 100),
        ];
        let outcome = pipeline(4).run(frames, &CancelSignal::new()).await.unwrap();

        assert_eq!(outcome.retained_indices(), vec![0, 3, 4]);
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(outcome.warnings[0].index, 2);
        assert_eq!(outcome.stats.failed, 1);
        assert_eq!(outcome.stats.decoded, 4);
    }

    #[tokio::test]
    async fn first_decodable_frame_is_retained() {
        let frames = vec![corrupt(0), sampled(1, 60), sampled(2, 60)];
        let outcome = pipeline(2).run(frames, &CancelSignal::new()).await.unwrap();
        assert_eq!(outcome.retained_indices(), vec![1]);
        assert_eq!(outcome.warnings[0].index, 0);
    }

    #[tokio::test]
    async fn threshold_boundary_is_exclusive() {
        let frames = vec![sampled(0, 0), sampled(1, 30), sampled(2, 31)];
        let outcome = pipeline(2).run(frames, &CancelSignal::new()).await.unwrap();
        assert_eq!(outcome.retained_indices(), vec![0, 2]);
    }

    #[tokio::test]
    async fn strided_indices_are_preserved() {
        let frames = vec![sampled(0, 0), sampled(10, 80), sampled(20, 80), sampled(30, 0)];
        let outcome = pipeline(4).run(frames, &CancelSignal::new()).await.unwrap();
        assert_eq!(outcome.retained_indices(), vec![0, 10, 30]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn result_independent_of_concurrency() {
        let frames = synthetic_sequence(20);

        let serial = pipeline(1)
            .run(frames.clone(), &CancelSignal::new())
            .await
            .unwrap();
        let parallel = pipeline(8)
            .run(frames.clone(), &CancelSignal::new())
            .await
            .unwrap();
        let again = pipeline(8).run(frames, &CancelSignal::new()).await.unwrap();

        assert!(!serial.retained.is_empty());
        assert_strictly_increasing(&serial.retained_indices());
        assert_eq!(serial.retained, parallel.retained);
        assert_eq!(parallel.retained, again.retained);
        assert_eq!(serial.warnings, parallel.warnings);
        assert_eq!(serial.stats, parallel.stats);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn uneven_decode_times_keep_input_order() {
        let frames = uneven_cost_sequence(12);

        let serial = pipeline(1)
            .run(frames.clone(), &CancelSignal::new())
            .await
            .unwrap();
        let parallel = pipeline(8).run(frames, &CancelSignal::new()).await.unwrap();

        assert_eq!(serial.stats.decoded, 12);
        assert_strictly_increasing(&parallel.retained_indices());
        assert_eq!(serial.retained_indices(), parallel.retained_indices());
        assert_eq!(serial.retained, parallel.retained);
        assert_eq!(serial.stats, parallel.stats);
    }

    #[tokio::test]
    async fn retained_bytes_are_reencoded_frames() {
        let frames = vec![sampled(0, 0), sampled(1, 100)];
        let outcome = pipeline(2).run(frames, &CancelSignal::new()).await.unwrap();
        let back = decoder::decode(&SampledFrame::new(1, outcome.retained[1].encoded.clone()))
            .unwrap();
        assert_eq!(back.pixels, crate::testing::lit_raster(10, 10, 100));
    }

    #[tokio::test]
    async fn jpeg_output_format() {
        let pipeline = Pipeline::new(PipelineConfig {
            output_format: OutputFormat::Jpeg,
            ..Default::default()
        })
        .unwrap();
        let outcome = pipeline
            .run(vec![sampled(0, 50)], &CancelSignal::new())
            .await
            .unwrap();
        assert_eq!(&outcome.retained[0].encoded[..2], &[0xFF, 0xD8]);
    }

    #[tokio::test]
    async fn dimension_mismatch_keeps_prior_retained_frames() {
        let frames = vec![
            sampled(0, 0),
            sampled(1, 50),
            SampledFrame::new(2, frame_png(12, 10, 0)),
            sampled(3, 100),
        ];
        let err = pipeline(4)
            .run(frames, &CancelSignal::new())
            .await
            .unwrap_err();

        match err {
            PipelineError::DimensionMismatch { source, partial } => {
                assert_eq!(source.right_index, 2);
                assert_eq!(source.right, (12, 10));
                assert_eq!(partial.retained_indices(), vec![0, 1]);
                assert!(partial.warnings.is_empty());
            }
            other => panic!("expected dimension mismatch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn dimension_mismatch_keeps_prior_skipped_frames() {
        let frames = vec![
            sampled(0, 0),
            corrupt(1),
            SampledFrame::new(2, frame_png(12, 10, 0)),
        ];
        let err = pipeline(4)
            .run(frames, &CancelSignal::new())
            .await
            .unwrap_err();

        let partial = err.partial().expect("mismatch carries the partial outcome");
        assert_eq!(partial.retained_indices(), vec![0]);
        assert_eq!(partial.warnings.len(), 1);
        assert_eq!(partial.warnings[0].index, 1);
        assert_eq!(partial.stats.failed, 1);
        assert!(!partial.cancelled);

        let partial = err.into_partial().unwrap();
        assert_eq!(partial.warnings[0].index, 1);
    }

    #[tokio::test]
    async fn out_of_order_input_rejected() {
        let frames = vec![sampled(0, 0), sampled(5, 0), sampled(5, 10)];
        let err = pipeline(1)
            .run(frames, &CancelSignal::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::IndexOrder { previous: 5, got: 5 }));
    }

    #[tokio::test]
    async fn cancelled_before_start_does_no_work() {
        let cancel = CancelSignal::new();
        cancel.cancel();
        let outcome = pipeline(4).run(synthetic_sequence(5), &cancel).await.unwrap();
        assert!(outcome.cancelled);
        assert!(outcome.retained.is_empty());
        assert_eq!(outcome.stats.sampled, 0);
    }

    /// Raises the cancel signal as soon as it has seen one frame.
    struct CancelAfterFirst {
        inner: DedupFilter,
        cancel: CancelSignal,
    }

    impl FrameFilter for CancelAfterFirst {
        fn apply(&mut self, frame: DecodedFrame) -> Result<Verdict, DimensionMismatch> {
            let verdict = self.inner.apply(frame);
            self.cancel.cancel();
            verdict
        }

        fn baseline(&self) -> Option<&DecodedFrame> {
            self.inner.baseline()
        }

        fn retained_count(&self) -> u32 {
            self.inner.retained_count()
        }

        fn reset(&mut self) {
            self.inner.reset()
        }
    }

    #[tokio::test]
    async fn cancel_mid_run_returns_ordered_prefix() {
        let frames = synthetic_sequence(20);
        let full = pipeline(4)
            .run(frames.clone(), &CancelSignal::new())
            .await
            .unwrap();

        let cancel = CancelSignal::new();
        let filter = CancelAfterFirst {
            inner: DedupFilter::new(0.3),
            cancel: cancel.clone(),
        };
        let partial = pipeline(4).run_with(frames, filter, &cancel).await.unwrap();

        assert!(partial.cancelled);
        assert_eq!(partial.retained_indices(), vec![0]);
        assert_eq!(partial.retained[..], full.retained[..1]);
        assert!(partial.stats.sampled <= 4);
    }

    #[test]
    fn invalid_config_rejected() {
        assert!(matches!(
            Pipeline::new(PipelineConfig {
                concurrency: 0,
                ..Default::default()
            }),
            Err(PipelineError::Config(_))
        ));
        assert!(matches!(
            Pipeline::new(PipelineConfig {
                diff_threshold: -0.1,
                ..Default::default()
            }),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn config_maps_from_file_settings() {
        let config = Config::parse("[pipeline]\nconcurrency = 2\n[filter]\ndiff_threshold = 0.5\n")
            .unwrap();
        let pc = PipelineConfig::from_config(&config);
        assert_eq!(pc.concurrency, 2);
        assert_eq!(pc.diff_threshold, 0.5);
        assert_eq!(pc.output_format, OutputFormat::Png);
    }
}

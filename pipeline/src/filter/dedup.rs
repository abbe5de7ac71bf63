use tracing::debug;

use super::traits::{FrameFilter, Verdict};
use crate::decoder::DecodedFrame;
use crate::scorer::{DimensionMismatch, PixelDiffScorer, SimilarityScorer};

/// Mutable state of one deduplication run.
#[derive(Debug, Default)]
pub struct FilterState {
    pub baseline: Option<DecodedFrame>,
    pub retained_count: u32,
}

/// Keeps a frame when it differs from the last *retained* frame by more than
/// `threshold`.
///
/// The first frame is always kept. Discarded frames never move the baseline,
/// so a slow drift made of many small steps is still caught once the total
/// change since the last kept frame crosses the threshold. A score equal to
/// the threshold is a duplicate.
pub struct DedupFilter<S = PixelDiffScorer> {
    scorer: S,
    threshold: f64,
    state: FilterState,
}

impl DedupFilter<PixelDiffScorer> {
    pub fn new(threshold: f64) -> Self {
        Self::with_scorer(PixelDiffScorer::default(), threshold)
    }
}

impl<S: SimilarityScorer> DedupFilter<S> {
    pub fn with_scorer(scorer: S, threshold: f64) -> Self {
        Self {
            scorer,
            threshold,
            state: FilterState::default(),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn state(&self) -> &FilterState {
        &self.state
    }

    fn retain(&mut self, frame: DecodedFrame) {
        self.state.baseline = Some(frame);
        self.state.retained_count += 1;
    }
}

impl<S: SimilarityScorer> FrameFilter for DedupFilter<S> {
    fn apply(&mut self, frame: DecodedFrame) -> Result<Verdict, DimensionMismatch> {
        let Some(baseline) = &self.state.baseline else {
            debug!(index = frame.index, "first frame, accepting unconditionally");
            self.retain(frame);
            return Ok(Verdict::Retained { score: None });
        };

        let score = self.scorer.score(baseline, &frame)?;
        let accepted = score > self.threshold;
        debug!(
            index = frame.index,
            baseline = baseline.index,
            score = format!("{:.4}", score),
            threshold = format!("{:.4}", self.threshold),
            accepted,
            scorer = self.scorer.name(),
            "frame comparison"
        );

        if accepted {
            self.retain(frame);
            Ok(Verdict::Retained { score: Some(score) })
        } else {
            Ok(Verdict::Discarded { score })
        }
    }

    fn baseline(&self) -> Option<&DecodedFrame> {
        self.state.baseline.as_ref()
    }

    fn retained_count(&self) -> u32 {
        self.state.retained_count
    }

    fn reset(&mut self) {
        self.state = FilterState::default();
    }

    fn name(&self) -> &str {
        "dedup"
    }
}

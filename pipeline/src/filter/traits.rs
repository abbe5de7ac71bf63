use crate::decoder::DecodedFrame;
use crate::scorer::DimensionMismatch;

/// Outcome of offering one frame to a filter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    /// Kept. `score` is `None` for the frame that primed an empty filter.
    Retained { score: Option<f64> },
    Discarded { score: f64 },
}

impl Verdict {
    pub fn is_retained(&self) -> bool {
        matches!(self, Verdict::Retained { .. })
    }
}

/// Sequential, stateful frame-deduplication interface.
///
/// Frames must be applied one at a time in strictly increasing index order.
/// A retained frame becomes the filter's baseline and stays reachable through
/// [`FrameFilter::baseline`] until the next frame is retained.
pub trait FrameFilter: Send {
    fn apply(&mut self, frame: DecodedFrame) -> Result<Verdict, DimensionMismatch>;

    /// The most recently retained frame, if any.
    fn baseline(&self) -> Option<&DecodedFrame>;

    fn retained_count(&self) -> u32;

    /// Forget the baseline so the next frame is retained unconditionally.
    fn reset(&mut self);

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

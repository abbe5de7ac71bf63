//! Frame deduplication core: decode sampled stills, score each against the
//! last kept frame, and keep the ones that changed enough.
//!
//! Decoding may run in parallel; filtering always happens in frame order.

pub mod cancel;
pub mod coordinator;
pub mod decoder;
pub mod filter;
pub mod reorder;
pub mod scorer;

#[cfg(test)]
pub(crate) mod testing;

pub use cancel::CancelSignal;
pub use coordinator::{DistillOutcome, DistillStats, Pipeline, PipelineConfig, PipelineError};
pub use decoder::{decode, encode, DecodeError, DecodedFrame, EncodeError};
pub use filter::{DedupFilter, FilterState, FrameFilter, Verdict};
pub use reorder::ReorderBuffer;
pub use scorer::{DimensionMismatch, PixelDiffScorer, SimilarityScorer};

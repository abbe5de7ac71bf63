pub mod dedup;
pub mod traits;

pub use dedup::{DedupFilter, FilterState};
pub use traits::{FrameFilter, Verdict};

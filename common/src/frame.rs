use bytes::Bytes;

/// One still image produced by the frame sampler.
///
/// `index` is the sole ordering key: the sampler emits frames in strictly
/// increasing index order. The encoded payload is immutable and cheap to
/// clone, so it can be handed to a decode worker without copying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampledFrame {
    pub index: u32,
    pub encoded: Bytes,
}

impl SampledFrame {
    pub fn new(index: u32, encoded: impl Into<Bytes>) -> Self {
        Self {
            index,
            encoded: encoded.into(),
        }
    }

    pub fn size(&self) -> usize {
        self.encoded.len()
    }
}

/// A sampled frame that passed the deduplication filter, re-encoded for output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetainedFrame {
    pub index: u32,
    pub encoded: Vec<u8>,
}

impl RetainedFrame {
    /// File name for this frame when persisted at `position` in the retained sequence.
    pub fn file_name(position: usize, extension: &str) -> String {
        format!("unique-frame-{position}.{extension}")
    }
}

/// A frame that was skipped and why. Never fatal to the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameWarning {
    pub index: u32,
    pub reason: String,
}

impl FrameWarning {
    pub fn new(index: u32, reason: impl Into<String>) -> Self {
        Self {
            index,
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for FrameWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "frame {}: {}", self.index, self.reason)
    }
}

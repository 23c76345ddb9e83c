use std::path::PathBuf;

use crate::window::LiveWindow;

/// One segment of the composite VOD sequence, produced at load time.
#[derive(Debug, Clone)]
pub struct VodSegment {
    /// Duration in seconds, as declared by `EXTINF`.
    pub duration: f32,
    /// Source file path, resolved against the playlist's own directory.
    pub uri: PathBuf,
    /// Splice marker carried over from the source, or set at merge
    /// boundaries between appended sources.
    pub discontinuity: bool,
}

impl VodSegment {
    pub(crate) fn duration_ms(&self) -> i64 {
        (f64::from(self.duration) * 1000.0).round() as i64
    }
}

/// One rendition of the stream: its immutable-after-load VOD sequence plus
/// the mutable live-window state and output locations.
#[derive(Debug)]
pub struct Layer {
    /// Composite segment sequence across all appended sources.
    pub vod: Vec<VodSegment>,
    pub window: LiveWindow,
    /// Directory the layer's segments are published into.
    pub dir: PathBuf,
    /// The layer's live manifest path.
    pub manifest_path: PathBuf,
}

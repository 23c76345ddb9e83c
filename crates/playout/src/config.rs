use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::error::PlayoutError;

/// How a published segment is materialized in the output tree.
///
/// Selected once at startup; an unknown strategy cannot reach the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum SegmentStrategy {
    /// Symlink to the resolved absolute source path.
    AbsoluteSymlink,
    /// Symlink relative to the layer's output directory. Keeps the tree
    /// portable when moved as a unit.
    RelativeSymlink,
    /// Hard link. Requires source and output on the same filesystem.
    Hardlink,
    /// Full byte copy. Cross-filesystem safe, higher I/O cost.
    Copy,
}

/// What to do when a VOD segment file is absent at publish time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum MissingSegmentPolicy {
    /// Publish the link anyway and keep going.
    Ignore,
    /// Advance past the segment without publishing it or advancing the
    /// global sequence.
    Skip,
    /// Treat the missing file as fatal.
    Fail,
}

/// Configuration for a playout run.
///
/// The engine never reads the environment itself; the CLI (or an embedding
/// application) maps its own surface onto this struct.
#[derive(Debug, Clone)]
pub struct PlayoutConfig {
    /// Source playlists, in append order. The first is the structural
    /// reference: it defines the layer count and drives the global
    /// time-to-segment mapping.
    pub sources: Vec<PathBuf>,
    /// Root of the published live tree.
    pub output_dir: PathBuf,
    /// Manifest filename, used for the master playlist and each layer's
    /// live playlist.
    pub playlist_name: String,
    /// Per-layer folder name template with a single `{}` placeholder for
    /// the layer index.
    pub layer_dir_template: String,
    /// Segment name template with a single `{}` placeholder for the global
    /// sequence number.
    pub segment_name_template: String,
    /// Live window length per layer.
    pub live_max_segments: usize,
    /// Evicted segments kept on disk per layer before reaping.
    pub live_max_stale_segments: usize,
    pub strategy: SegmentStrategy,
    pub missing_segment: MissingSegmentPolicy,
    /// Wall-clock instant the looping broadcast notionally began. Must not
    /// be in the future. All independent runs configured with the same
    /// start time and sources converge on the same playback position.
    pub start_time: DateTime<Utc>,
    /// Maintain `EXT-X-DISCONTINUITY-SEQUENCE` as discontinuity markers
    /// fall out of the live window.
    pub track_discontinuity_sequence: bool,
}

impl Default for PlayoutConfig {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            output_dir: PathBuf::from("live"),
            playlist_name: "hls.m3u8".to_string(),
            layer_dir_template: "layer{}".to_string(),
            segment_name_template: "hls_{}.ts".to_string(),
            live_max_segments: 4,
            live_max_stale_segments: 4,
            strategy: SegmentStrategy::RelativeSymlink,
            missing_segment: MissingSegmentPolicy::Ignore,
            start_time: Utc::now(),
            track_discontinuity_sequence: false,
        }
    }
}

impl PlayoutConfig {
    /// Validates the configuration before the loop starts.
    ///
    /// Errors name the offending key. `now` is passed in so callers (and
    /// tests) control the clock used for the future-start check.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), PlayoutError> {
        if self.sources.is_empty() {
            return Err(PlayoutError::Config {
                key: "sources",
                reason: "provide at least one source".to_string(),
            });
        }

        if self.start_time > now {
            return Err(PlayoutError::Config {
                key: "start_time",
                reason: format!("cannot be set in the future (got {})", self.start_time),
            });
        }

        if self.live_max_segments == 0 {
            return Err(PlayoutError::Config {
                key: "live_max_segments",
                reason: "live window must hold at least one segment".to_string(),
            });
        }

        validate_template("layer_dir_template", &self.layer_dir_template)?;
        validate_template("segment_name_template", &self.segment_name_template)?;

        Ok(())
    }
}

fn validate_template(key: &'static str, template: &str) -> Result<(), PlayoutError> {
    if template.matches("{}").count() != 1 {
        return Err(PlayoutError::Config {
            key,
            reason: format!("`{template}` must contain exactly one `{{}}` placeholder"),
        });
    }
    Ok(())
}

/// Substitutes the single numeric placeholder in a name template.
pub(crate) fn expand_template(template: &str, value: u64) -> String {
    template.replacen("{}", &value.to_string(), 1)
}

//! The playout loop driver.
//!
//! Owns the layers, the cursor, and the reaper, and advances them one tick
//! at a time: publish every layer's current segment, append/evict on the
//! live windows, enqueue stale paths, flush manifests, then pace against
//! the wall clock. A warm batch of `live_max_segments` sub-ticks runs
//! unpaced at startup so the first served manifest is already a full
//! window at the correct trailing position.

use std::fs;
use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use m3u8_rs::MasterPlaylist;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{MissingSegmentPolicy, PlayoutConfig, expand_template};
use crate::error::PlayoutError;
use crate::layer::Layer;
use crate::loader;
use crate::reaper::StaleReaper;
use crate::sync::Cursor;
use crate::window::LiveSegmentEntry;

/// What a single sub-tick did, and what the driver owes the wall clock.
#[derive(Debug, PartialEq, Eq)]
enum TickOutcome {
    /// Warm-batch sub-tick; no pacing yet.
    Warmup,
    /// The current segment was skipped under [`MissingSegmentPolicy::Skip`].
    Skipped,
    /// Steady-state tick; suspend for `wait_ms` before the next one.
    Paced { wait_ms: i64 },
}

/// The engine. Not safe to run twice concurrently against the same output
/// tree; no locking is provided.
pub struct PlayoutEngine {
    config: PlayoutConfig,
    layers: Vec<Layer>,
    segments_total: usize,
    target_duration: u64,
    cursor: Cursor,
    reaper: StaleReaper,
}

impl PlayoutEngine {
    /// Loads the sources, prepares the output tree, and synchronizes the
    /// cursor to the wall clock. Every layer directory is created and
    /// confirmed before the first publish.
    pub fn new(config: PlayoutConfig) -> Result<Self, PlayoutError> {
        let now = Utc::now();
        config.validate(now)?;

        let loaded = loader::load(&config)?;
        let first_source = &config.sources[0];

        let segments_total = loaded
            .layers
            .first()
            .map(|layer| layer.vod.len())
            .unwrap_or_default();
        if segments_total == 0 {
            return Err(PlayoutError::Source {
                path: first_source.clone(),
                reason: "contains no segments".to_string(),
            });
        }
        if loaded.target_duration == 0 {
            return Err(PlayoutError::Playlist {
                path: first_source.clone(),
                reason: "missing EXT-X-TARGETDURATION".to_string(),
            });
        }

        ensure_dir(&config.output_dir)?;
        for layer in &loaded.layers {
            ensure_dir(&layer.dir)?;
        }
        info!(path = %config.output_dir.display(), "output directory ensured");

        if let Some(master) = &loaded.master {
            write_master(master, &config.output_dir.join(&config.playlist_name))?;
        }

        let segment_duration_ms = loaded.target_duration as i64 * 1000;
        let cursor = Cursor::synchronize(
            config.start_time.timestamp_millis(),
            now.timestamp_millis(),
            &loaded.reference,
            segment_duration_ms,
            &loaded.layers[0].vod,
            config.live_max_segments,
        );
        debug!(
            segment_id = cursor.segment_id,
            media_sequence = cursor.media_sequence,
            loops_total = cursor.loops_total,
            "synchronized to wall clock"
        );

        let reaper = StaleReaper::new(config.live_max_stale_segments * loaded.layers.len());

        Ok(Self {
            layers: loaded.layers,
            segments_total,
            target_duration: loaded.target_duration,
            cursor,
            reaper,
            config,
        })
    }

    /// Runs the playout loop until a fatal error or cancellation.
    ///
    /// Cancellation is honored only at tick boundaries: the in-flight tick
    /// finishes, manifests are flushed, and the loop returns `Ok`.
    pub async fn run(&mut self, token: CancellationToken) -> Result<(), PlayoutError> {
        info!(
            layers = self.layers.len(),
            segments_total = self.segments_total,
            media_sequence = self.cursor.media_sequence,
            "starting playout loop"
        );

        loop {
            if token.is_cancelled() {
                info!("cancellation requested; stopping at tick boundary");
                return Ok(());
            }

            match self.tick()? {
                TickOutcome::Warmup | TickOutcome::Skipped => {}
                TickOutcome::Paced { wait_ms } => {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => {
                            info!("cancellation requested during pacing wait");
                            return Ok(());
                        }
                        _ = tokio::time::sleep(Duration::from_millis(wait_ms as u64)) => {}
                    }
                    self.cursor.last_timestamp = Utc::now().timestamp_millis();
                }
            }
        }
    }

    /// One sub-tick: publish the current segment on every layer, maintain
    /// the windows, reap, and flush manifests once per full cycle.
    fn tick(&mut self) -> Result<TickOutcome, PlayoutError> {
        debug!(
            segment_id = self.cursor.segment_id,
            segments_total = self.segments_total,
            drift_ms = self.cursor.last_timestamp - self.cursor.sync_timestamp,
            "tick"
        );

        // The reference layer's segment timing is authoritative.
        let duration_ms = self.layers[0].vod[self.cursor.segment_id].duration_ms();

        // A non-successor advance is a splice the decoder must be told
        // about. Deliberately unwrapped: the jump from the last segment
        // back to id 0 at loop wraparound must force one too.
        let splice = self.cursor.segment_id != self.cursor.last_segment_id + 1;
        if splice && let Some(segment) = self.layers[0].vod.get(self.cursor.segment_id) {
            info!(
                segment_id = self.cursor.segment_id,
                source = %segment.uri.display(),
                "splice point"
            );
        }

        if self.config.missing_segment != MissingSegmentPolicy::Ignore
            && let Some(missing) = self.find_missing_segment()
        {
            error!(path = %missing.display(), "segment not found");
            match self.config.missing_segment {
                MissingSegmentPolicy::Skip => {
                    warn!(segment_id = self.cursor.segment_id, "skipping missing segment");
                    self.cursor.segment_id = (self.cursor.segment_id + 1) % self.segments_total;
                    return Ok(TickOutcome::Skipped);
                }
                MissingSegmentPolicy::Fail => {
                    return Err(PlayoutError::SegmentMissing { path: missing });
                }
                MissingSegmentPolicy::Ignore => unreachable!(),
            }
        }

        let sequence = self.cursor.publish_sequence(self.config.live_max_segments);
        let segment_name = expand_template(&self.config.segment_name_template, sequence);

        for layer in &mut self.layers {
            let Some(segment) = layer.vod.get(self.cursor.segment_id) else {
                return Err(PlayoutError::Source {
                    path: layer.dir.clone(),
                    reason: format!(
                        "layer has no segment at index {} (reference layer has {})",
                        self.cursor.segment_id, self.segments_total
                    ),
                });
            };

            let dest = layer.dir.join(&segment_name);
            self.config.strategy.publish(&segment.uri, &dest)?;

            let evicted = layer.window.push(LiveSegmentEntry {
                sequence,
                source: segment.uri.clone(),
                output_name: segment_name.clone(),
                duration: segment.duration,
                publish_timestamp: self.cursor.sync_timestamp,
                discontinuity: segment.discontinuity || splice,
                title: Some("no desc".to_string()),
            });
            if let Some(stale_name) = evicted {
                self.reaper.enqueue(layer.dir.join(stale_name));
            }
        }

        self.reaper.reap()?;

        // Manifests are withheld until the warm batch has filled the
        // windows; no reader ever observes a partially updated layer set.
        let warmed =
            self.cursor.media_sequence_segment_offset == self.config.live_max_segments - 1;
        if warmed {
            for layer in &self.layers {
                layer.window.write(&layer.manifest_path, self.target_duration)?;
            }
        }

        let outcome = if warmed {
            self.cursor.media_sequence += 1;
            let wait_ms = (duration_ms - (self.cursor.last_timestamp - self.cursor.sync_timestamp))
                .max(0);
            TickOutcome::Paced { wait_ms }
        } else {
            self.cursor.media_sequence_segment_offset += 1;
            TickOutcome::Warmup
        };

        self.cursor.last_segment_id = self.cursor.segment_id;
        self.cursor.segment_id = (self.cursor.segment_id + 1) % self.segments_total;
        self.cursor.sync_timestamp += duration_ms;

        Ok(outcome)
    }

    /// First missing source file for the current segment across all
    /// layers, checked before anything is published so a skip never leaves
    /// a layer half-updated.
    fn find_missing_segment(&self) -> Option<std::path::PathBuf> {
        for layer in &self.layers {
            match layer.vod.get(self.cursor.segment_id) {
                Some(segment) if segment.uri.exists() => {}
                Some(segment) => return Some(segment.uri.clone()),
                None => return Some(layer.dir.clone()),
            }
        }
        None
    }

}

fn ensure_dir(path: &Path) -> Result<(), PlayoutError> {
    fs::create_dir_all(path).map_err(|source| PlayoutError::io(path, source))
}

fn write_master(master: &MasterPlaylist, path: &Path) -> Result<(), PlayoutError> {
    let mut text = Vec::new();
    master
        .write_to(&mut text)
        .map_err(|source| PlayoutError::io(path, source))?;
    fs::write(path, text).map_err(|source| PlayoutError::io(path, source))
}

use std::collections::VecDeque;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use m3u8_rs::{MediaPlaylist, MediaSegment};
use tracing::debug;

use crate::error::PlayoutError;

/// One published segment in a layer's live window.
#[derive(Debug, Clone)]
pub struct LiveSegmentEntry {
    /// Global sequence number the segment was published under.
    pub sequence: u64,
    /// Source file the output entry points at.
    pub source: std::path::PathBuf,
    /// Output file name inside the layer directory; also the manifest URI.
    pub output_name: String,
    /// Duration in seconds.
    pub duration: f32,
    /// Instant the segment notionally began, epoch ms. Serialized as
    /// `EXT-X-PROGRAM-DATE-TIME`.
    pub publish_timestamp: i64,
    pub discontinuity: bool,
    pub title: Option<String>,
}

/// Bounded FIFO of published entries for one layer, plus the manifest
/// counters derived from it.
#[derive(Debug)]
pub struct LiveWindow {
    entries: VecDeque<LiveSegmentEntry>,
    max_entries: usize,
    discontinuity_sequence: u64,
    track_discontinuity_sequence: bool,
}

impl LiveWindow {
    pub fn new(max_entries: usize, track_discontinuity_sequence: bool) -> Self {
        Self {
            entries: VecDeque::with_capacity(max_entries + 1),
            max_entries,
            discontinuity_sequence: 0,
            track_discontinuity_sequence,
        }
    }

    /// Appends a published entry; if the window overflows, evicts the
    /// oldest entry and returns its output name for deferred deletion.
    pub fn push(&mut self, entry: LiveSegmentEntry) -> Option<String> {
        self.entries.push_back(entry);

        if self.entries.len() <= self.max_entries {
            return None;
        }

        let evicted = self.entries.pop_front()?;
        if self.track_discontinuity_sequence && evicted.discontinuity {
            self.discontinuity_sequence += 1;
        }
        debug!(
            sequence = evicted.sequence,
            name = %evicted.output_name,
            "segment left the live window"
        );
        Some(evicted.output_name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sequence number of the oldest listed entry: the manifest's
    /// `EXT-X-MEDIA-SEQUENCE` base.
    pub fn media_sequence_base(&self) -> u64 {
        self.entries.front().map(|e| e.sequence).unwrap_or(0)
    }

    pub fn entries(&self) -> impl Iterator<Item = &LiveSegmentEntry> {
        self.entries.iter()
    }

    /// Builds the live media playlist for the serialization collaborator.
    pub fn to_media_playlist(&self, target_duration: u64) -> MediaPlaylist {
        let segments = self
            .entries
            .iter()
            .map(|entry| MediaSegment {
                uri: entry.output_name.clone(),
                duration: entry.duration,
                title: entry.title.clone(),
                discontinuity: entry.discontinuity,
                program_date_time: DateTime::<Utc>::from_timestamp_millis(entry.publish_timestamp)
                    .map(|instant| instant.fixed_offset()),
                ..Default::default()
            })
            .collect();

        MediaPlaylist {
            version: Some(3),
            target_duration,
            media_sequence: self.media_sequence_base(),
            discontinuity_sequence: self.discontinuity_sequence,
            segments,
            end_list: false,
            ..Default::default()
        }
    }

    /// Serializes the window and overwrites the manifest on disk.
    pub fn write(&self, path: &Path, target_duration: u64) -> Result<(), PlayoutError> {
        let playlist = self.to_media_playlist(target_duration);
        let mut text = Vec::new();
        playlist
            .write_to(&mut text)
            .map_err(|source| PlayoutError::io(path, source))?;
        fs::write(path, text).map_err(|source| PlayoutError::io(path, source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn entry(sequence: u64, discontinuity: bool) -> LiveSegmentEntry {
        LiveSegmentEntry {
            sequence,
            source: PathBuf::from(format!("vod/seg{sequence}.ts")),
            output_name: format!("hls_{sequence}.ts"),
            duration: 2.0,
            publish_timestamp: 1_700_000_000_000 + sequence as i64 * 2_000,
            discontinuity,
            title: None,
        }
    }

    #[test]
    fn window_length_never_exceeds_bound() {
        let mut window = LiveWindow::new(4, false);
        for sequence in 0..20 {
            window.push(entry(sequence, false));
            assert!(window.len() <= 4);
        }
    }

    #[test]
    fn eviction_is_oldest_first_and_advances_the_base() {
        let mut window = LiveWindow::new(2, false);
        assert_eq!(window.push(entry(5, false)), None);
        assert_eq!(window.push(entry(6, false)), None);
        assert_eq!(window.push(entry(7, false)), Some("hls_5.ts".to_string()));
        assert_eq!(window.media_sequence_base(), 6);
    }

    #[test]
    fn base_advances_by_one_per_eviction() {
        let mut window = LiveWindow::new(3, false);
        for sequence in 0..3 {
            window.push(entry(sequence, false));
        }
        let initial = window.media_sequence_base();
        for sequence in 3..8 {
            window.push(entry(sequence, false));
        }
        assert_eq!(window.media_sequence_base(), initial + 5);
    }

    #[test]
    fn discontinuity_sequence_counts_evicted_markers_when_tracked() {
        let mut window = LiveWindow::new(1, true);
        window.push(entry(0, true));
        window.push(entry(1, false)); // evicts the discontinuity entry
        window.push(entry(2, false));
        let playlist = window.to_media_playlist(2);
        assert_eq!(playlist.discontinuity_sequence, 1);
    }

    #[test]
    fn discontinuity_sequence_stays_zero_when_untracked() {
        let mut window = LiveWindow::new(1, false);
        window.push(entry(0, true));
        window.push(entry(1, false));
        assert_eq!(window.to_media_playlist(2).discontinuity_sequence, 0);
    }

    #[test]
    fn serializes_a_live_manifest_the_parser_round_trips() {
        let mut window = LiveWindow::new(3, false);
        window.push(entry(10, false));
        window.push(entry(11, true));

        let mut text = Vec::new();
        window.to_media_playlist(2).write_to(&mut text).unwrap();

        let parsed = match m3u8_rs::parse_playlist_res(&text) {
            Ok(m3u8_rs::Playlist::MediaPlaylist(playlist)) => playlist,
            other => panic!("expected media playlist, got {other:?}"),
        };
        assert_eq!(parsed.media_sequence, 10);
        assert_eq!(parsed.segments.len(), 2);
        assert_eq!(parsed.segments[0].uri, "hls_10.ts");
        assert_eq!(parsed.segments[1].uri, "hls_11.ts");
        assert!(parsed.segments[1].discontinuity);
        assert!(!parsed.end_list);
    }
}

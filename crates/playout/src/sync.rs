//! Wall-clock to loop-position synchronization.
//!
//! Maps "now" plus the configured broadcast start instant onto a segment
//! index and global sequence number, purely arithmetically. Two independent
//! runs given the same start time and sources land on the same position
//! without any shared state; that is the property every formula here serves.

use crate::layer::VodSegment;

/// Shape of one appended source, recorded from the reference (first) layer.
///
/// The global time mapping is derived solely from these entries. If another
/// layer's total duration differs from the reference layer's, that layer
/// silently desynchronizes; the reference layer's timing is authoritative.
#[derive(Debug, Clone)]
pub struct ReferencePlaylistInfo {
    pub duration_ms: i64,
    pub segment_count: usize,
}

/// Engine-wide mutable cursor, threaded through every tick.
#[derive(Debug, Clone)]
pub struct Cursor {
    /// Wall clock at the start of the current tick, epoch ms. Refreshed
    /// only after the pacing wait.
    pub last_timestamp: i64,
    /// Instant the current segment notionally began, epoch ms.
    pub sync_timestamp: i64,
    /// Index into the composite VOD sequence, `[0, segments_total)`.
    pub segment_id: usize,
    pub last_segment_id: usize,
    /// Global sequence number of the segment playing now. Non-decreasing;
    /// stable across restarts given unchanged start time and sources.
    pub media_sequence: u64,
    /// Sub-tick position inside the warm batch, `[0, live_max_segments)`.
    pub media_sequence_segment_offset: usize,
    /// Whole loops of the composite sequence completed so far.
    pub loops_total: i64,
}

/// Euclidean remainder: always in `[0, modulus)` for `modulus > 0`.
pub fn mod_floor(value: i64, modulus: i64) -> i64 {
    value.rem_euclid(modulus)
}

impl Cursor {
    /// Computes the steady-state cursor for wall-clock `now_ms`.
    ///
    /// Walks the per-source reference entries to map elapsed time onto a
    /// (source, in-source offset) pair even when segment counts and
    /// durations vary per source, then pre-winds `segment_id` and
    /// `sync_timestamp` back across up to `live_max_segments`
    /// reference-layer segments so the first published batch fills the
    /// window at the correct trailing position instead of cold-starting.
    pub fn synchronize(
        start_time_ms: i64,
        now_ms: i64,
        reference: &[ReferencePlaylistInfo],
        segment_duration_ms: i64,
        reference_vod: &[VodSegment],
        live_max_segments: usize,
    ) -> Self {
        let segments_total = reference_vod.len();
        let loop_duration_ms: i64 = reference.iter().map(|info| info.duration_ms).sum();

        let elapsed = now_ms - start_time_ms;
        let mut position = mod_floor(elapsed, loop_duration_ms);
        let loops_total = elapsed.div_euclid(loop_duration_ms);

        let mut segment_offset = 0usize;
        for info in reference {
            if position < info.duration_ms {
                break;
            }
            position -= info.duration_ms;
            segment_offset += info.segment_count;
        }
        segment_offset += (position / segment_duration_ms) as usize;

        let mut sync_timestamp = now_ms - mod_floor(position, segment_duration_ms);
        let media_sequence = loops_total as u64 * segments_total as u64 + segment_offset as u64;

        // Rewind to where the manifest should start, so the warm batch
        // publishes the trailing window rather than starting at "now". A
        // broadcast younger than one window has less history than that;
        // its warm batch is clamped to the segments aired since start.
        let wind = live_max_segments.min(media_sequence as usize + 1);
        let total = segments_total as i64;
        let segment_id = mod_floor(segment_offset as i64 - wind as i64 + 1, total) as usize;
        let last_segment_id = mod_floor(segment_id as i64 - 1, total) as usize;

        let mut cursor_id = segment_id;
        for _ in 0..wind {
            cursor_id = (cursor_id + 1) % segments_total;
            sync_timestamp -= reference_vod[cursor_id].duration_ms();
        }

        Cursor {
            last_timestamp: now_ms,
            sync_timestamp,
            segment_id,
            last_segment_id,
            media_sequence,
            media_sequence_segment_offset: live_max_segments - wind,
            loops_total,
        }
    }

    /// Sequence number the current sub-tick publishes under.
    ///
    /// During the warm batch this trails `media_sequence` so the back-filled
    /// window carries the sequence numbers those segments would have been
    /// published under; from then on it equals `media_sequence`. The
    /// clamped warm batch keeps it non-negative; the saturation is a guard.
    pub fn publish_sequence(&self, live_max_segments: usize) -> u64 {
        (self.media_sequence + self.media_sequence_segment_offset as u64)
            .saturating_sub(live_max_segments as u64 - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn vod(durations_secs: &[f32]) -> Vec<VodSegment> {
        durations_secs
            .iter()
            .enumerate()
            .map(|(i, &duration)| VodSegment {
                duration,
                uri: PathBuf::from(format!("seg{i}.ts")),
                discontinuity: false,
            })
            .collect()
    }

    fn single_source(vod: &[VodSegment]) -> Vec<ReferencePlaylistInfo> {
        vec![ReferencePlaylistInfo {
            duration_ms: vod.iter().map(|s| s.duration_ms()).sum(),
            segment_count: vod.len(),
        }]
    }

    #[test]
    fn mod_floor_is_always_in_range() {
        assert_eq!(mod_floor(150, 12), 6);
        assert_eq!(mod_floor(-50, 12), 10);
        assert_eq!(mod_floor(0, 7), 0);
        assert_eq!(mod_floor(-7, 7), 0);
    }

    #[test]
    fn seven_seconds_into_a_twenty_second_loop() {
        // 10 segments x 2s, window of 4, started 7s ago.
        let vod = vod(&[2.0; 10]);
        let reference = single_source(&vod);
        let now = 1_700_000_007_000;

        let cursor = Cursor::synchronize(now - 7_000, now, &reference, 2_000, &vod, 4);

        assert_eq!(cursor.loops_total, 0);
        assert_eq!(cursor.media_sequence, 3);
        // Pre-wound to the trailing edge of the window.
        assert_eq!(cursor.segment_id, 0);
        assert_eq!(cursor.last_segment_id, 9);
        // Current segment began 1s ago; rewound across four 2s segments.
        assert_eq!(cursor.sync_timestamp, now - 1_000 - 8_000);
        // Warm batch publishes under sequence numbers 0..=3.
        assert_eq!(cursor.publish_sequence(4), 0);
    }

    #[test]
    fn whole_loops_accumulate_into_media_sequence() {
        let vod = vod(&[2.0; 10]);
        let reference = single_source(&vod);
        let now = 1_700_000_000_000;

        // 150s elapsed = 7 full 20s loops + 10s.
        let cursor = Cursor::synchronize(now - 150_000, now, &reference, 2_000, &vod, 4);

        assert_eq!(cursor.loops_total, 7);
        assert_eq!(cursor.media_sequence, 7 * 10 + 5);
    }

    #[test]
    fn multi_source_offsets_walk_reference_entries() {
        // Source A: 3 x 4s, source B: 5 x 2s; uneven shapes on purpose.
        let mut sequence = vod(&[4.0, 4.0, 4.0]);
        sequence.extend(vod(&[2.0; 5]));
        let reference = vec![
            ReferencePlaylistInfo {
                duration_ms: 12_000,
                segment_count: 3,
            },
            ReferencePlaylistInfo {
                duration_ms: 10_000,
                segment_count: 5,
            },
        ];
        let now = 1_700_000_000_000;

        // 15s in: past source A (12s, 3 segments), 3s into source B.
        // B's nominal segment duration is 2s -> one more whole segment.
        let cursor = Cursor::synchronize(now - 15_000, now, &reference, 2_000, &sequence, 1);

        assert_eq!(cursor.media_sequence, 4);
        assert_eq!(cursor.segment_id, 4);
    }

    #[test]
    fn restart_at_same_elapsed_time_is_deterministic() {
        let vod = vod(&[6.0, 4.0, 2.0, 8.0]);
        let reference = single_source(&vod);
        let start = 1_690_000_000_000;
        let now = start + 987_654_321;

        let first = Cursor::synchronize(start, now, &reference, 8_000, &vod, 3);
        let restarted = Cursor::synchronize(start, now, &reference, 8_000, &vod, 3);

        assert_eq!(first.segment_id, restarted.segment_id);
        assert_eq!(first.media_sequence, restarted.media_sequence);
        assert_eq!(first.sync_timestamp, restarted.sync_timestamp);
        assert_eq!(first.loops_total, restarted.loops_total);
    }

    #[test]
    fn young_broadcast_gets_a_clamped_warm_batch() {
        let vod = vod(&[2.0; 10]);
        let reference = single_source(&vod);
        let now = 1_700_000_000_000;

        // Started this instant: only the current segment has aired, so the
        // warm batch is one sub-tick and publishes under sequence 0.
        let cursor = Cursor::synchronize(now, now, &reference, 2_000, &vod, 4);

        assert_eq!(cursor.media_sequence, 0);
        assert_eq!(cursor.segment_id, 0);
        assert_eq!(cursor.media_sequence_segment_offset, 3);
        assert_eq!(cursor.publish_sequence(4), 0);
    }
}
